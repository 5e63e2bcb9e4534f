// In-memory collaborators shared by the service tests
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{EnrichmentError, RunnerError};
use crate::models::DatabaseIdentity;
use crate::services::graph::{GraphQueryRunner, Row};
use crate::services::summarizer::SemanticEnricher;

struct FailureRule {
    pattern: String,
    error: RunnerError,
    remaining: usize,
    served: usize,
}

struct FakeLabel {
    name: String,
    count: u64,
    nodes: Vec<Value>,
}

struct FakeRelationship {
    rel_type: String,
    count: u64,
    endpoints: Vec<(String, String)>,
}

/// Graph database answering the prober's structural queries from memory
pub struct FakeGraph {
    labels: Vec<FakeLabel>,
    relationships: Vec<FakeRelationship>,
    failures: Mutex<Vec<FailureRule>>,
    delay: Option<Duration>,
    /// Every query received, failed ones included
    pub calls: AtomicUsize,
    /// Label listings received, one per discovery run
    pub discovery_runs: AtomicUsize,
}

impl FakeGraph {
    pub fn new() -> Self {
        Self {
            labels: Vec::new(),
            relationships: Vec::new(),
            failures: Mutex::new(Vec::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            discovery_runs: AtomicUsize::new(0),
        }
    }

    pub fn with_label(mut self, name: &str, count: u64, nodes: Vec<Value>) -> Self {
        self.labels.push(FakeLabel {
            name: name.to_string(),
            count,
            nodes,
        });
        self.labels.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    pub fn with_relationship(
        mut self,
        rel_type: &str,
        count: u64,
        endpoints: &[(&str, &str)],
    ) -> Self {
        self.relationships.push(FakeRelationship {
            rel_type: rel_type.to_string(),
            count,
            endpoints: endpoints
                .iter()
                .map(|(s, t)| (s.to_string(), t.to_string()))
                .collect(),
        });
        self.relationships.sort_by(|a, b| a.rel_type.cmp(&b.rel_type));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `times` queries containing `pattern`
    pub fn fail_next(&self, pattern: &str, error: RunnerError, times: usize) {
        self.failures.lock().unwrap().push(FailureRule {
            pattern: pattern.to_string(),
            error,
            remaining: times,
            served: 0,
        });
    }

    pub fn failures_served(&self, pattern: &str) -> usize {
        self.failures
            .lock()
            .unwrap()
            .iter()
            .filter(|rule| rule.pattern == pattern)
            .map(|rule| rule.served)
            .sum()
    }

    fn injected_failure(&self, query: &str) -> Option<RunnerError> {
        let mut failures = self.failures.lock().unwrap();
        failures
            .iter_mut()
            .find(|rule| rule.remaining > 0 && query.contains(&rule.pattern))
            .map(|rule| {
                rule.remaining -= 1;
                rule.served += 1;
                rule.error.clone()
            })
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn quoted_name(query: &str) -> &str {
        query.split('`').nth(1).unwrap_or("")
    }

    fn answer(&self, query: &str, params: &Value) -> Result<Vec<Row>, RunnerError> {
        let limit = params["limit"].as_u64().unwrap_or(u64::MAX) as usize;

        if query.contains("RETURN label") || query.contains("DISTINCT label ORDER") {
            return Ok(self
                .labels
                .iter()
                .take(limit)
                .map(|l| Self::row(&[("label", json!(l.name))]))
                .collect());
        }
        if query.contains("RETURN relationshipType") || query.contains("AS relationshipType") {
            return Ok(self
                .relationships
                .iter()
                .take(limit)
                .map(|r| Self::row(&[("relationshipType", json!(r.rel_type))]))
                .collect());
        }

        let name = Self::quoted_name(query);
        if query.contains("count(n)") {
            let label = self.labels.iter().find(|l| l.name == name);
            return Ok(vec![Self::row(&[("count", json!(label.map(|l| l.count).unwrap_or(0)))])]);
        }
        if query.contains("properties(n)") {
            let label = self.labels.iter().find(|l| l.name == name);
            return Ok(label
                .map(|l| {
                    l.nodes
                        .iter()
                        .take(limit)
                        .map(|n| Self::row(&[("props", n.clone())]))
                        .collect()
                })
                .unwrap_or_default());
        }
        if query.contains("count(r)") {
            let rel = self.relationships.iter().find(|r| r.rel_type == name);
            return Ok(vec![Self::row(&[("count", json!(rel.map(|r| r.count).unwrap_or(0)))])]);
        }
        if query.contains("AS source") {
            let rel = self.relationships.iter().find(|r| r.rel_type == name);
            return Ok(rel
                .map(|r| {
                    r.endpoints
                        .iter()
                        .take(limit)
                        .map(|(s, t)| Self::row(&[("source", json!(s)), ("target", json!(t))]))
                        .collect()
                })
                .unwrap_or_default());
        }

        Err(RunnerError::Query(format!("unsupported query: {}", query)))
    }
}

#[async_trait::async_trait]
impl GraphQueryRunner for FakeGraph {
    async fn run(
        &self,
        _identity: &DatabaseIdentity,
        query: &str,
        params: Value,
    ) -> Result<Vec<Row>, RunnerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.contains("db.labels()") {
            self.discovery_runs.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(error) = self.injected_failure(query) {
            return Err(error);
        }
        self.answer(query, &params)
    }
}

/// The User/Product/Order shop graph
pub fn shop_graph() -> FakeGraph {
    FakeGraph::new()
        .with_label(
            "User",
            120,
            vec![
                json!({"name": "Alice", "age": 31}),
                json!({"name": "Bob", "age": 40}),
                json!({"name": "Cara", "age": 25}),
                json!({"name": "Dan", "age": 52}),
            ],
        )
        .with_label(
            "Product",
            40,
            vec![
                json!({"title": "Desk lamp", "price": 19.5}),
                json!({"title": "Notebook", "price": 3.25}),
            ],
        )
        .with_label(
            "Order",
            95,
            vec![json!({"id": 1001, "status": "shipped"}), json!({"id": 1002, "status": "open"})],
        )
        .with_relationship("BOUGHT", 80, &[("User", "Product")])
        .with_relationship("REVIEWS", 30, &[("User", "Product")])
}

/// Enrichment capability returning a scripted result
pub struct FakeEnricher {
    result: Result<String, EnrichmentError>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeEnricher {
    pub fn replying(text: &str) -> Self {
        Self {
            result: Ok(text.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: EnrichmentError) -> Self {
        Self {
            result: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl SemanticEnricher for FakeEnricher {
    async fn summarize_facts(&self, _facts_text: &str) -> Result<String, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}
