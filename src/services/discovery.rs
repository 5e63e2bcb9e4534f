// Discovery Prober
//
// Issues structural introspection queries (labels, relationship types,
// counts, property samples, endpoint patterns) and returns raw facts.
// Every query is retried independently; a query that keeps failing degrades
// its section to unknown instead of failing the whole discovery.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DiscoveryError, RunnerError};
use crate::models::{
    DatabaseIdentity, EndpointPair, FactSection, LabelFacts, PropertyFacts, PropertySample,
    RawSchemaFacts, RelationshipFacts,
};
use crate::services::graph::{quote_identifier, GraphQueryRunner, Row};

const LABELS_QUERY: &str = "CALL db.labels() YIELD label RETURN label ORDER BY label LIMIT $limit";
const LABELS_FALLBACK_QUERY: &str =
    "MATCH (n) UNWIND labels(n) AS label RETURN DISTINCT label ORDER BY label LIMIT $limit";
const REL_TYPES_QUERY: &str = "CALL db.relationshipTypes() YIELD relationshipType \
     RETURN relationshipType ORDER BY relationshipType LIMIT $limit";
const REL_TYPES_FALLBACK_QUERY: &str = "MATCH ()-[r]->() RETURN DISTINCT type(r) AS relationshipType \
     ORDER BY relationshipType LIMIT $limit";

/// Longest sampled value kept, in characters
const MAX_SAMPLE_VALUE_CHARS: usize = 50;

/// Bounded exponential backoff for a single structural query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Timeout of each individual attempt
    pub query_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Caps that keep discovery cost independent of database size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryLimits {
    pub max_labels: usize,
    pub max_relationship_types: usize,
    /// Nodes sampled per label for property names and values
    pub sample_nodes: usize,
    pub values_per_property: usize,
    /// Distinct (source, target) pairs sampled per relationship type
    pub endpoint_pairs: usize,
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            max_labels: 100,
            max_relationship_types: 100,
            sample_nodes: 5,
            values_per_property: 3,
            endpoint_pairs: 5,
        }
    }
}

/// Structural schema prober for a graph database
pub struct SchemaProber {
    runner: Arc<dyn GraphQueryRunner>,
    retry: RetryPolicy,
    limits: DiscoveryLimits,
}

impl SchemaProber {
    pub fn new(
        runner: Arc<dyn GraphQueryRunner>,
        retry: RetryPolicy,
        limits: DiscoveryLimits,
    ) -> Self {
        Self { runner, retry, limits }
    }

    /// Discover the structural schema of a database
    ///
    /// Fails with `Connection` when the database cannot be reached at all and
    /// with `Unavailable` when neither labels nor relationship types could be
    /// listed. Any other failure is recorded in `RawSchemaFacts::incomplete`.
    pub async fn discover(
        &self,
        identity: &DatabaseIdentity,
    ) -> Result<RawSchemaFacts, DiscoveryError> {
        tracing::info!("Discovering schema for {}", identity);
        let mut facts = RawSchemaFacts::default();
        let mut calls = 0u32;

        let label_names = match self
            .list_names(
                identity,
                LABELS_QUERY,
                LABELS_FALLBACK_QUERY,
                "label",
                self.limits.max_labels,
                &mut calls,
            )
            .await
        {
            Ok(names) => names,
            Err(RunnerError::Connection(msg)) => {
                tracing::error!("Database {} unreachable: {}", identity, msg);
                return Err(DiscoveryError::Connection(msg));
            }
            Err(e) => {
                tracing::warn!("Could not list labels for {}: {}", identity, e);
                facts.mark_incomplete(FactSection::Labels);
                Vec::new()
            }
        };

        for name in label_names {
            let label = self.probe_label(identity, name, &mut facts, &mut calls).await;
            facts.labels.push(label);
        }

        let rel_types = match self
            .list_names(
                identity,
                REL_TYPES_QUERY,
                REL_TYPES_FALLBACK_QUERY,
                "relationshipType",
                self.limits.max_relationship_types,
                &mut calls,
            )
            .await
        {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Could not list relationship types for {}: {}", identity, e);
                facts.mark_incomplete(FactSection::RelationshipTypes);
                Vec::new()
            }
        };

        for rel_type in rel_types {
            let rel = self.probe_relationship(identity, rel_type, &mut facts, &mut calls).await;
            facts.relationships.push(rel);
        }

        facts.queries_issued = calls;

        if !facts.is_usable() {
            return Err(DiscoveryError::Unavailable(format!(
                "neither labels nor relationship types of {} could be listed",
                identity
            )));
        }

        if facts.is_partial() {
            tracing::warn!(
                "Partial discovery for {}: incomplete sections {:?}",
                identity,
                facts.incomplete
            );
        }
        tracing::info!(
            "Discovered {} labels and {} relationship types for {} ({} queries)",
            facts.labels.len(),
            facts.relationships.len(),
            identity,
            calls
        );

        Ok(facts)
    }

    /// List names with a procedure query, falling back to a pattern query
    /// when the procedure itself is rejected
    async fn list_names(
        &self,
        identity: &DatabaseIdentity,
        query: &str,
        fallback: &str,
        column: &str,
        limit: usize,
        calls: &mut u32,
    ) -> Result<Vec<String>, RunnerError> {
        let params = json!({ "limit": limit });
        let rows = match self.run_with_retry(identity, query, params.clone(), calls).await {
            Ok(rows) => rows,
            Err(RunnerError::Query(msg)) => {
                tracing::debug!("Procedure query rejected ({}), using fallback", msg);
                self.run_with_retry(identity, fallback, params, calls).await?
            }
            Err(e) => return Err(e),
        };

        Ok(rows
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::as_str))
            .map(String::from)
            .collect())
    }

    async fn probe_label(
        &self,
        identity: &DatabaseIdentity,
        name: String,
        facts: &mut RawSchemaFacts,
        calls: &mut u32,
    ) -> LabelFacts {
        let quoted = quote_identifier(&name);

        let count_query = format!("MATCH (n:{}) RETURN count(n) AS count", quoted);
        let approx_count = match self
            .run_with_retry(identity, &count_query, json!({}), calls)
            .await
        {
            Ok(rows) => read_count(&rows),
            Err(e) => {
                tracing::warn!("Count of label {} unavailable: {}", name, e);
                None
            }
        };
        if approx_count.is_none() {
            facts.mark_incomplete(FactSection::LabelCounts);
        }

        let sample_query = format!(
            "MATCH (n:{}) WITH n LIMIT $limit RETURN properties(n) AS props",
            quoted
        );
        let params = json!({ "limit": self.limits.sample_nodes });
        let (properties, samples) = match self
            .run_with_retry(identity, &sample_query, params, calls)
            .await
        {
            Ok(rows) => summarize_properties(&rows, self.limits.values_per_property),
            Err(e) => {
                tracing::warn!("Property sample of label {} unavailable: {}", name, e);
                facts.mark_incomplete(FactSection::Properties);
                (Vec::new(), Vec::new())
            }
        };

        LabelFacts {
            name,
            approx_count,
            properties,
            samples,
        }
    }

    async fn probe_relationship(
        &self,
        identity: &DatabaseIdentity,
        rel_type: String,
        facts: &mut RawSchemaFacts,
        calls: &mut u32,
    ) -> RelationshipFacts {
        let quoted = quote_identifier(&rel_type);

        let count_query = format!("MATCH ()-[r:{}]->() RETURN count(r) AS count", quoted);
        let approx_count = match self
            .run_with_retry(identity, &count_query, json!({}), calls)
            .await
        {
            Ok(rows) => read_count(&rows),
            Err(e) => {
                tracing::warn!("Count of relationship {} unavailable: {}", rel_type, e);
                None
            }
        };
        if approx_count.is_none() {
            facts.mark_incomplete(FactSection::RelationshipCounts);
        }

        let endpoint_query = format!(
            "MATCH (a)-[r:{}]->(b) WITH a, b LIMIT $limit \
             RETURN DISTINCT labels(a)[0] AS source, labels(b)[0] AS target",
            quoted
        );
        let params = json!({ "limit": self.limits.endpoint_pairs });
        let endpoints = match self.run_with_retry(identity, &endpoint_query, params, calls).await {
            Ok(rows) => rows
                .iter()
                .map(|row| EndpointPair {
                    source: label_or_node(row.get("source")),
                    target: label_or_node(row.get("target")),
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Endpoints of relationship {} unavailable: {}", rel_type, e);
                facts.mark_incomplete(FactSection::RelationshipEndpoints);
                Vec::new()
            }
        };

        RelationshipFacts {
            rel_type,
            approx_count,
            endpoints,
        }
    }

    /// Run one query with a per-attempt timeout and bounded exponential backoff
    async fn run_with_retry(
        &self,
        identity: &DatabaseIdentity,
        query: &str,
        params: Value,
        calls: &mut u32,
    ) -> Result<Vec<Row>, RunnerError> {
        let mut attempt = 0u32;
        loop {
            *calls += 1;
            let outcome = tokio::time::timeout(
                self.retry.query_timeout,
                self.runner.run(identity, query, params.clone()),
            )
            .await
            .unwrap_or_else(|_| {
                Err(RunnerError::Timeout(
                    self.retry.query_timeout.as_millis() as u64,
                ))
            });

            match outcome {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(
                        "Structural query failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt + 1,
                        self.retry.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn read_count(rows: &[Row]) -> Option<u64> {
    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(Value::as_u64)
}

fn label_or_node(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or("Node")
        .to_string()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_f64() => "Float",
        Value::Number(_) => "Integer",
        Value::String(_) => "String",
        Value::Array(_) => "List",
        Value::Object(_) => "Map",
    }
}

fn sample_text(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(MAX_SAMPLE_VALUE_CHARS).collect()
}

/// Derive property names, observed types and distinct sample values from
/// sampled `properties(n)` rows
fn summarize_properties(
    rows: &[Row],
    values_per_property: usize,
) -> (Vec<PropertyFacts>, Vec<PropertySample>) {
    let mut seen: BTreeMap<String, (Vec<String>, Vec<String>)> = BTreeMap::new();

    for row in rows {
        let Some(Value::Object(props)) = row.get("props") else {
            continue;
        };
        for (key, value) in props {
            let (types, values) = seen.entry(key.clone()).or_default();
            let type_name = json_type_name(value).to_string();
            if !types.contains(&type_name) {
                types.push(type_name);
            }
            let text = sample_text(value);
            if values.len() < values_per_property && !value.is_null() && !values.contains(&text) {
                values.push(text);
            }
        }
    }

    let mut properties = Vec::with_capacity(seen.len());
    let mut samples = Vec::new();
    for (name, (mut types, values)) in seen {
        types.sort();
        if !values.is_empty() {
            samples.push(PropertySample {
                property: name.clone(),
                values,
            });
        }
        properties.push(PropertyFacts { name, types });
    }
    (properties, samples)
}
