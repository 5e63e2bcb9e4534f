// Schema Summarizer
//
// Turns raw discovery facts into a SchemaDescription. The structural
// inventory is built deterministically; semantic enrichment is optional and
// best-effort.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::EnrichmentError;
use crate::models::{
    DatabaseIdentity, EnrichmentStatus, LabelEntry, PropertyEntry, PropertySample, RawSchemaFacts,
    RelationshipEntry, SampleBlock, SchemaDescription,
};

/// Suggested questions kept from an enrichment reply
const MAX_SUGGESTED_QUESTIONS: usize = 3;

/// External capability producing natural-language commentary on a schema
#[async_trait::async_trait]
pub trait SemanticEnricher: Send + Sync {
    /// Describe the schema given as text; expected to answer with a
    /// `SUMMARY:` paragraph followed by `QUESTIONS:` lines
    async fn summarize_facts(&self, facts_text: &str) -> Result<String, EnrichmentError>;
}

pub struct SchemaSummarizer {
    clock: Arc<dyn Clock>,
    enrichment_timeout: Duration,
}

impl SchemaSummarizer {
    pub fn new(clock: Arc<dyn Clock>, enrichment_timeout: Duration) -> Self {
        Self {
            clock,
            enrichment_timeout,
        }
    }

    /// Build the structural inventory only
    ///
    /// Output depends on `facts` and the clock alone, so the same facts at
    /// the same instant serialize to the same bytes.
    pub fn build_inventory(
        &self,
        identity: &DatabaseIdentity,
        facts: &RawSchemaFacts,
    ) -> SchemaDescription {
        let mut labels: Vec<LabelEntry> = facts
            .labels
            .iter()
            .map(|label| {
                let mut properties: Vec<PropertyEntry> = label
                    .properties
                    .iter()
                    .map(|p| PropertyEntry {
                        name: p.name.clone(),
                        types: sorted_unique(&p.types),
                    })
                    .collect();
                properties.sort_by(|a, b| a.name.cmp(&b.name));
                LabelEntry {
                    name: label.name.clone(),
                    approx_count: label.approx_count,
                    properties,
                }
            })
            .collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));

        let mut relationships: Vec<RelationshipEntry> = facts
            .relationships
            .iter()
            .map(|rel| RelationshipEntry {
                rel_type: rel.rel_type.clone(),
                approx_count: rel.approx_count,
                endpoints: sorted_unique(&rel.endpoints),
            })
            .collect();
        relationships.sort_by(|a, b| a.rel_type.cmp(&b.rel_type));

        let mut samples: Vec<SampleBlock> = facts
            .labels
            .iter()
            .filter(|label| !label.samples.is_empty())
            .map(|label| {
                let mut properties: Vec<PropertySample> = label.samples.clone();
                properties.sort_by(|a, b| a.property.cmp(&b.property));
                SampleBlock {
                    label: label.name.clone(),
                    properties,
                }
            })
            .collect();
        samples.sort_by(|a, b| a.label.cmp(&b.label));

        let mut incomplete_sections = facts.incomplete.clone();
        incomplete_sections.sort();
        incomplete_sections.dedup();

        SchemaDescription {
            identity: identity.clone(),
            summary: None,
            labels,
            relationships,
            samples,
            suggested_questions: Vec::new(),
            incomplete_sections,
            enrichment: EnrichmentStatus::NotRequested,
            created_at: self.clock.now(),
            discovery_calls: facts.queries_issued,
        }
    }

    /// Produce a description, enriched when a capability is supplied
    ///
    /// Enrichment failure is never fatal: the structural inventory is
    /// returned with `EnrichmentStatus::Failed`.
    pub async fn summarize(
        &self,
        identity: &DatabaseIdentity,
        facts: &RawSchemaFacts,
        enricher: Option<&dyn SemanticEnricher>,
    ) -> SchemaDescription {
        let mut description = self.build_inventory(identity, facts);
        let Some(enricher) = enricher else {
            return description;
        };

        let facts_text = description.render();
        let timeout_ms = self.enrichment_timeout.as_millis() as u64;
        let reply = tokio::time::timeout(
            self.enrichment_timeout,
            enricher.summarize_facts(&facts_text),
        )
        .await
        .unwrap_or_else(|_| Err(EnrichmentError::Timeout(timeout_ms)));

        match reply {
            Ok(text) => {
                let (summary, questions) = parse_enrichment(&text);
                if summary.is_none() && questions.is_empty() {
                    tracing::warn!("Enrichment for {} returned no usable text", identity);
                    description.enrichment = EnrichmentStatus::Failed {
                        reason: "empty enrichment output".to_string(),
                    };
                } else {
                    description.summary = summary;
                    description.suggested_questions = questions;
                    description.enrichment = EnrichmentStatus::Applied;
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Enrichment for {} failed, using structural description only: {}",
                    identity,
                    e
                );
                description.enrichment = EnrichmentStatus::Failed { reason: e.to_string() };
            }
        }

        description
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ReplySection {
    Summary,
    Questions,
}

fn sorted_unique<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    items.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
}

fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.get(..marker.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(marker))
        .map(|_| line[marker.len()..].trim())
}

/// Strip bullets and list numbering from a question line
fn clean_question(line: &str) -> &str {
    let mut question = line
        .trim()
        .trim_start_matches(['-', '*', '•'])
        .trim_start();
    let digits = question.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &question[digits..];
        if rest.starts_with('.') || rest.starts_with(')') {
            question = rest[1..].trim_start();
        }
    }
    question.trim()
}

/// Split an enrichment reply into a summary paragraph and suggested questions
///
/// Without `SUMMARY:`/`QUESTIONS:` markers the whole reply is the summary.
pub fn parse_enrichment(text: &str) -> (Option<String>, Vec<String>) {
    let mut section = ReplySection::Summary;
    let mut summary_parts: Vec<&str> = Vec::new();
    let mut questions: Vec<String> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_marker(trimmed, "SUMMARY:") {
            section = ReplySection::Summary;
            if !rest.is_empty() {
                summary_parts.push(rest);
            }
            continue;
        }
        if let Some(rest) = strip_marker(trimmed, "QUESTIONS:") {
            section = ReplySection::Questions;
            if !rest.is_empty() {
                questions.push(clean_question(rest).to_string());
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        match section {
            ReplySection::Summary => summary_parts.push(trimmed),
            ReplySection::Questions => {
                let question = clean_question(trimmed);
                if !question.is_empty() {
                    questions.push(question.to_string());
                }
            }
        }
    }

    questions.truncate(MAX_SUGGESTED_QUESTIONS);
    let summary = summary_parts.join(" ");
    let summary = if summary.is_empty() { None } else { Some(summary) };
    (summary, questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{EndpointPair, FactSection, LabelFacts, PropertyFacts, RelationshipFacts};
    use crate::services::test_support::FakeEnricher;
    use std::sync::atomic::Ordering;

    fn shop_facts() -> RawSchemaFacts {
        let label = |name: &str, count: u64| LabelFacts {
            name: name.to_string(),
            approx_count: Some(count),
            properties: vec![PropertyFacts {
                name: "name".to_string(),
                types: vec!["String".to_string()],
            }],
            samples: vec![PropertySample {
                property: "name".to_string(),
                values: vec![format!("{}-1", name), format!("{}-2", name)],
            }],
        };
        let rel = |rel_type: &str, count: u64| RelationshipFacts {
            rel_type: rel_type.to_string(),
            approx_count: Some(count),
            endpoints: vec![
                EndpointPair {
                    source: "User".to_string(),
                    target: "Product".to_string(),
                },
                EndpointPair {
                    source: "User".to_string(),
                    target: "Product".to_string(),
                },
            ],
        };
        RawSchemaFacts {
            labels: vec![label("User", 120), label("Product", 40), label("Order", 95)],
            relationships: vec![rel("REVIEWS", 30), rel("BOUGHT", 80)],
            incomplete: vec![],
            queries_issued: 13,
        }
    }

    fn summarizer() -> SchemaSummarizer {
        SchemaSummarizer::new(Arc::new(ManualClock::fixed()), Duration::from_millis(100))
    }

    fn identity() -> DatabaseIdentity {
        DatabaseIdentity::new("http://localhost:7474", "shop")
    }

    #[tokio::test]
    async fn test_structural_description_lists_exact_facts() {
        let description = summarizer().summarize(&identity(), &shop_facts(), None).await;

        let labels: Vec<(&str, Option<u64>)> = description
            .labels
            .iter()
            .map(|l| (l.name.as_str(), l.approx_count))
            .collect();
        assert_eq!(
            labels,
            vec![("Order", Some(95)), ("Product", Some(40)), ("User", Some(120))]
        );
        let rels: Vec<(&str, Option<u64>)> = description
            .relationships
            .iter()
            .map(|r| (r.rel_type.as_str(), r.approx_count))
            .collect();
        assert_eq!(rels, vec![("BOUGHT", Some(80)), ("REVIEWS", Some(30))]);
        assert_eq!(description.relationships[0].endpoints.len(), 1);
        assert_eq!(description.enrichment, EnrichmentStatus::NotRequested);
        assert_eq!(description.discovery_calls, 13);

        let text = description.render();
        for fact in [
            "- User (~120 nodes)",
            "- Product (~40 nodes)",
            "- Order (~95 nodes)",
            "- BOUGHT (~80 relationships)",
            "- REVIEWS (~30 relationships)",
        ] {
            assert!(text.contains(fact), "missing {fact}");
        }
    }

    #[tokio::test]
    async fn test_reproducible_without_enrichment() {
        let summarizer = summarizer();
        let first = summarizer.summarize(&identity(), &shop_facts(), None).await;
        let second = summarizer.summarize(&identity(), &shop_facts(), None).await;

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.render(), second.render());
    }

    #[tokio::test]
    async fn test_enrichment_applied() {
        let enricher = FakeEnricher::replying(
            "SUMMARY: An e-commerce graph of users buying products.\n\
             QUESTIONS:\n\
             1. Who bought the most products?\n\
             - Which products get the most reviews?\n\
             3) How many orders are there?\n\
             4. One question too many?",
        );
        let description = summarizer()
            .summarize(&identity(), &shop_facts(), Some(&enricher))
            .await;

        assert_eq!(description.enrichment, EnrichmentStatus::Applied);
        assert_eq!(
            description.summary.as_deref(),
            Some("An e-commerce graph of users buying products.")
        );
        assert_eq!(
            description.suggested_questions,
            vec![
                "Who bought the most products?",
                "Which products get the most reviews?",
                "How many orders are there?",
            ]
        );
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_enrichment_degrades() {
        let enricher = FakeEnricher::failing(EnrichmentError::RateLimited {
            retry_after_secs: Some(60),
        });
        let description = summarizer()
            .summarize(&identity(), &shop_facts(), Some(&enricher))
            .await;

        assert!(matches!(description.enrichment, EnrichmentStatus::Failed { .. }));
        assert!(description.summary.is_none());
        assert!(description.suggested_questions.is_empty());
        assert_eq!(description.labels.len(), 3);
    }

    #[tokio::test]
    async fn test_slow_enrichment_times_out() {
        let enricher = FakeEnricher::replying("SUMMARY: late").with_delay(Duration::from_secs(5));
        let description = summarizer()
            .summarize(&identity(), &shop_facts(), Some(&enricher))
            .await;

        assert!(matches!(description.enrichment, EnrichmentStatus::Failed { .. }));
        assert!(description.summary.is_none());
    }

    #[test]
    fn test_partial_facts_are_flagged() {
        let mut facts = shop_facts();
        facts.mark_incomplete(FactSection::LabelCounts);
        let description = summarizer().build_inventory(&identity(), &facts);
        assert!(description.is_partial());
        assert!(description.render().contains("- label counts"));
    }

    #[test]
    fn test_parse_enrichment_without_markers() {
        let (summary, questions) = parse_enrichment("  A movie database.\nActors act in movies.  ");
        assert_eq!(summary.as_deref(), Some("A movie database. Actors act in movies."));
        assert!(questions.is_empty());

        let (summary, questions) = parse_enrichment("   ");
        assert!(summary.is_none());
        assert!(questions.is_empty());
    }
}
