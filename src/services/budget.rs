// Context Window Budgeter
//
// Reduces a rendered schema description to a caller-imposed size. Records
// are kept or dropped whole; the summary is the only text ever cut.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::models::{
    block_size, question_line, SchemaDescription, INCOMPLETE_HEADER, LABELS_HEADER,
    QUESTIONS_HEADER, RELATIONSHIPS_HEADER, SAMPLES_HEADER, SUMMARY_HEADER, TRUNCATION_MARKER,
};

/// Unit in which budgets are expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMetric {
    /// UTF-8 length of the rendered text
    Bytes,
    /// Rough model token estimate, one token per four bytes
    #[default]
    ApproxTokens,
}

impl SizeMetric {
    pub fn measure(&self, text: &str) -> usize {
        self.measure_bytes(text.len())
    }

    fn measure_bytes(&self, bytes: usize) -> usize {
        match self {
            SizeMetric::Bytes => bytes,
            SizeMetric::ApproxTokens => bytes.div_ceil(4),
        }
    }

    /// Largest byte length whose measure stays within `max_size`
    fn byte_limit(&self, max_size: usize) -> usize {
        match self {
            SizeMetric::Bytes => max_size,
            SizeMetric::ApproxTokens => max_size.saturating_mul(4),
        }
    }
}

/// A description reduced to fit a size limit, with what was left out
#[derive(Debug, Clone, Serialize)]
pub struct BudgetedDescription {
    pub description: SchemaDescription,
    pub text: String,
    pub size: usize,
    pub max_size: usize,
    pub metric: SizeMetric,
    pub truncated: bool,
    pub summary_truncated: bool,
    pub labels_dropped: usize,
    pub relationships_dropped: usize,
    pub questions_dropped: usize,
    pub sample_blocks_dropped: usize,
}

impl BudgetedDescription {
    pub fn is_partial(&self) -> bool {
        self.description.is_partial()
    }
}

pub struct ContextBudgeter {
    metric: SizeMetric,
}

impl ContextBudgeter {
    pub fn new(metric: SizeMetric) -> Self {
        Self { metric }
    }

    pub fn measure(&self, text: &str) -> usize {
        self.metric.measure(text)
    }

    /// Title and incompleteness notice, always present
    fn fixed_bytes(description: &SchemaDescription) -> usize {
        let incomplete: Vec<String> = description
            .incomplete_sections
            .iter()
            .map(|s| format!("- {}", s))
            .collect();
        let notice = if incomplete.is_empty() {
            0
        } else {
            block_size(INCOMPLETE_HEADER, &incomplete)
        };
        block_size(&description.title_line(), &[]) + notice
    }

    fn marker_block_bytes() -> usize {
        block_size(SUMMARY_HEADER, &[TRUNCATION_MARKER.to_string()])
    }

    /// Smallest budget `fit` accepts for this description
    ///
    /// That is the skeleton: title, the summary reduced to the truncation
    /// marker, and the list of incomplete sections.
    pub fn minimum_size(&self, description: &SchemaDescription) -> usize {
        let mut bytes = Self::fixed_bytes(description);
        if description.summary.is_some() {
            bytes += Self::marker_block_bytes();
        }
        self.metric.measure_bytes(bytes)
    }

    /// Reduce `description` so its rendered size is at most `max_size`
    pub fn fit(
        &self,
        description: &SchemaDescription,
        max_size: usize,
    ) -> Result<BudgetedDescription, SchemaError> {
        let full = description.render();
        let full_size = self.measure(&full);
        if full_size <= max_size {
            return Ok(BudgetedDescription {
                description: description.clone(),
                text: full,
                size: full_size,
                max_size,
                metric: self.metric,
                truncated: false,
                summary_truncated: false,
                labels_dropped: 0,
                relationships_dropped: 0,
                questions_dropped: 0,
                sample_blocks_dropped: 0,
            });
        }

        let minimum = self.minimum_size(description);
        if max_size < minimum {
            return Err(SchemaError::BudgetTooSmall {
                requested: max_size,
                minimum,
            });
        }

        let limit = self.metric.byte_limit(max_size);
        let mut remaining = limit.saturating_sub(Self::fixed_bytes(description));
        let mut reduced = description.clone();

        let mut summary_truncated = false;
        if let Some(summary) = &description.summary {
            let allowance = (remaining / 2).max(Self::marker_block_bytes());
            let line = if block_size(SUMMARY_HEADER, &[summary.clone()]) <= allowance {
                summary.clone()
            } else {
                summary_truncated = true;
                truncate_summary(summary, allowance - (SUMMARY_HEADER.len() + 3))
            };
            remaining -= block_size(SUMMARY_HEADER, &[line.clone()]);
            reduced.summary = Some(line);
        }

        let (labels, labels_dropped) = take_records(
            &description.labels,
            LABELS_HEADER,
            |l| l.render_line(),
            &mut remaining,
        );
        let (relationships, relationships_dropped) = take_records(
            &description.relationships,
            RELATIONSHIPS_HEADER,
            |r| r.render_line(),
            &mut remaining,
        );
        let (questions, questions_dropped) = take_records(
            &description.suggested_questions,
            QUESTIONS_HEADER,
            |q| question_line(q),
            &mut remaining,
        );
        let (samples, sample_blocks_dropped) =
            take_records(&description.samples, SAMPLES_HEADER, |s| s.render_line(), &mut remaining);

        reduced.labels = labels;
        reduced.relationships = relationships;
        reduced.suggested_questions = questions;
        reduced.samples = samples;

        let text = reduced.render();
        let size = self.measure(&text);
        tracing::debug!(
            "Budgeted schema for {} from {} to {} (limit {}); dropped {} labels, {} relationships, {} sample blocks",
            description.identity,
            full_size,
            size,
            max_size,
            labels_dropped,
            relationships_dropped,
            sample_blocks_dropped
        );

        Ok(BudgetedDescription {
            description: reduced,
            text,
            size,
            max_size,
            metric: self.metric,
            truncated: true,
            summary_truncated,
            labels_dropped,
            relationships_dropped,
            questions_dropped,
            sample_blocks_dropped,
        })
    }
}

/// Shorten a summary to at most `max_bytes`, ending with the marker
fn truncate_summary(summary: &str, max_bytes: usize) -> String {
    // Room for the prefix plus the separating space
    let room = max_bytes.saturating_sub(TRUNCATION_MARKER.len() + 1);
    let mut cut = room.min(summary.len());
    while !summary.is_char_boundary(cut) {
        cut -= 1;
    }
    let prefix = summary[..cut].trim_end();
    if prefix.is_empty() {
        TRUNCATION_MARKER.to_string()
    } else {
        format!("{} {}", prefix, TRUNCATION_MARKER)
    }
}

/// Keep records in order while they fit; the section header is paid for by
/// the first kept record
fn take_records<T: Clone>(
    items: &[T],
    header: &str,
    render: impl Fn(&T) -> String,
    remaining: &mut usize,
) -> (Vec<T>, usize) {
    let mut kept = Vec::new();
    let mut dropped = 0;
    for item in items {
        let line_bytes = render(item).len() + 1;
        let cost = if kept.is_empty() {
            block_size(header, &[]) + line_bytes
        } else {
            line_bytes
        };
        if cost <= *remaining {
            *remaining -= cost;
            kept.push(item.clone());
        } else {
            dropped += 1;
        }
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DatabaseIdentity, EndpointPair, EnrichmentStatus, FactSection, LabelEntry, PropertyEntry,
        PropertySample, RelationshipEntry, SampleBlock,
    };
    use chrono::{TimeZone, Utc};

    fn label(name: &str, count: u64) -> LabelEntry {
        LabelEntry {
            name: name.to_string(),
            approx_count: Some(count),
            properties: vec![PropertyEntry {
                name: "name".to_string(),
                types: vec!["String".to_string()],
            }],
        }
    }

    fn relationship(rel_type: &str, count: u64) -> RelationshipEntry {
        RelationshipEntry {
            rel_type: rel_type.to_string(),
            approx_count: Some(count),
            endpoints: vec![EndpointPair {
                source: "User".to_string(),
                target: "Product".to_string(),
            }],
        }
    }

    fn sample(label: &str) -> SampleBlock {
        SampleBlock {
            label: label.to_string(),
            properties: vec![PropertySample {
                property: "name".to_string(),
                values: vec![
                    format!("{} sample value one", label),
                    format!("{} sample value two", label),
                    format!("{} sample value three", label),
                ],
            }],
        }
    }

    fn shop_description() -> SchemaDescription {
        SchemaDescription {
            identity: DatabaseIdentity::new("http://localhost:7474", "shop"),
            summary: None,
            labels: vec![label("Order", 95), label("Product", 40), label("User", 120)],
            relationships: vec![relationship("BOUGHT", 80), relationship("REVIEWS", 30)],
            samples: vec![sample("Order"), sample("Product"), sample("User")],
            suggested_questions: vec![],
            incomplete_sections: vec![],
            enrichment: EnrichmentStatus::NotRequested,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            discovery_calls: 13,
        }
    }

    fn enriched_description() -> SchemaDescription {
        let mut description = shop_description();
        description.summary = Some(
            "An online shop where users buy and review products; orders group purchases. "
                .repeat(8)
                .trim_end()
                .to_string(),
        );
        description.suggested_questions = vec![
            "Which users bought the most products?".to_string(),
            "Which products have the most reviews?".to_string(),
        ];
        description.incomplete_sections = vec![FactSection::RelationshipEndpoints];
        description
    }

    fn record_lines(description: &SchemaDescription) -> Vec<String> {
        let mut lines: Vec<String> = description.labels.iter().map(|l| l.render_line()).collect();
        lines.extend(description.relationships.iter().map(|r| r.render_line()));
        lines.extend(description.suggested_questions.iter().map(|q| question_line(q)));
        lines.extend(description.samples.iter().map(|s| s.render_line()));
        lines.extend(description.incomplete_sections.iter().map(|s| format!("- {}", s)));
        lines
    }

    #[test]
    fn test_fits_unchanged() {
        let budgeter = ContextBudgeter::new(SizeMetric::Bytes);
        let description = shop_description();
        let full = description.render();

        let budgeted = budgeter.fit(&description, full.len()).unwrap();
        assert!(!budgeted.truncated);
        assert_eq!(budgeted.text, full);
        assert_eq!(budgeted.description, description);
    }

    #[test]
    fn test_small_budget_drops_samples_first() {
        let budgeter = ContextBudgeter::new(SizeMetric::Bytes);
        let description = shop_description();
        let mut without_samples = description.clone();
        without_samples.samples.clear();

        let budgeted = budgeter
            .fit(&description, without_samples.render().len())
            .unwrap();

        assert!(budgeted.truncated);
        assert_eq!(budgeted.sample_blocks_dropped, 3);
        assert_eq!(budgeted.labels_dropped, 0);
        assert_eq!(budgeted.relationships_dropped, 0);
        for fact in ["User (~120 nodes)", "Product (~40 nodes)", "Order (~95 nodes)"] {
            assert!(budgeted.text.contains(fact), "missing {fact}");
        }
        assert!(!budgeted.text.contains(SAMPLES_HEADER));
    }

    #[test]
    fn test_very_small_budget_keeps_label_counts() {
        let budgeter = ContextBudgeter::new(SizeMetric::Bytes);
        let description = shop_description();
        let labels: Vec<String> = description.labels.iter().map(|l| l.render_line()).collect();
        let budget =
            block_size(&description.title_line(), &[]) + block_size(LABELS_HEADER, &labels);

        let budgeted = budgeter.fit(&description, budget).unwrap();
        assert_eq!(budgeted.description.labels.len(), 3);
        assert_eq!(budgeted.relationships_dropped, 2);
        assert_eq!(budgeted.sample_blocks_dropped, 3);
        assert!(budgeted.size <= budget);
    }

    #[test]
    fn test_size_within_budget_and_records_whole() {
        for metric in [SizeMetric::Bytes, SizeMetric::ApproxTokens] {
            let budgeter = ContextBudgeter::new(metric);
            let description = enriched_description();
            let allowed = record_lines(&description);
            let minimum = budgeter.minimum_size(&description);
            let full = budgeter.measure(&description.render());

            for max_size in minimum..=full + 4 {
                let budgeted = budgeter.fit(&description, max_size).unwrap();
                assert!(
                    budgeted.size <= max_size,
                    "{} > {} ({:?})",
                    budgeted.size,
                    max_size,
                    metric
                );
                assert_eq!(budgeted.size, budgeter.measure(&budgeted.text));
                for line in budgeted.text.lines().filter(|l| l.starts_with("- ")) {
                    assert!(allowed.contains(&line.to_string()), "split record: {line}");
                }
                assert!(budgeted.text.contains("- relationship endpoints"));
            }
        }
    }

    #[test]
    fn test_summary_truncated_with_marker() {
        let budgeter = ContextBudgeter::new(SizeMetric::Bytes);
        let description = enriched_description();
        let minimum = budgeter.minimum_size(&description);

        let budgeted = budgeter.fit(&description, minimum + 120).unwrap();
        assert!(budgeted.summary_truncated);
        let summary = budgeted.description.summary.clone().unwrap();
        assert!(summary.ends_with(TRUNCATION_MARKER));
        assert!(summary.len() < description.summary.clone().unwrap().len());
        assert!(budgeted.size <= minimum + 120);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "Graphe de données: clients → commandes → produits";
        for max in 0..text.len() + 20 {
            let cut = truncate_summary(text, max);
            assert!(cut.ends_with(TRUNCATION_MARKER));
        }
        assert_eq!(truncate_summary(text, 5), TRUNCATION_MARKER);
    }

    #[test]
    fn test_budget_too_small() {
        let budgeter = ContextBudgeter::new(SizeMetric::Bytes);
        let description = enriched_description();
        let minimum = budgeter.minimum_size(&description);

        let result = budgeter.fit(&description, minimum - 1);
        assert_eq!(
            result.unwrap_err(),
            SchemaError::BudgetTooSmall {
                requested: minimum - 1,
                minimum
            }
        );
        assert!(budgeter.fit(&description, minimum).is_ok());
    }

    #[test]
    fn test_token_metric() {
        assert_eq!(SizeMetric::ApproxTokens.measure(""), 0);
        assert_eq!(SizeMetric::ApproxTokens.measure("abcd"), 1);
        assert_eq!(SizeMetric::ApproxTokens.measure("abcde"), 2);
        assert_eq!(SizeMetric::Bytes.measure("é"), 2);
        let metric: SizeMetric = serde_json::from_str("\"approx_tokens\"").unwrap();
        assert_eq!(metric, SizeMetric::ApproxTokens);
    }
}
