use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::DatabaseIdentity;

/// Marker appended to a summary that had to be shortened
pub const TRUNCATION_MARKER: &str = "…truncated";

/// Structural section of a discovery run
///
/// A section listed as incomplete could not be retrieved (the query failed
/// after retries) and its facts are unknown rather than empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSection {
    Labels,
    LabelCounts,
    Properties,
    RelationshipTypes,
    RelationshipCounts,
    RelationshipEndpoints,
}

impl fmt::Display for FactSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FactSection::Labels => "node labels",
            FactSection::LabelCounts => "label counts",
            FactSection::Properties => "property samples",
            FactSection::RelationshipTypes => "relationship types",
            FactSection::RelationshipCounts => "relationship counts",
            FactSection::RelationshipEndpoints => "relationship endpoints",
        };
        f.write_str(name)
    }
}

/// Property observed on sampled nodes, with the value types seen for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyFacts {
    pub name: String,
    pub types: Vec<String>,
}

/// Distinct sampled values of one property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySample {
    pub property: String,
    pub values: Vec<String>,
}

/// Discovery result for one node label
///
/// `approx_count` is `None` when the count query failed. Properties and
/// samples come from a bounded node sample, so rare properties may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFacts {
    pub name: String,
    pub approx_count: Option<u64>,
    pub properties: Vec<PropertyFacts>,
    pub samples: Vec<PropertySample>,
}

/// (source label, target label) pair observed for a relationship type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointPair {
    pub source: String,
    pub target: String,
}

/// Discovery result for one relationship type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipFacts {
    pub rel_type: String,
    pub approx_count: Option<u64>,
    pub endpoints: Vec<EndpointPair>,
}

/// Raw structural facts produced by one discovery run
///
/// All counts are approximate: they are read once during discovery and the
/// database may change before the description built from them expires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSchemaFacts {
    pub labels: Vec<LabelFacts>,
    pub relationships: Vec<RelationshipFacts>,
    pub incomplete: Vec<FactSection>,
    /// Number of structural queries issued, retries included
    pub queries_issued: u32,
}

impl RawSchemaFacts {
    pub fn mark_incomplete(&mut self, section: FactSection) {
        if !self.incomplete.contains(&section) {
            self.incomplete.push(section);
            self.incomplete.sort();
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.incomplete.is_empty()
    }

    /// At least one of the two inventories could be listed
    pub fn is_usable(&self) -> bool {
        !(self.incomplete.contains(&FactSection::Labels)
            && self.incomplete.contains(&FactSection::RelationshipTypes))
    }
}

/// Outcome of the optional semantic enrichment step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentStatus {
    NotRequested,
    Applied,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub name: String,
    pub types: Vec<String>,
}

/// Label record of the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub name: String,
    pub approx_count: Option<u64>,
    pub properties: Vec<PropertyEntry>,
}

impl LabelEntry {
    pub fn render_line(&self) -> String {
        let count = match self.approx_count {
            Some(n) => format!("~{} nodes", n),
            None => "count unknown".to_string(),
        };
        if self.properties.is_empty() {
            return format!("- {} ({}): no sampled properties", self.name, count);
        }
        let props: Vec<String> = self
            .properties
            .iter()
            .map(|p| {
                if p.types.is_empty() {
                    p.name.clone()
                } else {
                    format!("{}: {}", p.name, p.types.join("|"))
                }
            })
            .collect();
        format!("- {} ({}): {}", self.name, count, props.join(", "))
    }
}

/// Relationship record of the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEntry {
    pub rel_type: String,
    pub approx_count: Option<u64>,
    pub endpoints: Vec<EndpointPair>,
}

impl RelationshipEntry {
    pub fn render_line(&self) -> String {
        let count = match self.approx_count {
            Some(n) => format!("~{} relationships", n),
            None => "count unknown".to_string(),
        };
        if self.endpoints.is_empty() {
            return format!("- {} ({})", self.rel_type, count);
        }
        let patterns: Vec<String> = self
            .endpoints
            .iter()
            .map(|e| format!("({})->({})", e.source, e.target))
            .collect();
        format!("- {} ({}): {}", self.rel_type, count, patterns.join(", "))
    }
}

/// Sampled property values of one label, kept or dropped as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleBlock {
    pub label: String,
    pub properties: Vec<PropertySample>,
}

impl SampleBlock {
    pub fn render_line(&self) -> String {
        let parts: Vec<String> = self
            .properties
            .iter()
            .map(|p| format!("{} = {}", p.property, p.values.join(" | ")))
            .collect();
        format!("- {}: {}", self.label, parts.join("; "))
    }
}

pub const SUMMARY_HEADER: &str = "## Summary";
pub const LABELS_HEADER: &str = "## Node Labels (approximate counts)";
pub const RELATIONSHIPS_HEADER: &str = "## Relationships (approximate counts)";
pub const QUESTIONS_HEADER: &str = "## Suggested Questions";
pub const SAMPLES_HEADER: &str = "## Sampled Values";
pub const INCOMPLETE_HEADER: &str = "## Incomplete Sections (unknown, not empty)";

/// Cached semantic description of a database schema
///
/// Immutable once produced; a refresh builds a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub identity: DatabaseIdentity,
    pub summary: Option<String>,
    pub labels: Vec<LabelEntry>,
    pub relationships: Vec<RelationshipEntry>,
    pub samples: Vec<SampleBlock>,
    pub suggested_questions: Vec<String>,
    pub incomplete_sections: Vec<FactSection>,
    pub enrichment: EnrichmentStatus,
    pub created_at: DateTime<Utc>,
    /// Structural queries spent producing this description
    pub discovery_calls: u32,
}

impl SchemaDescription {
    pub fn is_partial(&self) -> bool {
        !self.incomplete_sections.is_empty()
    }

    pub fn title_line(&self) -> String {
        format!("# Graph schema: {}", self.identity.database())
    }

    /// Text form handed to the model and measured by the budgeter
    ///
    /// Every section is a header line, one line per record and a blank line,
    /// and empty sections are omitted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        push_block(&mut out, &self.title_line(), &[]);
        if let Some(summary) = &self.summary {
            push_block(&mut out, SUMMARY_HEADER, &[summary.clone()]);
        }
        let labels: Vec<String> = self.labels.iter().map(|l| l.render_line()).collect();
        push_section(&mut out, LABELS_HEADER, &labels);
        let rels: Vec<String> = self.relationships.iter().map(|r| r.render_line()).collect();
        push_section(&mut out, RELATIONSHIPS_HEADER, &rels);
        let questions: Vec<String> = self
            .suggested_questions
            .iter()
            .map(|q| question_line(q))
            .collect();
        push_section(&mut out, QUESTIONS_HEADER, &questions);
        let samples: Vec<String> = self.samples.iter().map(|s| s.render_line()).collect();
        push_section(&mut out, SAMPLES_HEADER, &samples);
        let incomplete: Vec<String> = self
            .incomplete_sections
            .iter()
            .map(|s| format!("- {}", s))
            .collect();
        push_section(&mut out, INCOMPLETE_HEADER, &incomplete);
        out
    }
}

pub fn question_line(question: &str) -> String {
    format!("- {}", question)
}

/// Rendered size of a block: header, one line per entry, trailing blank line
pub fn block_size(header: &str, lines: &[String]) -> usize {
    header.len() + 1 + lines.iter().map(|l| l.len() + 1).sum::<usize>() + 1
}

fn push_block(out: &mut String, header: &str, lines: &[String]) {
    out.push_str(header);
    out.push('\n');
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
}

fn push_section(out: &mut String, header: &str, lines: &[String]) {
    if !lines.is_empty() {
        push_block(out, header, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_description() -> SchemaDescription {
        SchemaDescription {
            identity: DatabaseIdentity::new("http://localhost:7474", "shop"),
            summary: None,
            labels: vec![LabelEntry {
                name: "User".to_string(),
                approx_count: Some(120),
                properties: vec![PropertyEntry {
                    name: "name".to_string(),
                    types: vec!["String".to_string()],
                }],
            }],
            relationships: vec![RelationshipEntry {
                rel_type: "BOUGHT".to_string(),
                approx_count: None,
                endpoints: vec![EndpointPair {
                    source: "User".to_string(),
                    target: "Product".to_string(),
                }],
            }],
            samples: vec![],
            suggested_questions: vec![],
            incomplete_sections: vec![FactSection::RelationshipCounts],
            enrichment: EnrichmentStatus::NotRequested,
            created_at: Utc::now(),
            discovery_calls: 4,
        }
    }

    #[test]
    fn test_render_sections() {
        let text = sample_description().render();
        assert!(text.starts_with("# Graph schema: shop\n\n"));
        assert!(text.contains("- User (~120 nodes): name: String\n"));
        assert!(text.contains("- BOUGHT (count unknown): (User)->(Product)\n"));
        assert!(text.contains("- relationship counts\n"));
        assert!(!text.contains(SUMMARY_HEADER));
        assert!(!text.contains(SAMPLES_HEADER));
    }

    #[test]
    fn test_block_size_matches_render() {
        let desc = sample_description();
        let expected = block_size(&desc.title_line(), &[])
            + block_size(LABELS_HEADER, &[desc.labels[0].render_line()])
            + block_size(RELATIONSHIPS_HEADER, &[desc.relationships[0].render_line()])
            + block_size(INCOMPLETE_HEADER, &["- relationship counts".to_string()]);
        assert_eq!(desc.render().len(), expected);
    }

    #[test]
    fn test_facts_usability() {
        let mut facts = RawSchemaFacts::default();
        assert!(facts.is_usable());
        facts.mark_incomplete(FactSection::Labels);
        facts.mark_incomplete(FactSection::Labels);
        assert_eq!(facts.incomplete.len(), 1);
        assert!(facts.is_usable());
        facts.mark_incomplete(FactSection::RelationshipTypes);
        assert!(!facts.is_usable());
        assert!(facts.is_partial());
    }
}
