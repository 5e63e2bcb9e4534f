// Graph database access used by discovery
pub mod neo4j;

pub use neo4j::Neo4jHttpRunner;

use crate::error::RunnerError;
use crate::models::DatabaseIdentity;
use serde_json::{Map, Value};

/// One result row, column name to value
pub type Row = Map<String, Value>;

/// Executes structural (read-only) queries against a graph database
#[async_trait::async_trait]
pub trait GraphQueryRunner: Send + Sync {
    async fn run(
        &self,
        identity: &DatabaseIdentity,
        query: &str,
        params: Value,
    ) -> Result<Vec<Row>, RunnerError>;
}

/// Quote an identifier for use in Cypher, doubling embedded backticks
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
