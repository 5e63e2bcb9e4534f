use thiserror::Error;

/// Failure of a single structural query against the graph database
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query timed out after {0} ms")]
    Timeout(u64),

    #[error("Transient database error: {0}")]
    Transient(String),

    #[error("Query failed: {0}")]
    Query(String),
}

impl RunnerError {
    /// Connection, timeout and transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RunnerError::Query(_))
    }
}

/// Whole-discovery failure; partial results are not errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Database unreachable: {0}")]
    Connection(String),

    #[error("Discovery produced no usable facts: {0}")]
    Unavailable(String),
}

/// Failure of the semantic enrichment capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Rate limited{}", .retry_after_secs.map(|s| format!(": retry after {} seconds", s)).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Enrichment timed out after {0} ms")]
    Timeout(u64),

    #[error("Enrichment not configured: {0}")]
    NotConfigured(String),
}

/// Errors surfaced by the schema context service
///
/// `Clone` so one in-flight discovery result can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema unavailable: {0}")]
    Unavailable(String),

    #[error("Database unreachable: {0}")]
    Connection(String),

    #[error("Budget of {requested} is below the minimum viable size {minimum}")]
    BudgetTooSmall { requested: usize, minimum: usize },
}

impl From<DiscoveryError> for SchemaError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Connection(msg) => SchemaError::Connection(msg),
            DiscoveryError::Unavailable(msg) => SchemaError::Unavailable(msg),
        }
    }
}
