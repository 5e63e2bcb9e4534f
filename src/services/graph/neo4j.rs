// Neo4j runner over the HTTP transactional endpoint
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::GraphConfig;
use crate::error::RunnerError;
use crate::models::DatabaseIdentity;
use crate::services::graph::{GraphQueryRunner, Row};

pub struct Neo4jHttpRunner {
    http_client: HttpClient,
    /// Only requests to this endpoint carry the configured credentials
    trusted_uri: String,
    user: String,
    password: Option<String>,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Neo4jError {
    code: String,
    message: String,
}

impl Neo4jHttpRunner {
    pub fn new(config: &GraphConfig) -> Result<Self, RunnerError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RunnerError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        // GRAPH_URI may carry user:password; explicit settings win
        let (mut user, mut password) = (config.user.clone(), config.password.clone());
        if password.is_none() {
            if let Ok(parsed) = url::Url::parse(&config.uri) {
                if let Some(uri_password) = parsed.password() {
                    password = Some(uri_password.to_string());
                    if !parsed.username().is_empty() {
                        user = parsed.username().to_string();
                    }
                }
            }
        }

        Ok(Self {
            http_client,
            trusted_uri: DatabaseIdentity::new(&config.uri, &config.database)
                .uri()
                .to_string(),
            user,
            password,
            timeout_ms: config.request_timeout_secs * 1000,
        })
    }

    fn commit_url(identity: &DatabaseIdentity) -> Result<url::Url, RunnerError> {
        let mut url = url::Url::parse(identity.uri())
            .map_err(|e| RunnerError::Query(format!("Invalid graph URI {}: {}", identity, e)))?;
        url.path_segments_mut()
            .map_err(|_| RunnerError::Query(format!("Graph URI {} cannot take a path", identity)))?
            .pop_if_empty()
            .extend(["db", identity.database(), "tx", "commit"]);
        Ok(url)
    }

    fn credentials_for(&self, identity: &DatabaseIdentity) -> Option<(&str, &str)> {
        if identity.uri() != self.trusted_uri {
            return None;
        }
        self.password
            .as_deref()
            .map(|password| (self.user.as_str(), password))
    }

    /// Convert a transactional endpoint response into rows
    fn parse_response(body: CommitResponse) -> Result<Vec<Row>, RunnerError> {
        if let Some(error) = body.errors.into_iter().next() {
            let message = format!("{}: {}", error.code, error.message);
            // Neo4j status codes look like Neo.TransientError.General.DatabaseUnavailable
            let transient = error.code.contains("TransientError")
                || error.code.contains("DatabaseUnavailable");
            return if transient {
                Err(RunnerError::Transient(message))
            } else {
                Err(RunnerError::Query(message))
            };
        }

        let Some(result) = body.results.into_iter().next() else {
            return Ok(Vec::new());
        };

        Ok(result
            .data
            .into_iter()
            .map(|data_row| {
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(data_row.row)
                    .collect::<Row>()
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl GraphQueryRunner for Neo4jHttpRunner {
    async fn run(
        &self,
        identity: &DatabaseIdentity,
        query: &str,
        params: Value,
    ) -> Result<Vec<Row>, RunnerError> {
        let payload = json!({
            "statements": [{ "statement": query, "parameters": params }]
        });

        let mut request = self
            .http_client
            .post(Self::commit_url(identity)?)
            .header("Accept", "application/json")
            .json(&payload);

        match self.credentials_for(identity) {
            Some((user, password)) => request = request.basic_auth(user, Some(password)),
            None => tracing::debug!("Querying {} without configured credentials", identity),
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RunnerError::Timeout(self.timeout_ms)
            } else if e.is_connect() {
                RunnerError::Connection(format!("Failed to reach {}: {}", identity, e))
            } else {
                RunnerError::Transient(format!("Request to {} failed: {}", identity, e))
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RunnerError::Transient(format!("Neo4j returned {}", status)));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RunnerError::Query(format!(
                "Neo4j returned error {}: {}",
                status, error_text
            )));
        }

        let body: CommitResponse = response
            .json()
            .await
            .map_err(|e| RunnerError::Query(format!("Failed to parse Neo4j response: {}", e)))?;

        Self::parse_response(body)
    }
}
