use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::budget::SizeMetric;
use crate::services::discovery::{DiscoveryLimits, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub graph: GraphConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub discovery: DiscoveryConfig,
    pub context: ContextConfig,
    pub refresh: RefreshConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub uri: String,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
    /// SQLite file for the durable cache copy; no persistence when unset
    pub persist_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub query_timeout_secs: u64,
    pub max_labels: usize,
    pub max_relationship_types: usize,
    pub sample_nodes: usize,
    pub values_per_property: usize,
    pub endpoint_pairs: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    pub default_max_size: usize,
    pub size_metric: SizeMetric,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Zero disables the background refresher
    pub interval_secs: u64,
    pub refresh_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file first so its values act as env overrides
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("graph.uri", "http://localhost:7474")?
            .set_default("graph.database", "neo4j")?
            .set_default("graph.user", "neo4j")?
            .set_default("graph.request_timeout_secs", 30)?
            .set_default("llm.enabled", true)?
            .set_default("llm.gateway_url", "")?
            .set_default("llm.timeout_secs", 30)?
            .set_default("cache.capacity", 100)?
            .set_default("cache.ttl_secs", 24 * 3600)?
            .set_default("discovery.max_attempts", 3)?
            .set_default("discovery.base_delay_ms", 250)?
            .set_default("discovery.max_delay_ms", 2000)?
            .set_default("discovery.query_timeout_secs", 10)?
            .set_default("discovery.max_labels", 100)?
            .set_default("discovery.max_relationship_types", 100)?
            .set_default("discovery.sample_nodes", 5)?
            .set_default("discovery.values_per_property", 3)?
            .set_default("discovery.endpoint_pairs", 5)?
            .set_default("context.default_max_size", 30_000)?
            .set_default("context.size_metric", "approx_tokens")?
            .set_default("refresh.interval_secs", 300)?
            .set_default("refresh.refresh_after_secs", 12 * 3600)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(uri) = env::var("GRAPH_URI") {
            builder = builder.set_override("graph.uri", uri)?;
        }

        if let Ok(database) = env::var("GRAPH_DATABASE") {
            builder = builder.set_override("graph.database", database)?;
        }

        if let Ok(user) = env::var("GRAPH_USER") {
            builder = builder.set_override("graph.user", user)?;
        }

        if let Ok(password) = env::var("GRAPH_PASSWORD") {
            builder = builder.set_override("graph.password", Some(password))?;
        }

        if let Ok(gateway_url) = env::var("LLM_GATEWAY_URL") {
            builder = builder.set_override("llm.gateway_url", gateway_url)?;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", Some(api_key))?;
        }

        if let Ok(capacity) = env::var("SCHEMA_CACHE_CAPACITY") {
            let capacity = capacity.parse::<u64>().unwrap_or(100);
            builder = builder.set_override("cache.capacity", capacity)?;
        }

        if let Ok(ttl) = env::var("SCHEMA_CACHE_TTL_SECS") {
            let ttl = ttl.parse::<u64>().unwrap_or(24 * 3600);
            builder = builder.set_override("cache.ttl_secs", ttl)?;
        }

        if let Ok(path) = env::var("SCHEMA_CACHE_PATH") {
            builder = builder.set_override("cache.persist_path", Some(path))?;
        }

        if let Ok(interval) = env::var("SCHEMA_REFRESH_INTERVAL_SECS") {
            let interval = interval.parse::<u64>().unwrap_or(300);
            builder = builder.set_override("refresh.interval_secs", interval)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

impl DiscoveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            query_timeout: Duration::from_secs(self.query_timeout_secs),
        }
    }

    pub fn limits(&self) -> DiscoveryLimits {
        DiscoveryLimits {
            max_labels: self.max_labels,
            max_relationship_types: self.max_relationship_types,
            sample_nodes: self.sample_nodes,
            values_per_property: self.values_per_property,
            endpoint_pairs: self.endpoint_pairs,
        }
    }
}
