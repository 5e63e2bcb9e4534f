use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use graph_schema_context::api;
use graph_schema_context::clock::{Clock, SystemClock};
use graph_schema_context::config::{Config, LoggingConfig};
use graph_schema_context::services::{
    ContextBudgeter, EntryCache, GraphQueryRunner, LlmService, Neo4jHttpRunner,
    SchemaContextService, SchemaProber, SchemaRefresher, SchemaSummarizer, SemanticEnricher,
};
use graph_schema_context::storage::SqliteStorage;

fn init_logging(logging: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level)),
        )
        .with_ansi(logging.style != "never")
        .init();
}

fn build_enricher(config: &Config) -> Option<Arc<dyn SemanticEnricher>> {
    if !config.llm.enabled {
        info!("Schema enrichment disabled");
        return None;
    }
    match LlmService::new(&config.llm) {
        Ok(service) if service.is_configured() => Some(Arc::new(service)),
        Ok(_) => {
            warn!("LLM_GATEWAY_URL not set; schema descriptions will be structural only");
            None
        }
        Err(e) => {
            warn!("LLM service unavailable, continuing without enrichment: {}", e);
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(&config.logging);

    info!("Starting server on {}", config.server_address());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let runner: Arc<dyn GraphQueryRunner> =
        Arc::new(Neo4jHttpRunner::new(&config.graph).context("Failed to create graph runner")?);

    let service = SchemaContextService::new(
        EntryCache::with_clock(config.cache.capacity, config.cache_ttl(), Arc::clone(&clock)),
        SchemaProber::new(runner, config.discovery.retry_policy(), config.discovery.limits()),
        SchemaSummarizer::new(clock, Duration::from_secs(config.llm.timeout_secs)),
        build_enricher(&config),
        ContextBudgeter::new(config.context.size_metric),
    );

    // Optional durable copy of the schema cache
    let storage = match &config.cache.persist_path {
        Some(path) => {
            let storage = SqliteStorage::new(path)
                .await
                .with_context(|| format!("Failed to open schema cache store {}", path))?;
            let storage = Arc::new(storage);
            match service.restore(&storage).await {
                Ok(restored) => info!("Restored {} cached schema descriptions", restored),
                Err(e) => warn!("Could not restore schema cache: {}", e),
            }
            Some(storage)
        }
        None => None,
    };

    let refresher = if config.refresh.interval_secs > 0 {
        Some(
            SchemaRefresher::new(
                service.clone(),
                storage.clone(),
                Duration::from_secs(config.refresh.interval_secs),
                Duration::from_secs(config.refresh.refresh_after_secs),
            )
            .spawn(),
        )
    } else {
        None
    };

    let app: Router = api::routes::create_router_with_state(service.clone(), config.clone());

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(refresher) = refresher {
        refresher.stop().await;
    }
    if let Some(storage) = &storage {
        if let Err(e) = service.persist(storage).await {
            error!("Failed to persist schema cache on shutdown: {}", e);
        }
    }

    Ok(())
}
