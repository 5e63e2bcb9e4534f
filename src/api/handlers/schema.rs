use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::DatabaseIdentity;

#[derive(Debug, Deserialize)]
pub struct IdentityParams {
    pub uri: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContextParams {
    pub uri: Option<String>,
    pub database: Option<String>,
    pub max_size: Option<usize>,
    pub refresh: Option<bool>,
}

/// Build the identity from request parameters, defaulting to the configured
/// graph database
pub fn resolve_identity(
    state: &AppState,
    uri: Option<&str>,
    database: Option<&str>,
) -> Result<DatabaseIdentity, AppError> {
    let uri = uri.unwrap_or(&state.config.graph.uri).trim();
    let database = database.unwrap_or(&state.config.graph.database).trim();

    let parsed = url::Url::parse(uri)
        .map_err(|e| AppError::Validation(format!("Invalid graph URI: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "Unsupported URI scheme '{}'. Use the HTTP endpoint, e.g. http://localhost:7474",
            parsed.scheme()
        )));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(AppError::Validation(
            "Credentials are not accepted in the URI; the server uses its configured graph user"
                .to_string(),
        ));
    }

    if database.is_empty() {
        return Err(AppError::Validation("Database name cannot be empty".to_string()));
    }
    if !database
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(AppError::Validation(format!(
            "Invalid database name '{}'. Use letters, digits, '-', '_' or '.'",
            database
        )));
    }

    Ok(DatabaseIdentity::new(uri, database))
}

/// Get the budgeted schema context of a database
pub async fn get_context(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let identity = resolve_identity(&state, params.uri.as_deref(), params.database.as_deref())?;
    let max_size = params.max_size.unwrap_or(state.config.context.default_max_size);
    if max_size == 0 {
        return Err(AppError::Validation("max_size must be greater than zero".to_string()));
    }
    let refresh = params.refresh.unwrap_or(false);

    tracing::info!(
        "Getting schema context for {} (max_size: {}, refresh: {})",
        identity,
        max_size,
        refresh
    );
    let context = state.service.get_context(&identity, max_size, refresh).await?;

    Ok(Json(serde_json::json!({
        "identity": identity.to_string(),
        "state": state.service.state(&identity),
        "partial": context.is_partial(),
        "context": context,
    })))
}

/// Drop the cached schema of a database
pub async fn invalidate_context(
    State(state): State<AppState>,
    Query(params): Query<IdentityParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let identity = resolve_identity(&state, params.uri.as_deref(), params.database.as_deref())?;
    let invalidated = state.service.invalidate(&identity);

    Ok(Json(serde_json::json!({
        "identity": identity.to_string(),
        "invalidated": invalidated,
        "state": state.service.state(&identity),
    })))
}

/// Lifecycle state of a database schema plus every tracked identity
pub async fn get_state(
    State(state): State<AppState>,
    Query(params): Query<IdentityParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let identity = resolve_identity(&state, params.uri.as_deref(), params.database.as_deref())?;

    Ok(Json(serde_json::json!({
        "identity": identity.to_string(),
        "state": state.service.state(&identity),
        "tracked": state.service.tracked_identities(),
    })))
}
