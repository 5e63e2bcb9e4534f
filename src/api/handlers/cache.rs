use axum::{extract::State, Json};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;

/// Hit/miss counters of the schema cache
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let stats = state.service.cache_stats();

    Ok(Json(serde_json::json!({
        "hit_ratio": stats.hit_ratio(),
        "stats": stats,
    })))
}

/// Per-entry age and TTL, most recently used first
pub async fn list_entries(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entries: Vec<serde_json::Value> = state
        .service
        .cache_entries()
        .into_iter()
        .map(|entry| {
            serde_json::json!({
                "identity": entry.key.to_string(),
                "inserted_at": entry.inserted_at,
                "last_accessed": entry.last_accessed,
                "age_secs": entry.age_secs,
                "ttl_secs": entry.ttl_secs,
                "remaining_secs": entry.remaining_secs,
                "access_count": entry.access_count,
                "expired": entry.expired,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
    })))
}

/// Drop every cached schema description
pub async fn clear_entries(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let invalidated = state.service.invalidate_all();

    Ok(Json(serde_json::json!({
        "invalidated": invalidated,
    })))
}
