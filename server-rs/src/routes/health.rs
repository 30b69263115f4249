use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();
    let redis_ok = state.cache.health_check().await;

    // Redis is optional; only the database decides health.
    let status = if db_ok { "healthy" } else { "degraded" };
    Json(json!({
        "status": status,
        "postgres": db_ok,
        "redis": if state.cache.is_enabled() { json!(redis_ok) } else { json!("disabled") },
        "liveConnections": state.hub.connected_users().await,
        "timestamp": chrono::Utc::now(),
    }))
}
