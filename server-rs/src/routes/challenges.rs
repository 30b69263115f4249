use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::models::challenge::ProgressListQuery;
use crate::services::{challenges, rewards};
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let views = challenges::list_for_user(&state, user.id).await?;
    Ok(Json(json!({ "challenges": views })))
}

pub async fn get_by_slug(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(slug): Path<String>,
) -> AppResult<Json<Value>> {
    let view = challenges::get_by_slug(&state, user.id, &slug).await?;
    Ok(Json(json!({ "challenge": view })))
}

pub async fn my_progress(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Query(q): Query<ProgressListQuery>,
) -> AppResult<Json<Value>> {
    let rows = challenges::my_progress(&state, user.id, q.status).await?;
    Ok(Json(json!({ "progress": rows })))
}

pub async fn join(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(challenge_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let progress = challenges::join(&state, user.id, challenge_id).await?;
    Ok(Json(json!({ "progress": progress })))
}

pub async fn leave(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(challenge_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let progress = challenges::leave(&state, user.id, challenge_id).await?;
    Ok(Json(json!({ "progress": progress })))
}

pub async fn claim(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(progress_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let (progress, grant) = rewards::claim(&state, user.id, progress_id).await?;
    Ok(Json(json!({
        "progress": progress,
        "reward": grant,
        "leveledUp": grant.leveled_up(),
    })))
}
