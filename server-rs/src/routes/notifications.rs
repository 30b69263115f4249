use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::notification::{Notification, NotificationQuery};
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Query(q): Query<NotificationQuery>,
) -> AppResult<Json<Value>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);
    let unread_only = q.unread.unwrap_or(false);

    let notifications: Vec<Notification> = sqlx::query_as(
        r#"SELECT * FROM notifications
        WHERE user_id = $1 AND (NOT $2 OR is_read = false)
        ORDER BY created_at DESC, id DESC
        LIMIT $3 OFFSET $4"#,
    )
    .bind(user.id)
    .bind(unread_only)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let unread: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false",
    )
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "notifications": notifications, "unread": unread })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let notification: Notification = sqlx::query_as(
        "UPDATE notifications SET is_read = true WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Notification not found".into()))?;

    Ok(Json(json!({ "notification": notification })))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let result =
        sqlx::query("UPDATE notifications SET is_read = true WHERE user_id = $1 AND is_read = false")
            .bind(user.id)
            .execute(&state.db)
            .await?;

    Ok(Json(json!({ "updated": result.rows_affected() })))
}
