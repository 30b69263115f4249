use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::activity::ActivityEvent;
use crate::models::social::*;
use crate::services::{notifier, progress_tracker};
use crate::AppState;

async fn username(state: &AppState, id: Uuid) -> AppResult<String> {
    sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

pub async fn list_friends(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let friends: Vec<FriendSummary> = sqlx::query_as(
        r#"SELECT u.id AS user_id, u.username, u.avatar_url, u.level
        FROM friendships f
        JOIN users u ON (
            (f.requester_id = $1 AND u.id = f.addressee_id) OR
            (f.addressee_id = $1 AND u.id = f.requester_id)
        )
        WHERE f.status = $2 AND (f.requester_id = $1 OR f.addressee_id = $1)
        ORDER BY u.username"#,
    )
    .bind(user.id)
    .bind(FriendshipStatus::Accepted)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "friends": friends })))
}

pub async fn friend_requests(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let incoming: Vec<FriendRequestEntry> = sqlx::query_as(
        r#"SELECT u.id AS user_id, u.username, f.created_at
        FROM friendships f JOIN users u ON u.id = f.requester_id
        WHERE f.addressee_id = $1 AND f.status = $2
        ORDER BY f.created_at DESC"#,
    )
    .bind(user.id)
    .bind(FriendshipStatus::Pending)
    .fetch_all(&state.db)
    .await?;

    let outgoing: Vec<FriendRequestEntry> = sqlx::query_as(
        r#"SELECT u.id AS user_id, u.username, f.created_at
        FROM friendships f JOIN users u ON u.id = f.addressee_id
        WHERE f.requester_id = $1 AND f.status = $2
        ORDER BY f.created_at DESC"#,
    )
    .bind(user.id)
    .bind(FriendshipStatus::Pending)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "incoming": incoming, "outgoing": outgoing })))
}

pub async fn send_request(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Json(body): Json<FriendRequestBody>,
) -> AppResult<Json<Value>> {
    let target = body.user_id;
    if target == user.id {
        return Err(AppError::BadRequest("Cannot friend yourself".into()));
    }
    // 404 before touching friendships
    username(&state, target).await?;

    let mut tx = state.db.begin().await?;

    // A declined request may be sent again.
    sqlx::query(
        r#"DELETE FROM friendships WHERE status = $3
            AND ((requester_id = $1 AND addressee_id = $2) OR (requester_id = $2 AND addressee_id = $1))"#,
    )
    .bind(user.id)
    .bind(target)
    .bind(FriendshipStatus::Declined)
    .execute(&mut *tx)
    .await?;

    let existing: bool = sqlx::query_scalar(
        r#"SELECT EXISTS(SELECT 1 FROM friendships
            WHERE (requester_id = $1 AND addressee_id = $2) OR (requester_id = $2 AND addressee_id = $1))"#,
    )
    .bind(user.id)
    .bind(target)
    .fetch_one(&mut *tx)
    .await?;
    if existing {
        return Err(AppError::Conflict("Friendship already exists".into()));
    }

    let friendship: Friendship = sqlx::query_as(
        "INSERT INTO friendships (requester_id, addressee_id, status, created_at) VALUES ($1, $2, $3, NOW()) RETURNING *",
    )
    .bind(user.id)
    .bind(target)
    .bind(FriendshipStatus::Pending)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        // the mirror request landed between the check and the insert
        if is_unique_violation(&e) {
            AppError::Conflict("Friendship already exists".into())
        } else {
            AppError::from(e)
        }
    })?;
    tx.commit().await?;

    let from_name = username(&state, user.id).await?;
    notifier::notify_all(
        &state.db,
        &state.hub,
        vec![notifier::friend_request(target, user.id, &from_name)],
    )
    .await;

    Ok(Json(json!({ "friendship": friendship })))
}

/// `:id` is the user who sent the request.
pub async fn accept_request(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(from): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let friendship: Friendship = sqlx::query_as(
        r#"UPDATE friendships SET status = $1, responded_at = NOW()
        WHERE requester_id = $2 AND addressee_id = $3 AND status = $4
        RETURNING *"#,
    )
    .bind(FriendshipStatus::Accepted)
    .bind(from)
    .bind(user.id)
    .bind(FriendshipStatus::Pending)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("No pending request from this user".into()))?;

    tracing::info!(requester = %from, addressee = %user.id, "friend request accepted");

    let changes = progress_tracker::record_activity_logged(
        &state,
        user.id,
        &[ActivityEvent::FriendAdded { friend_id: from }],
    )
    .await;
    progress_tracker::record_activity_logged(
        &state,
        from,
        &[ActivityEvent::FriendAdded { friend_id: user.id }],
    )
    .await;

    let by_name = username(&state, user.id).await?;
    notifier::notify_all(
        &state.db,
        &state.hub,
        vec![notifier::friend_accepted(from, user.id, &by_name)],
    )
    .await;

    Ok(Json(json!({ "friendship": friendship, "changes": changes })))
}

pub async fn decline_request(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(from): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query(
        r#"UPDATE friendships SET status = $1, responded_at = NOW()
        WHERE requester_id = $2 AND addressee_id = $3 AND status = $4"#,
    )
    .bind(FriendshipStatus::Declined)
    .bind(from)
    .bind(user.id)
    .bind(FriendshipStatus::Pending)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("No pending request from this user".into()));
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn remove_friend(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(friend): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query(
        r#"DELETE FROM friendships WHERE status = $3
            AND ((requester_id = $1 AND addressee_id = $2) OR (requester_id = $2 AND addressee_id = $1))"#,
    )
    .bind(user.id)
    .bind(friend)
    .bind(FriendshipStatus::Accepted)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Not friends with this user".into()));
    }
    Ok(Json(json!({ "success": true })))
}
