use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::reward::{InventoryEntry, OwnedBadge, PointTransaction};
use crate::models::user::*;
use crate::routes::auth::validate_username;
use crate::AppState;

const LEDGER_PAGE: i64 = 100;

async fn load_user(state: &AppState, user: &AuthUser) -> AppResult<User> {
    sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

async fn owned_badges(state: &AppState, user: &AuthUser) -> AppResult<Vec<OwnedBadge>> {
    let rows = sqlx::query_as(
        r#"SELECT b.id AS badge_id, b.name, b.slug, b.icon_url, ub.source, ub.earned_at
        FROM user_badges ub JOIN badges b ON b.id = ub.badge_id
        WHERE ub.user_id = $1
        ORDER BY ub.earned_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;
    Ok(rows)
}

pub async fn me(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let profile = load_user(&state, &user).await?;
    let badges = owned_badges(&state, &user).await?;

    Ok(Json(json!({
        "user": UserPublic::from(&profile),
        "email": profile.email,
        "badges": badges,
    })))
}

pub async fn update_me(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Json(body): Json<ProfileUpdateRequest>,
) -> AppResult<Json<Value>> {
    if let Some(name) = &body.username {
        validate_username(name)?;
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 AND id <> $2)",
        )
        .bind(name)
        .bind(user.id)
        .fetch_one(&state.db)
        .await?;
        if taken {
            return Err(AppError::Conflict("Username already taken".into()));
        }
    }
    if let Some(bio) = &body.bio {
        if bio.chars().count() > 500 {
            return Err(AppError::BadRequest("Bio must be at most 500 characters".into()));
        }
    }

    let updated: User = sqlx::query_as(
        r#"UPDATE users SET
            username = COALESCE($1, username),
            avatar_url = COALESCE($2, avatar_url),
            bio = COALESCE($3, bio)
        WHERE id = $4
        RETURNING *"#,
    )
    .bind(&body.username)
    .bind(&body.avatar_url)
    .bind(&body.bio)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(json!({ "user": UserPublic::from(&updated) })))
}

pub async fn inventory(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let items: Vec<InventoryEntry> = sqlx::query_as(
        r#"SELECT s.id AS shop_item_id, s.name, s.item_type, ui.source, ui.acquired_at
        FROM user_inventory ui JOIN shop_items s ON s.id = ui.shop_item_id
        WHERE ui.user_id = $1
        ORDER BY ui.acquired_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "items": items })))
}

/// Latest point ledger entries, newest first.
pub async fn points_history(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let balance: i64 = sqlx::query_scalar("SELECT points FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    let transactions: Vec<PointTransaction> = sqlx::query_as(
        "SELECT * FROM point_transactions WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
    )
    .bind(user.id)
    .bind(LEDGER_PAGE)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "balance": balance, "transactions": transactions })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::points;
    use crate::test_support;
    use sqlx::PgPool;

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn ledger_lists_newest_first(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;

        let mut tx = pool.begin().await.unwrap();
        points::credit(&mut *tx, user, 50, "challenge_reward", Some("1")).await.unwrap();
        points::debit(&mut *tx, user, 20, "shop_purchase", Some("4")).await.unwrap();
        tx.commit().await.unwrap();

        let auth = axum::Extension(AuthUser {
            id: user,
            role: UserRole::User,
        });
        let Json(body) = points_history(State(state), auth).await.unwrap();
        assert_eq!(body["balance"], 30);
        let entries = body["transactions"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["reason"], "shop_purchase");
        assert_eq!(entries[0]["amount"], -20);
        assert_eq!(entries[1]["balanceAfter"], 50);
    }
}
