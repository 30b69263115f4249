use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::reward::{BadgeListing, ShopItem};
use crate::services::points;
use crate::AppState;

pub async fn list_badges(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let badges: Vec<BadgeListing> = sqlx::query_as(
        r#"SELECT b.*, (ub.user_id IS NOT NULL) AS owned
        FROM badges b
        LEFT JOIN user_badges ub ON ub.badge_id = b.id AND ub.user_id = $1
        ORDER BY b.name"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "badges": badges })))
}

pub async fn list_items(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let items: Vec<ShopItem> =
        sqlx::query_as("SELECT * FROM shop_items WHERE is_active = true ORDER BY price, name")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(json!({ "items": items })))
}

pub async fn purchase(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(item_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let item: ShopItem =
        sqlx::query_as("SELECT * FROM shop_items WHERE id = $1 AND is_active = true")
            .bind(item_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Item not found".into()))?;

    let mut tx = state.db.begin().await?;

    // Locks the user row, so the ownership check below cannot race.
    let balance = points::debit(
        &mut *tx,
        user.id,
        item.price,
        "shop_purchase",
        Some(&item.id.to_string()),
    )
    .await?;

    let inserted = sqlx::query(
        r#"INSERT INTO user_inventory (user_id, shop_item_id, source, acquired_at)
        VALUES ($1, $2, 'shop', NOW())
        ON CONFLICT (user_id, shop_item_id) DO NOTHING"#,
    )
    .bind(user.id)
    .bind(item.id)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        // dropping tx rolls the debit back
        return Err(AppError::Conflict("Already owned".into()));
    }
    tx.commit().await?;

    tracing::info!(user_id = %user.id, item_id = item.id, price = item.price, balance, "shop item purchased");
    Ok(Json(json!({ "item": item, "balance": balance })))
}
