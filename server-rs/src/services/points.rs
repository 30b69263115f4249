use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::user::level_for_points;

/// Balance and level after a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsUpdate {
    pub balance: i64,
    pub level_before: i32,
    pub level_after: i32,
}

/// Adds `amount` to the spendable balance and lifetime total, recomputes
/// the level and writes a ledger row. Must run inside a transaction.
pub async fn credit(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    reason: &str,
    reference_id: Option<&str>,
) -> AppResult<PointsUpdate> {
    if amount < 0 {
        return Err(AppError::Internal("credit amount must not be negative".into()));
    }

    let (points, lifetime, level): (i64, i64, i32) = sqlx::query_as(
        "SELECT points, lifetime_points, level FROM users WHERE id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let balance = points + amount;
    let lifetime = lifetime + amount;
    let new_level = level_for_points(lifetime).max(level);

    sqlx::query(
        "UPDATE users SET points = $1, lifetime_points = $2, level = $3 WHERE id = $4",
    )
    .bind(balance)
    .bind(lifetime)
    .bind(new_level)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    if amount > 0 {
        record(conn, user_id, amount, balance, reason, reference_id).await?;
    }

    Ok(PointsUpdate {
        balance,
        level_before: level,
        level_after: new_level,
    })
}

/// Spends `amount` points. Lifetime points and level are unaffected.
pub async fn debit(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    reason: &str,
    reference_id: Option<&str>,
) -> AppResult<i64> {
    let points: i64 = sqlx::query_scalar("SELECT points FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    if points < amount {
        return Err(AppError::BadRequest("Insufficient points".into()));
    }
    let balance = points - amount;

    sqlx::query("UPDATE users SET points = $1 WHERE id = $2")
        .bind(balance)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    if amount > 0 {
        record(conn, user_id, -amount, balance, reason, reference_id).await?;
    }
    Ok(balance)
}

async fn record(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    balance_after: i64,
    reason: &str,
    reference_id: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO point_transactions (user_id, amount, balance_after, reason, reference_id, created_at) VALUES ($1, $2, $3, $4, $5, NOW())",
    )
    .bind(user_id)
    .bind(amount)
    .bind(balance_after)
    .bind(reason)
    .bind(reference_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
