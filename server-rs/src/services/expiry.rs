use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::notifier;
use crate::AppState;

/// Marks IN_PROGRESS attempts past their deadline (or past the challenge's
/// end date) as FAILED. Limited to one user when `user_id` is given.
/// Returns the number of attempts failed.
pub async fn sweep_expired(state: &AppState, user_id: Option<Uuid>) -> AppResult<usize> {
    let expired: Vec<(Uuid, i32, String)> = sqlx::query_as(
        r#"WITH expired AS (
            UPDATE user_challenge_progress p
            SET status = 'FAILED'
            FROM challenges c
            WHERE c.id = p.challenge_id
                AND p.status = 'IN_PROGRESS'
                AND ($1::uuid IS NULL OR p.user_id = $1)
                AND ((p.expires_at IS NOT NULL AND p.expires_at < NOW())
                    OR (c.end_date IS NOT NULL AND c.end_date < NOW()))
            RETURNING p.user_id, p.challenge_id, c.title
        )
        SELECT user_id, challenge_id, title FROM expired"#,
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await?;

    if expired.is_empty() {
        return Ok(0);
    }

    let count = expired.len();
    let batch = expired
        .iter()
        .map(|(uid, cid, title)| notifier::challenge_failed(*uid, *cid, title))
        .collect();
    notifier::notify_all(&state.db, &state.hub, batch).await;

    tracing::info!(count, user_id = ?user_id, "expired challenge attempts marked failed");
    Ok(count)
}

/// Runs [`sweep_expired`] for all users every `interval`.
pub fn spawn_sweeper(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_expired(&state, None).await {
                tracing::warn!(error = %e, "challenge expiry sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::challenge::ChallengeType;
    use crate::models::progress::ProgressStatus;
    use crate::test_support;
    use sqlx::PgPool;

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn overdue_attempts_fail_and_notify(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let other = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::WatchMovies, 3, 10).await;
        let insert = "INSERT INTO user_challenge_progress (user_id, challenge_id, expires_at) VALUES ($1, $2, NOW() + $3 * INTERVAL '1 hour')";
        sqlx::query(insert).bind(user).bind(c.id).bind(-1.0_f64).execute(&pool).await.unwrap();
        sqlx::query(insert).bind(other).bind(c.id).bind(1.0_f64).execute(&pool).await.unwrap();

        assert_eq!(sweep_expired(&state, None).await.unwrap(), 1);
        assert_eq!(sweep_expired(&state, None).await.unwrap(), 0);

        let statuses: Vec<(Uuid, ProgressStatus)> = sqlx::query_as(
            "SELECT user_id, status FROM user_challenge_progress WHERE challenge_id = $1",
        )
        .bind(c.id)
        .fetch_all(&pool)
        .await
        .unwrap();
        for (uid, status) in statuses {
            let expected = if uid == user { ProgressStatus::Failed } else { ProgressStatus::InProgress };
            assert_eq!(status, expected);
        }

        let failed_notes: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND kind = 'CHALLENGE_FAILED'",
        )
        .bind(user)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(failed_notes, 1);
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn sweep_can_be_limited_to_one_user(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let other = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::WatchMovies, 3, 10).await;
        let insert = "INSERT INTO user_challenge_progress (user_id, challenge_id, expires_at) VALUES ($1, $2, NOW() - INTERVAL '1 day')";
        sqlx::query(insert).bind(user).bind(c.id).execute(&pool).await.unwrap();
        sqlx::query(insert).bind(other).bind(c.id).execute(&pool).await.unwrap();

        assert_eq!(sweep_expired(&state, Some(user)).await.unwrap(), 1);
        assert_eq!(sweep_expired(&state, None).await.unwrap(), 1);
    }
}
