use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::challenge::Challenge;
use crate::models::progress::{ProgressStatus, UserChallengeProgress};
use crate::models::reward::{Badge, RewardGrant, ShopItem};
use crate::services::{challenge_engine, notifier, points};
use crate::AppState;

/// Moves a locked, COMPLETED attempt to REWARD_CLAIMED and hands out the
/// challenge's rewards. Runs inside the caller's transaction.
pub async fn claim_locked(
    conn: &mut PgConnection,
    user_id: Uuid,
    progress: &mut UserChallengeProgress,
    challenge: &Challenge,
    now: DateTime<Utc>,
) -> AppResult<RewardGrant> {
    challenge_engine::check_claim(progress, user_id)?;
    progress
        .transition(ProgressStatus::RewardClaimed, now)
        .map_err(|e| AppError::Conflict(e.to_string()))?;

    // The status guard makes a concurrent second claim update nothing.
    let updated = sqlx::query(
        "UPDATE user_challenge_progress SET status = $1, reward_claimed_at = $2 WHERE id = $3 AND status = $4",
    )
    .bind(ProgressStatus::RewardClaimed)
    .bind(now)
    .bind(progress.id)
    .bind(ProgressStatus::Completed)
    .execute(&mut *conn)
    .await?;
    if updated.rows_affected() != 1 {
        return Err(AppError::Conflict("Reward already claimed".into()));
    }

    grant(conn, user_id, challenge).await
}

async fn grant(
    conn: &mut PgConnection,
    user_id: Uuid,
    challenge: &Challenge,
) -> AppResult<RewardGrant> {
    let reference = challenge.id.to_string();
    let update = points::credit(
        &mut *conn,
        user_id,
        challenge.points_reward,
        "challenge_reward",
        Some(&reference),
    )
    .await?;

    let mut grant = RewardGrant {
        points: challenge.points_reward,
        balance: update.balance,
        badge: None,
        shop_item: None,
        level_before: update.level_before,
        level_after: update.level_after,
    };

    if let Some(badge_id) = challenge.badge_id {
        let badge: Option<Badge> = sqlx::query_as("SELECT * FROM badges WHERE id = $1")
            .bind(badge_id)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(badge) = badge {
            let inserted = sqlx::query(
                "INSERT INTO user_badges (user_id, badge_id, source, earned_at) VALUES ($1, $2, 'challenge', NOW()) ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(badge.id)
            .execute(&mut *conn)
            .await?;
            if inserted.rows_affected() == 1 {
                grant.badge = Some(badge);
            }
        }
    }

    if let Some(item_id) = challenge.shop_item_id {
        let item: Option<ShopItem> = sqlx::query_as("SELECT * FROM shop_items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(item) = item {
            let inserted = sqlx::query(
                "INSERT INTO user_inventory (user_id, shop_item_id, source, acquired_at) VALUES ($1, $2, 'challenge', NOW()) ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(item.id)
            .execute(&mut *conn)
            .await?;
            if inserted.rows_affected() == 1 {
                grant.shop_item = Some(item);
            }
        }
    }

    Ok(grant)
}

/// `POST /challenges/progress/:id/claim` body of work.
pub async fn claim(
    state: &AppState,
    user_id: Uuid,
    progress_id: i32,
) -> AppResult<(UserChallengeProgress, RewardGrant)> {
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let mut progress: UserChallengeProgress =
        sqlx::query_as("SELECT * FROM user_challenge_progress WHERE id = $1 FOR UPDATE")
            .bind(progress_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Progress not found".into()))?;

    let challenge: Challenge = sqlx::query_as("SELECT * FROM challenges WHERE id = $1")
        .bind(progress.challenge_id)
        .fetch_one(&mut *tx)
        .await?;

    let grant = claim_locked(&mut *tx, user_id, &mut progress, &challenge, now).await?;
    tx.commit().await?;

    tracing::info!(
        %user_id,
        progress_id,
        challenge_id = challenge.id,
        points = grant.points,
        badge = ?grant.badge.as_ref().map(|b| b.id),
        shop_item = ?grant.shop_item.as_ref().map(|i| i.id),
        level = grant.level_after,
        "challenge reward claimed"
    );

    notifier::notify_all(
        &state.db,
        &state.hub,
        notifier::reward_notifications(user_id, &challenge, &grant),
    )
    .await;

    Ok((progress, grant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::challenge::ChallengeType;
    use crate::services::{challenges, progress_tracker};
    use crate::test_support;
    use sqlx::PgPool;

    async fn completed_attempt(state: &AppState, user: Uuid, points: i64) -> i32 {
        let c = test_support::challenge(&state.db, ChallengeType::ReadChapters, 1, points).await;
        let progress = challenges::join(state, user, c.id).await.unwrap();
        let changes = progress_tracker::record_activity(state, user, &[test_support::chapter(1)])
            .await
            .unwrap();
        assert_eq!(changes[0].status, ProgressStatus::Completed);
        progress.id
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn second_claim_conflicts_and_pays_once(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let progress_id = completed_attempt(&state, user, 40).await;

        let (progress, grant) = claim(&state, user, progress_id).await.unwrap();
        assert_eq!(progress.status, ProgressStatus::RewardClaimed);
        assert_eq!(grant.points, 40);
        assert_eq!(grant.balance, 40);

        let err = claim(&state, user, progress_id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(test_support::ledger_rows(&pool, user).await, 1);
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn concurrent_claims_pay_once(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let progress_id = completed_attempt(&state, user, 25).await;

        let (a, b) = tokio::join!(
            claim(&state, user, progress_id),
            claim(&state, user, progress_id)
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(test_support::ledger_rows(&pool, user).await, 1);

        let balance: i64 = sqlx::query_scalar("SELECT points FROM users WHERE id = $1")
            .bind(user)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(balance, 25);
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn only_the_owner_can_claim(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let owner = test_support::user(&pool).await;
        let other = test_support::user(&pool).await;
        let progress_id = completed_attempt(&state, owner, 10).await;

        let err = claim(&state, other, progress_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(test_support::ledger_rows(&pool, other).await, 0);
    }
}
