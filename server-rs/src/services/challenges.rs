use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::models::challenge::{Challenge, ChallengeView};
use crate::models::progress::{ProgressStatus, UserChallengeProgress};
use crate::services::{catalogue, challenge_engine, expiry};
use crate::AppState;

async fn user_level(db: &sqlx::PgPool, user_id: Uuid) -> AppResult<i32> {
    sqlx::query_scalar("SELECT level FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

/// Open challenges with the caller's latest attempt for each.
pub async fn list_for_user(state: &AppState, user_id: Uuid) -> AppResult<Vec<ChallengeView>> {
    expiry::sweep_expired(state, Some(user_id)).await?;
    let now = Utc::now();
    let level = user_level(&state.db, user_id).await?;

    let open: Vec<Challenge> = catalogue::active_challenges(state)
        .await?
        .into_iter()
        .filter(|c| c.is_open_at(now))
        .collect();
    let ids: Vec<i32> = open.iter().map(|c| c.id).collect();

    let attempts: Vec<UserChallengeProgress> = sqlx::query_as(
        "SELECT * FROM user_challenge_progress WHERE user_id = $1 AND challenge_id = ANY($2) ORDER BY started_at",
    )
    .bind(user_id)
    .bind(&ids)
    .fetch_all(&state.db)
    .await?;

    let mut by_challenge: HashMap<i32, Vec<UserChallengeProgress>> = HashMap::new();
    for a in attempts {
        by_challenge.entry(a.challenge_id).or_default().push(a);
    }

    Ok(open
        .into_iter()
        .map(|challenge| {
            let history = by_challenge.remove(&challenge.id).unwrap_or_default();
            let can_join = challenge_engine::check_join(&challenge, &history, level, now).is_ok();
            ChallengeView {
                progress: history.into_iter().last(),
                can_join,
                challenge,
            }
        })
        .collect())
}

pub async fn get_by_slug(state: &AppState, user_id: Uuid, slug: &str) -> AppResult<ChallengeView> {
    let challenge: Challenge =
        sqlx::query_as("SELECT * FROM challenges WHERE slug = $1 AND is_active = true")
            .bind(slug)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Challenge not found".into()))?;

    expiry::sweep_expired(state, Some(user_id)).await?;
    let level = user_level(&state.db, user_id).await?;
    let history: Vec<UserChallengeProgress> = sqlx::query_as(
        "SELECT * FROM user_challenge_progress WHERE user_id = $1 AND challenge_id = $2 ORDER BY started_at",
    )
    .bind(user_id)
    .bind(challenge.id)
    .fetch_all(&state.db)
    .await?;

    let can_join = challenge_engine::check_join(&challenge, &history, level, Utc::now()).is_ok();
    Ok(ChallengeView {
        progress: history.into_iter().last(),
        can_join,
        challenge,
    })
}

/// Starts a new attempt. Concurrent joins by the same user are serialized
/// on the user row; the partial unique index backs this up.
pub async fn join(
    state: &AppState,
    user_id: Uuid,
    challenge_id: i32,
) -> AppResult<UserChallengeProgress> {
    expiry::sweep_expired(state, Some(user_id)).await?;
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let level: i32 = sqlx::query_scalar("SELECT level FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let challenge: Challenge = sqlx::query_as("SELECT * FROM challenges WHERE id = $1")
        .bind(challenge_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Challenge not found".into()))?;

    let history: Vec<UserChallengeProgress> = sqlx::query_as(
        "SELECT * FROM user_challenge_progress WHERE user_id = $1 AND challenge_id = $2 ORDER BY started_at",
    )
    .bind(user_id)
    .bind(challenge_id)
    .fetch_all(&mut *tx)
    .await?;

    let expires_at = challenge_engine::check_join(&challenge, &history, level, now)?;

    let progress: UserChallengeProgress = sqlx::query_as(
        r#"INSERT INTO user_challenge_progress
            (user_id, challenge_id, current_count, progress_details, status, started_at, expires_at)
        VALUES ($1, $2, 0, '{"counted": []}'::jsonb, $3, $4, $5)
        RETURNING *"#,
    )
    .bind(user_id)
    .bind(challenge_id)
    .bind(ProgressStatus::InProgress)
    .bind(now)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Challenge already joined".into())
        } else {
            AppError::from(e)
        }
    })?;

    tx.commit().await?;
    tracing::info!(
        %user_id,
        challenge_id,
        progress_id = progress.id,
        expires_at = ?progress.expires_at,
        "challenge joined"
    );
    Ok(progress)
}

/// Abandons the caller's running attempt; it counts as FAILED.
pub async fn leave(
    state: &AppState,
    user_id: Uuid,
    challenge_id: i32,
) -> AppResult<UserChallengeProgress> {
    let progress: UserChallengeProgress = sqlx::query_as(
        "UPDATE user_challenge_progress SET status = $1 WHERE user_id = $2 AND challenge_id = $3 AND status = $4 RETURNING *",
    )
    .bind(ProgressStatus::Failed)
    .bind(user_id)
    .bind(challenge_id)
    .bind(ProgressStatus::InProgress)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("No running attempt for this challenge".into()))?;

    tracing::info!(%user_id, challenge_id, progress_id = progress.id, "challenge abandoned");
    Ok(progress)
}

pub async fn my_progress(
    state: &AppState,
    user_id: Uuid,
    status: Option<ProgressStatus>,
) -> AppResult<Vec<UserChallengeProgress>> {
    expiry::sweep_expired(state, Some(user_id)).await?;
    let rows = sqlx::query_as(
        "SELECT * FROM user_challenge_progress WHERE user_id = $1 AND ($2::varchar IS NULL OR status = $2) ORDER BY started_at DESC",
    )
    .bind(user_id)
    .bind(status)
    .fetch_all(&state.db)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::challenge::ChallengeType;
    use crate::test_support;
    use sqlx::PgPool;

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn second_join_conflicts(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::WatchMovies, 3, 10).await;

        join(&state, user, c.id).await.unwrap();
        let err = join(&state, user, c.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn concurrent_joins_start_one_attempt(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::WatchMovies, 3, 10).await;

        let (a, b) = tokio::join!(join(&state, user, c.id), join(&state, user, c.id));
        let failed: Vec<_> = [a, b].into_iter().filter_map(Result::err).collect();
        assert_eq!(failed.len(), 1);
        assert!(matches!(failed[0], AppError::Conflict(_)));

        let running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_challenge_progress WHERE user_id = $1 AND status = 'IN_PROGRESS'",
        )
        .bind(user)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(running, 1);
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn index_rejects_a_second_running_row(pool: PgPool) {
        let user = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::WatchMovies, 3, 10).await;
        let insert = "INSERT INTO user_challenge_progress (user_id, challenge_id) VALUES ($1, $2)";

        sqlx::query(insert).bind(user).bind(c.id).execute(&pool).await.unwrap();
        let err = sqlx::query(insert)
            .bind(user)
            .bind(c.id)
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn listing_survives_oversized_stored_windows(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::WatchMovies, 3, 10).await;
        sqlx::query("UPDATE challenges SET duration_for_user_days = 3650 WHERE id = $1")
            .bind(c.id)
            .execute(&pool)
            .await
            .unwrap();

        let views = list_for_user(&state, user).await.unwrap();
        let view = views.iter().find(|v| v.challenge.id == c.id).unwrap();
        assert!(view.can_join);

        let too_long = sqlx::query("UPDATE challenges SET duration_for_user_days = 2000000000 WHERE id = $1")
            .bind(c.id)
            .execute(&pool)
            .await;
        assert!(too_long.is_err());
    }
}
