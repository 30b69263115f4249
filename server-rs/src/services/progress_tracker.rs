use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::activity::ActivityEvent;
use crate::models::challenge::Challenge;
use crate::models::notification::NewNotification;
use crate::models::progress::{ProgressChange, ProgressStatus, UserChallengeProgress};
use crate::services::challenge_engine::{self, ProgressOutcome};
use crate::services::{notifier, rewards};
use crate::AppState;

/// Feeds a user's events into every IN_PROGRESS attempt they hold.
///
/// The attempts are locked for the whole evaluation, so two requests for the
/// same user are applied one after the other rather than overwriting each
/// other's counters.
pub async fn record_activity(
    state: &AppState,
    user_id: Uuid,
    events: &[ActivityEvent],
) -> AppResult<Vec<ProgressChange>> {
    if events.is_empty() {
        return Ok(vec![]);
    }
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let mut attempts: Vec<UserChallengeProgress> = sqlx::query_as(
        "SELECT * FROM user_challenge_progress WHERE user_id = $1 AND status = $2 ORDER BY id FOR UPDATE",
    )
    .bind(user_id)
    .bind(ProgressStatus::InProgress)
    .fetch_all(&mut *tx)
    .await?;

    if attempts.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<i32> = attempts.iter().map(|a| a.challenge_id).collect();
    let challenges: HashMap<i32, Challenge> =
        sqlx::query_as::<_, Challenge>("SELECT * FROM challenges WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

    let mut changes = Vec::new();
    let mut outbox: Vec<NewNotification> = Vec::new();

    for attempt in attempts.iter_mut() {
        let Some(challenge) = challenges.get(&attempt.challenge_id) else {
            continue;
        };
        if !challenge.is_active {
            continue;
        }
        // An end date set after joining still bounds the attempt.
        if let Some(end) = challenge.end_date {
            attempt.expires_at = Some(attempt.expires_at.map_or(end, |e| e.min(end)));
        }

        let mut changed = false;
        let mut last = ProgressOutcome::NotApplicable;
        for event in events {
            let outcome = challenge_engine::apply_event(challenge, attempt, event, now);
            if outcome.changed_row() {
                changed = true;
                last = outcome;
            }
            tracing::debug!(
                %user_id,
                challenge_id = challenge.id,
                event = event.name(),
                ?outcome,
                "evaluated activity"
            );
            if attempt.status != ProgressStatus::InProgress {
                break;
            }
        }
        if !changed {
            continue;
        }

        sqlx::query(
            r#"UPDATE user_challenge_progress
            SET current_count = $1, progress_details = $2, status = $3, completed_at = $4
            WHERE id = $5"#,
        )
        .bind(attempt.current_count)
        .bind(&attempt.progress_details)
        .bind(attempt.status)
        .bind(attempt.completed_at)
        .bind(attempt.id)
        .execute(&mut *tx)
        .await?;

        match last {
            ProgressOutcome::Completed => {
                tracing::info!(
                    %user_id,
                    challenge_id = challenge.id,
                    progress_id = attempt.id,
                    "challenge completed"
                );
                if state.config.challenges.auto_claim {
                    let grant =
                        rewards::claim_locked(&mut *tx, user_id, attempt, challenge, now).await?;
                    outbox.extend(notifier::reward_notifications(user_id, challenge, &grant));
                } else {
                    outbox.push(notifier::challenge_completed(user_id, challenge));
                }
            }
            ProgressOutcome::Expired => {
                tracing::info!(
                    %user_id,
                    challenge_id = challenge.id,
                    progress_id = attempt.id,
                    "challenge attempt expired"
                );
                outbox.push(notifier::challenge_failed(user_id, challenge.id, &challenge.title));
            }
            _ => {}
        }

        changes.push(ProgressChange {
            progress_id: attempt.id,
            challenge_id: challenge.id,
            status: attempt.status,
            current_count: attempt.current_count,
            target_count: challenge.target_count,
        });
    }

    tx.commit().await?;
    notifier::notify_all(&state.db, &state.hub, outbox).await;
    Ok(changes)
}

/// Re-applies an edited challenge to every running attempt of it: counters
/// are clamped to the new target and attempts that meet it complete. Runs in
/// the caller's transaction; the returned notifications go out after commit.
pub async fn retarget_attempts(
    conn: &mut PgConnection,
    challenge: &Challenge,
    auto_claim: bool,
    now: DateTime<Utc>,
) -> AppResult<Vec<NewNotification>> {
    let mut attempts: Vec<UserChallengeProgress> = sqlx::query_as(
        "SELECT * FROM user_challenge_progress WHERE challenge_id = $1 AND status = $2 ORDER BY id FOR UPDATE",
    )
    .bind(challenge.id)
    .bind(ProgressStatus::InProgress)
    .fetch_all(&mut *conn)
    .await?;

    let mut outbox = Vec::new();
    for attempt in attempts.iter_mut() {
        let outcome = challenge_engine::retarget(challenge, attempt, now);
        if !outcome.changed_row() {
            continue;
        }
        sqlx::query(
            "UPDATE user_challenge_progress SET current_count = $1, status = $2, completed_at = $3 WHERE id = $4",
        )
        .bind(attempt.current_count)
        .bind(attempt.status)
        .bind(attempt.completed_at)
        .bind(attempt.id)
        .execute(&mut *conn)
        .await?;

        let user_id = attempt.user_id;
        match outcome {
            ProgressOutcome::Completed if auto_claim => {
                let grant = rewards::claim_locked(&mut *conn, user_id, attempt, challenge, now).await?;
                outbox.extend(notifier::reward_notifications(user_id, challenge, &grant));
            }
            ProgressOutcome::Completed => {
                outbox.push(notifier::challenge_completed(user_id, challenge));
            }
            ProgressOutcome::Expired => {
                outbox.push(notifier::challenge_failed(user_id, challenge.id, &challenge.title));
            }
            _ => {}
        }
        tracing::info!(
            %user_id,
            challenge_id = challenge.id,
            progress_id = attempt.id,
            ?outcome,
            "attempt re-evaluated after challenge edit"
        );
    }
    Ok(outbox)
}

/// Same as [`record_activity`] but never fails the surrounding request:
/// the primary write (rating, friendship, ...) has already happened.
pub async fn record_activity_logged(
    state: &AppState,
    user_id: Uuid,
    events: &[ActivityEvent],
) -> Vec<ProgressChange> {
    match record_activity(state, user_id, events).await {
        Ok(changes) => changes,
        Err(e) => {
            tracing::error!(%user_id, error = %e, "challenge progress update failed");
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::challenge::ChallengeType;
    use crate::services::challenges;
    use crate::test_support::{self, chapter};
    use sqlx::PgPool;

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn auto_claim_grants_exactly_once(pool: PgPool) {
        let state = test_support::state(pool.clone(), true);
        let user = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::ReadChapters, 2, 30).await;
        let progress = challenges::join(&state, user, c.id).await.unwrap();

        record_activity(&state, user, &[chapter(1)]).await.unwrap();
        let changes = record_activity(&state, user, &[chapter(2), chapter(3)])
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].status, ProgressStatus::RewardClaimed);
        assert_eq!(changes[0].current_count, 2);

        // nothing left in progress, so later events change nothing
        assert!(record_activity(&state, user, &[chapter(4)]).await.unwrap().is_empty());
        assert_eq!(test_support::ledger_rows(&pool, user).await, 1);

        let err = rewards::claim(&state, user, progress.id).await.unwrap_err();
        assert!(matches!(err, crate::error::AppError::Conflict(_)));
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn retarget_completes_attempts_at_the_new_target(pool: PgPool) {
        let state = test_support::state(pool.clone(), false);
        let ahead = test_support::user(&pool).await;
        let behind = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::ReadChapters, 5, 10).await;
        challenges::join(&state, ahead, c.id).await.unwrap();
        challenges::join(&state, behind, c.id).await.unwrap();
        record_activity(&state, ahead, &[chapter(1), chapter(2), chapter(3)])
            .await
            .unwrap();
        record_activity(&state, behind, &[chapter(1)]).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let lowered: Challenge =
            sqlx::query_as("UPDATE challenges SET target_count = 2 WHERE id = $1 RETURNING *")
                .bind(c.id)
                .fetch_one(&mut *tx)
                .await
                .unwrap();
        let outbox = retarget_attempts(&mut *tx, &lowered, false, Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].user_id, ahead);

        let rows: Vec<(Uuid, i32, ProgressStatus)> = sqlx::query_as(
            "SELECT user_id, current_count, status FROM user_challenge_progress WHERE challenge_id = $1",
        )
        .bind(c.id)
        .fetch_all(&pool)
        .await
        .unwrap();
        for (user, count, status) in rows {
            assert!(count <= 2);
            if user == ahead {
                assert_eq!((count, status), (2, ProgressStatus::Completed));
            } else {
                assert_eq!((count, status), (1, ProgressStatus::InProgress));
            }
        }
    }
}
