//! Fixtures for tests that run against a migrated Postgres database
//! (`#[sqlx::test]`, needs `DATABASE_URL`).

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::Config;
use crate::middleware::rate_limit::RateLimiter;
use crate::models::activity::ActivityEvent;
use crate::models::challenge::{Challenge, ChallengeType};
use crate::services::notifier::NotificationHub;
use crate::AppState;

pub fn state(db: PgPool, auto_claim: bool) -> AppState {
    let mut config = Config::for_tests();
    config.challenges.auto_claim = auto_claim;
    AppState {
        db,
        cache: Cache::disabled("test:"),
        config: Arc::new(config),
        rate_limiter: RateLimiter::new(1000, 60),
        hub: NotificationHub::new(),
    }
}

pub async fn user(db: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    let tag = &id.simple().to_string()[..12];
    sqlx::query("INSERT INTO users (id, email, username, password_hash) VALUES ($1, $2, $3, 'x')")
        .bind(id)
        .bind(format!("{tag}@example.test"))
        .bind(format!("user_{tag}"))
        .execute(db)
        .await
        .unwrap();
    id
}

pub async fn challenge(db: &PgPool, t: ChallengeType, target: i32, points: i64) -> Challenge {
    let slug = format!("c-{}", &Uuid::new_v4().simple().to_string()[..12]);
    sqlx::query_as(
        r#"INSERT INTO challenges (title, slug, challenge_type, target_count, points_reward)
        VALUES ($1, $1, $2, $3, $4) RETURNING *"#,
    )
    .bind(slug)
    .bind(t)
    .bind(target)
    .bind(points)
    .fetch_one(db)
    .await
    .unwrap()
}

pub fn chapter(chapter_id: i64) -> ActivityEvent {
    ActivityEvent::ChapterRead {
        chapter_id,
        comic_id: 1,
        genre_ids: vec![],
    }
}

pub async fn ledger_rows(db: &PgPool, user_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM point_transactions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await
        .unwrap()
}
