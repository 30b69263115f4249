use crate::error::AppResult;
use crate::models::challenge::Challenge;
use crate::AppState;

const ACTIVE_KEY: &str = "challenges:active";

/// Active challenges, served from Redis when fresh. Window filtering is left
/// to the caller since the cached list may outlive a start or end date.
pub async fn active_challenges(state: &AppState) -> AppResult<Vec<Challenge>> {
    let ttl = state.config.challenges.catalogue_cache_secs;
    if ttl > 0 {
        if let Some(cached) = state.cache.get_json::<Vec<Challenge>>(ACTIVE_KEY).await {
            return Ok(cached);
        }
    }

    let rows: Vec<Challenge> = sqlx::query_as(
        "SELECT * FROM challenges WHERE is_active = true ORDER BY required_level, created_at DESC",
    )
    .fetch_all(&state.db)
    .await?;

    if ttl > 0 {
        state.cache.set_json(ACTIVE_KEY, &rows, ttl).await;
    }
    Ok(rows)
}

pub async fn invalidate(state: &AppState) {
    state.cache.del(ACTIVE_KEY).await;
}
