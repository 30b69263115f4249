use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::activity::*;
use crate::services::progress_tracker;
use crate::AppState;

const MAX_COLLECTION_ITEMS: usize = 500;

/// Events a watch produces: a movie, or an episode plus the series when
/// this episode finished it.
fn watch_events(id: i64, body: &WatchedRequest) -> AppResult<Vec<ActivityEvent>> {
    if !body.episode {
        return Ok(vec![ActivityEvent::MovieWatched {
            movie_id: id,
            genre_ids: body.genre_ids.clone(),
        }]);
    }
    let series_id = body
        .series_id
        .ok_or_else(|| AppError::BadRequest("seriesId is required for episodes".into()))?;

    let mut events = vec![ActivityEvent::EpisodeWatched {
        episode_id: id,
        series_id,
        genre_ids: body.genre_ids.clone(),
    }];
    if body.series_completed {
        events.push(ActivityEvent::SeriesCompleted {
            series_id,
            genre_ids: body.genre_ids.clone(),
        });
    }
    Ok(events)
}

/// (movie_id, episode_id) for the watch history row.
fn history_ids(id: i64, body: &WatchedRequest) -> (Option<i64>, Option<i64>) {
    if body.episode {
        (None, Some(id))
    } else {
        (Some(id), None)
    }
}

fn read_events(chapter_id: i64, body: &ChapterReadRequest) -> Vec<ActivityEvent> {
    let mut events = vec![ActivityEvent::ChapterRead {
        chapter_id,
        comic_id: body.comic_id,
        genre_ids: body.genre_ids.clone(),
    }];
    if body.comic_completed {
        events.push(ActivityEvent::ComicCompleted {
            comic_id: body.comic_id,
            genre_ids: body.genre_ids.clone(),
        });
    }
    events
}

fn validate_collection(body: &CollectionRequest) -> AppResult<()> {
    let name = body.name.trim();
    if name.is_empty() || name.chars().count() > 120 {
        return Err(AppError::BadRequest(
            "Collection name must be 1-120 characters".into(),
        ));
    }
    if body.item_ids.len() > MAX_COLLECTION_ITEMS {
        return Err(AppError::BadRequest(format!(
            "A collection holds at most {MAX_COLLECTION_ITEMS} items"
        )));
    }
    Ok(())
}

pub async fn movie_watched(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<WatchedRequest>,
) -> AppResult<Json<Value>> {
    let events = watch_events(id, &body)?;
    let (movie_id, episode_id) = history_ids(id, &body);

    sqlx::query(
        "INSERT INTO watch_history (user_id, movie_id, episode_id, series_id, watched_at) VALUES ($1, $2, $3, $4, NOW())",
    )
    .bind(user.id)
    .bind(movie_id)
    .bind(episode_id)
    .bind(body.series_id)
    .execute(&state.db)
    .await?;

    let changes = progress_tracker::record_activity_logged(&state, user.id, &events).await;
    Ok(Json(json!({ "recorded": true, "changes": changes })))
}

pub async fn chapter_read(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(chapter_id): Path<i64>,
    Json(body): Json<ChapterReadRequest>,
) -> AppResult<Json<Value>> {
    sqlx::query(
        "INSERT INTO reading_history (user_id, chapter_id, comic_id, read_at) VALUES ($1, $2, $3, NOW())",
    )
    .bind(user.id)
    .bind(chapter_id)
    .bind(body.comic_id)
    .execute(&state.db)
    .await?;

    let events = read_events(chapter_id, &body);
    let changes = progress_tracker::record_activity_logged(&state, user.id, &events).await;
    Ok(Json(json!({ "recorded": true, "changes": changes })))
}

pub async fn rate(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Json(body): Json<RatingRequest>,
) -> AppResult<Json<Value>> {
    if !(1..=10).contains(&body.rating) {
        return Err(AppError::BadRequest("Rating must be between 1 and 10".into()));
    }

    sqlx::query(
        r#"INSERT INTO ratings (user_id, content_type, content_id, rating, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (user_id, content_type, content_id)
        DO UPDATE SET rating = EXCLUDED.rating, updated_at = NOW()"#,
    )
    .bind(user.id)
    .bind(body.content_type)
    .bind(body.content_id)
    .bind(body.rating)
    .execute(&state.db)
    .await?;

    let event = ActivityEvent::RatingSubmitted {
        content_type: body.content_type,
        content_id: body.content_id,
        rating: body.rating,
    };
    let changes = progress_tracker::record_activity_logged(&state, user.id, &[event]).await;
    Ok(Json(json!({ "recorded": true, "changes": changes })))
}

pub async fn create_collection(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Json(body): Json<CollectionRequest>,
) -> AppResult<Json<Value>> {
    validate_collection(&body)?;

    let collection_id: i64 = sqlx::query_scalar(
        "INSERT INTO collections (user_id, name, item_ids, created_at) VALUES ($1, $2, $3, NOW()) RETURNING id",
    )
    .bind(user.id)
    .bind(body.name.trim())
    .bind(sqlx::types::Json(&body.item_ids))
    .fetch_one(&state.db)
    .await?;

    let event = ActivityEvent::CollectionCreated {
        collection_id,
        item_count: body.item_ids.len() as i32,
    };
    let changes = progress_tracker::record_activity_logged(&state, user.id, &[event]).await;
    Ok(Json(json!({ "collectionId": collection_id, "changes": changes })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watched(episode: bool, series_id: Option<i64>, series_completed: bool) -> WatchedRequest {
        WatchedRequest {
            genre_ids: vec![4],
            series_id,
            episode,
            series_completed,
        }
    }

    #[test]
    fn movie_watch_emits_a_single_event() {
        let events = watch_events(12, &watched(false, None, false)).unwrap();
        assert_eq!(
            events,
            vec![ActivityEvent::MovieWatched {
                movie_id: 12,
                genre_ids: vec![4]
            }]
        );
    }

    #[test]
    fn final_episode_also_completes_the_series() {
        let events = watch_events(301, &watched(true, Some(9), true)).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ActivityEvent::EpisodeWatched { episode_id: 301, series_id: 9, .. }
        ));
        assert!(matches!(events[1], ActivityEvent::SeriesCompleted { series_id: 9, .. }));
    }

    #[test]
    fn episodes_are_logged_under_episode_id() {
        assert_eq!(history_ids(12, &watched(false, None, false)), (Some(12), None));
        assert_eq!(history_ids(301, &watched(true, Some(9), false)), (None, Some(301)));
    }

    #[test]
    fn episode_without_series_is_rejected() {
        assert!(matches!(
            watch_events(301, &watched(true, None, false)),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn finished_comic_adds_completion_event() {
        let body = ChapterReadRequest {
            comic_id: 5,
            genre_ids: vec![],
            comic_completed: true,
        };
        let events = read_events(77, &body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].name(), "comic_completed");
    }

    #[test]
    fn collection_name_is_required() {
        let body = CollectionRequest {
            name: "   ".into(),
            item_ids: vec![1],
        };
        assert!(validate_collection(&body).is_err());
    }
}
