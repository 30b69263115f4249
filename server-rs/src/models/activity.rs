use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::challenge::ContentType;

/// A qualifying thing a user did. Every variant carries the attributes the
/// challenge criteria can match against.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ActivityEvent {
    MovieWatched {
        movie_id: i64,
        genre_ids: Vec<i32>,
    },
    EpisodeWatched {
        episode_id: i64,
        series_id: i64,
        genre_ids: Vec<i32>,
    },
    SeriesCompleted {
        series_id: i64,
        genre_ids: Vec<i32>,
    },
    ChapterRead {
        chapter_id: i64,
        comic_id: i64,
        genre_ids: Vec<i32>,
    },
    ComicCompleted {
        comic_id: i64,
        genre_ids: Vec<i32>,
    },
    RatingSubmitted {
        content_type: ContentType,
        content_id: i64,
        rating: i16,
    },
    Login {
        date: NaiveDate,
    },
    FriendAdded {
        friend_id: Uuid,
    },
    CollectionCreated {
        collection_id: i64,
        item_count: i32,
    },
}

impl ActivityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ActivityEvent::MovieWatched { .. } => "movie_watched",
            ActivityEvent::EpisodeWatched { .. } => "episode_watched",
            ActivityEvent::SeriesCompleted { .. } => "series_completed",
            ActivityEvent::ChapterRead { .. } => "chapter_read",
            ActivityEvent::ComicCompleted { .. } => "comic_completed",
            ActivityEvent::RatingSubmitted { .. } => "rating_submitted",
            ActivityEvent::Login { .. } => "login",
            ActivityEvent::FriendAdded { .. } => "friend_added",
            ActivityEvent::CollectionCreated { .. } => "collection_created",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedRequest {
    #[serde(default)]
    pub genre_ids: Vec<i32>,
    pub series_id: Option<i64>,
    #[serde(default)]
    pub episode: bool,
    #[serde(default)]
    pub series_completed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterReadRequest {
    pub comic_id: i64,
    #[serde(default)]
    pub genre_ids: Vec<i32>,
    #[serde(default)]
    pub comic_completed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    pub content_type: ContentType,
    pub content_id: i64,
    pub rating: i16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRequest {
    pub name: String,
    #[serde(default)]
    pub item_ids: Vec<i64>,
}
