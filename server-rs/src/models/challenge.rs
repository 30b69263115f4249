use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::models::progress::UserChallengeProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeType {
    WatchMovies,
    WatchGenre,
    WatchSpecificMovies,
    WatchEpisodes,
    CompleteSeries,
    ReadChapters,
    ReadComicGenre,
    CompleteComics,
    RateContent,
    DailyLoginStreak,
    AddFriends,
    CreateCollection,
}

impl ChallengeType {
    pub const ALL: [ChallengeType; 12] = [
        ChallengeType::WatchMovies,
        ChallengeType::WatchGenre,
        ChallengeType::WatchSpecificMovies,
        ChallengeType::WatchEpisodes,
        ChallengeType::CompleteSeries,
        ChallengeType::ReadChapters,
        ChallengeType::ReadComicGenre,
        ChallengeType::CompleteComics,
        ChallengeType::RateContent,
        ChallengeType::DailyLoginStreak,
        ChallengeType::AddFriends,
        ChallengeType::CreateCollection,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Series,
    Comic,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Series => "series",
            ContentType::Comic => "comic",
        }
    }
}

/// Parameters narrowing which events count toward a challenge. Which keys
/// are required or allowed depends on the challenge type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChallengeCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre_ids: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movie_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comic_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: i32,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub target_count: i32,
    pub criteria: Json<ChallengeCriteria>,
    pub points_reward: i64,
    pub badge_id: Option<i32>,
    pub shop_item_id: Option<i32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_for_user_days: Option<i32>,
    pub is_active: bool,
    pub is_repeatable: bool,
    pub repeat_interval_days: Option<i32>,
    pub required_level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Challenge {
    /// Active and inside its validity window at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date.map_or(true, |s| s <= now)
            && self.end_date.map_or(true, |e| now <= e)
    }
}

/// Admin create/update body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeInput {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub target_count: i32,
    #[serde(default)]
    pub criteria: ChallengeCriteria,
    #[serde(default)]
    pub points_reward: i64,
    pub badge_id: Option<i32>,
    pub shop_item_id: Option<i32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_for_user_days: Option<i32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_repeatable: bool,
    pub repeat_interval_days: Option<i32>,
    #[serde(default = "default_level")]
    pub required_level: i32,
}

fn default_true() -> bool {
    true
}

fn default_level() -> i32 {
    1
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub progress: Option<UserChallengeProgress>,
    pub can_join: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProgressListQuery {
    pub status: Option<crate::models::progress::ProgressStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn criteria_rejects_unknown_keys() {
        let err = serde_json::from_value::<ChallengeCriteria>(json!({"genre": [1]}));
        assert!(err.is_err());
    }

    #[test]
    fn criteria_uses_camel_case_keys() {
        let c: ChallengeCriteria =
            serde_json::from_value(json!({"genreIds": [3, 7], "minRating": 8})).unwrap();
        assert_eq!(c.genre_ids, Some(vec![3, 7]));
        assert_eq!(c.min_rating, Some(8));
        assert_eq!(
            serde_json::to_value(&c).unwrap(),
            json!({"genreIds": [3, 7], "minRating": 8})
        );
    }

    #[test]
    fn type_names_are_screaming_snake() {
        assert_eq!(
            serde_json::to_value(ChallengeType::DailyLoginStreak).unwrap(),
            json!("DAILY_LOGIN_STREAK")
        );
        let t: ChallengeType = serde_json::from_value(json!("READ_COMIC_GENRE")).unwrap();
        assert_eq!(t, ChallengeType::ReadComicGenre);
    }

    #[test]
    fn input_defaults() {
        let input: ChallengeInput = serde_json::from_value(json!({
            "title": "Movie marathon",
            "type": "WATCH_MOVIES",
            "targetCount": 5
        }))
        .unwrap();
        assert!(input.is_active);
        assert!(!input.is_repeatable);
        assert_eq!(input.required_level, 1);
        assert_eq!(input.points_reward, 0);
        assert_eq!(input.criteria, ChallengeCriteria::default());
    }
}
