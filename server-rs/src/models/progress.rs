use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    InProgress,
    Completed,
    RewardClaimed,
    Failed,
}

impl ProgressStatus {
    /// Allowed moves: IN_PROGRESS -> COMPLETED -> REWARD_CLAIMED, and
    /// IN_PROGRESS -> FAILED. Nothing leaves REWARD_CLAIMED or FAILED.
    pub fn can_transition_to(self, next: ProgressStatus) -> bool {
        matches!(
            (self, next),
            (ProgressStatus::InProgress, ProgressStatus::Completed)
                | (ProgressStatus::InProgress, ProgressStatus::Failed)
                | (ProgressStatus::Completed, ProgressStatus::RewardClaimed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move progress from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: ProgressStatus,
    pub to: ProgressStatus,
}

/// Item keys already counted for one attempt. Keys are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetails {
    #[serde(default)]
    pub counted: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_date: Option<NaiveDate>,
}

impl ProgressDetails {
    pub fn contains(&self, key: &str) -> bool {
        self.counted.iter().any(|k| k == key)
    }

    /// Returns false when the key was already present.
    pub fn record(&mut self, key: String) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.counted.push(key);
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserChallengeProgress {
    pub id: i32,
    pub user_id: Uuid,
    pub challenge_id: i32,
    pub current_count: i32,
    pub progress_details: Json<ProgressDetails>,
    pub status: ProgressStatus,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reward_claimed_at: Option<DateTime<Utc>>,
}

impl UserChallengeProgress {
    pub fn transition(
        &mut self,
        next: ProgressStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            ProgressStatus::Completed => self.completed_at = Some(now),
            ProgressStatus::RewardClaimed => self.reward_claimed_at = Some(now),
            ProgressStatus::InProgress | ProgressStatus::Failed => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ProgressStatus::InProgress && self.expires_at.map_or(false, |e| now > e)
    }
}

/// Compact summary returned by activity endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressChange {
    pub progress_id: i32,
    pub challenge_id: i32,
    pub status: ProgressStatus,
    pub current_count: i32,
    pub target_count: i32,
}
