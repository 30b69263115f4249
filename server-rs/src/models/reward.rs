use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A badge as listed to a user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BadgeListing {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub badge: Badge,
    pub owned: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeInput {
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShopItem {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub item_type: String,
    pub price: i64,
    pub icon_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopItemInput {
    pub name: String,
    pub description: Option<String>,
    pub item_type: String,
    pub price: i64,
    pub icon_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OwnedBadge {
    pub badge_id: i32,
    pub name: String,
    pub slug: String,
    pub icon_url: Option<String>,
    pub source: String,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub shop_item_id: i32,
    pub name: String,
    pub item_type: String,
    pub source: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointTransaction {
    pub id: i64,
    pub user_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
    pub reason: String,
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a successful claim handed out.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardGrant {
    pub points: i64,
    pub balance: i64,
    pub badge: Option<Badge>,
    pub shop_item: Option<ShopItem>,
    pub level_before: i32,
    pub level_after: i32,
}

impl RewardGrant {
    pub fn leveled_up(&self) -> bool {
        self.level_after > self.level_before
    }
}
