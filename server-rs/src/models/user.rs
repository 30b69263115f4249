use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub role: UserRole,
    pub points: i64,
    pub lifetime_points: i64,
    pub level: i32,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdateRequest {
    pub username: Option<String>,
    #[serde(rename = "avatarUrl")]
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserPublic {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub username: String,
    #[serde(rename = "avatarUrl")]
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub role: UserRole,
    pub points: i64,
    #[serde(rename = "lifetimePoints")]
    pub lifetime_points: i64,
    pub level: i32,
    #[serde(rename = "nextLevelAt")]
    pub next_level_at: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserPublic {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.id,
            username: u.username.clone(),
            avatar_url: u.avatar_url.clone(),
            bio: u.bio.clone(),
            role: u.role,
            points: u.points,
            lifetime_points: u.lifetime_points,
            level: u.level,
            next_level_at: points_for_level(u.level + 1),
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    pub user: UserPublic,
}

const POINTS_PER_LEVEL_STEP: i64 = 100;

/// Level reached with `lifetime_points`: 1 at zero, then quadratic steps
/// (100 for level 2, 400 for level 3, 900 for level 4 ...).
pub fn level_for_points(lifetime_points: i64) -> i32 {
    if lifetime_points <= 0 {
        return 1;
    }
    let steps = lifetime_points / POINTS_PER_LEVEL_STEP;
    let mut root = (steps as f64).sqrt() as i64;
    // float sqrt can land one off for large values
    while root * root > steps {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= steps {
        root += 1;
    }
    (root + 1) as i32
}

/// Lifetime points needed to reach `level`.
pub fn points_for_level(level: i32) -> i64 {
    let n = (level.max(1) - 1) as i64;
    n * n * POINTS_PER_LEVEL_STEP
}
