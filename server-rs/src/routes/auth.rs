use axum::{extract::State, Json};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{generate_tokens, verify_token, TokenType};
use crate::models::activity::ActivityEvent;
use crate::models::user::*;
use crate::services::progress_tracker;
use crate::AppState;

const BCRYPT_COST: u32 = 12;

fn validate_registration(body: &RegisterRequest) -> AppResult<()> {
    let email = body.email.trim();
    if email.len() < 3 || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }
    if body.password.len() < 6 {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters".into(),
        ));
    }
    validate_username(&body.username)
}

pub(crate) fn validate_username(username: &str) -> AppResult<()> {
    let len = username.chars().count();
    if !(3..=32).contains(&len)
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(AppError::BadRequest(
            "Username must be 3-32 characters of letters, digits, '_' or '.'".into(),
        ));
    }
    Ok(())
}

fn auth_response(user: &User, state: &AppState) -> AppResult<Json<AuthResponse>> {
    let (token, refresh_token) = generate_tokens(user.id, user.role, &state.config.jwt)?;
    Ok(Json(AuthResponse {
        token,
        refresh_token,
        user: UserPublic::from(user),
    }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    validate_registration(&body)?;
    let email = body.email.trim().to_lowercase();

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 OR username = $2)",
    )
    .bind(&email)
    .bind(&body.username)
    .fetch_one(&state.db)
    .await?;
    if exists {
        return Err(AppError::Conflict("Email or username already registered".into()));
    }

    let password = body.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let user: User = sqlx::query_as(
        r#"INSERT INTO users (id, email, username, password_hash, role, points, lifetime_points, level, created_at, last_login_at)
        VALUES ($1, $2, $3, $4, $5, 0, 0, 1, NOW(), NOW())
        RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&body.username)
    .bind(&password_hash)
    .bind(UserRole::User)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, "user registered");
    auth_response(&user, &state)
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = body.email.trim().to_lowercase();
    let user: User = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid email or password".into()))?;

    let hash = user.password_hash.clone();
    let password = body.password;
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;
    if !valid {
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    }

    sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    let login = ActivityEvent::Login {
        date: Utc::now().date_naive(),
    };
    progress_tracker::record_activity_logged(&state, user.id, &[login]).await;

    auth_response(&user, &state)
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let claims = verify_token(&body.refresh_token, &state.config.jwt.secret)?;
    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Unauthorized("Refresh token required".into()));
    }
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid token".into()))?;

    // Role and profile come from the database, not the old token.
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid token".into()))?;

    auth_response(&user, &state)
}
