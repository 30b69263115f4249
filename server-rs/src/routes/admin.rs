use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::challenge::{Challenge, ChallengeInput};
use crate::models::progress::ProgressStatus;
use crate::models::reward::*;
use crate::models::taxonomy::*;
use crate::services::slug::{unique_slug, SlugTable};
use crate::services::{catalogue, challenge_engine, notifier, progress_tracker};
use crate::AppState;

fn conflict_on_duplicate(what: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("{what} already exists"))
        } else {
            AppError::from(e)
        }
    }
}

fn require_name(name: &str, max: usize) -> AppResult<()> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > max {
        return Err(AppError::BadRequest(format!(
            "name must be 1-{max} characters"
        )));
    }
    Ok(())
}

/// Upper-cased ISO 3166-1 alpha-2 code.
fn country_code(code: &str) -> AppResult<String> {
    let code = code.trim().to_ascii_uppercase();
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(AppError::BadRequest(
            "code must be a two-letter country code".into(),
        ));
    }
    Ok(code)
}

fn validate_shop_item(input: &ShopItemInput) -> AppResult<()> {
    require_name(&input.name, 120)?;
    if input.item_type.trim().is_empty() {
        return Err(AppError::BadRequest("itemType is required".into()));
    }
    if input.price < 0 {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }
    Ok(())
}

/// Rejects references to badges or shop items that do not exist.
async fn check_reward_refs(state: &AppState, input: &ChallengeInput) -> AppResult<()> {
    if let Some(id) = input.badge_id {
        let found: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM badges WHERE id = $1)")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
        if !found {
            return Err(AppError::BadRequest(format!("badge {id} does not exist")));
        }
    }
    if let Some(id) = input.shop_item_id {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM shop_items WHERE id = $1)")
                .bind(id)
                .fetch_one(&state.db)
                .await?;
        if !found {
            return Err(AppError::BadRequest(format!("shop item {id} does not exist")));
        }
    }
    Ok(())
}

async fn load_challenge(state: &AppState, id: i32) -> AppResult<Challenge> {
    sqlx::query_as("SELECT * FROM challenges WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Challenge not found".into()))
}

// --- Challenges ---

pub async fn list_challenges(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let challenges: Vec<Challenge> =
        sqlx::query_as("SELECT * FROM challenges ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?;
    Ok(Json(json!({ "challenges": challenges })))
}

pub async fn get_challenge(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let challenge = load_challenge(&state, id).await?;
    let stats: (i64, i64, i64) = sqlx::query_as(
        r#"SELECT
            COUNT(*) FILTER (WHERE status = 'IN_PROGRESS'),
            COUNT(*) FILTER (WHERE status IN ('COMPLETED', 'REWARD_CLAIMED')),
            COUNT(*) FILTER (WHERE status = 'FAILED')
        FROM user_challenge_progress WHERE challenge_id = $1"#,
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({
        "challenge": challenge,
        "participants": { "inProgress": stats.0, "completed": stats.1, "failed": stats.2 },
    })))
}

pub async fn create_challenge(
    State(state): State<AppState>,
    admin: axum::Extension<AuthUser>,
    Json(input): Json<ChallengeInput>,
) -> AppResult<Json<Value>> {
    challenge_engine::validate_input(&input)?;
    check_reward_refs(&state, &input).await?;

    let slug = unique_slug(&state.db, SlugTable::Challenges, &input.title, None).await?;
    let challenge: Challenge = sqlx::query_as(
        r#"INSERT INTO challenges
            (title, slug, description, challenge_type, target_count, criteria, points_reward,
             badge_id, shop_item_id, start_date, end_date, duration_for_user_days,
             is_active, is_repeatable, repeat_interval_days, required_level, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW(), NOW())
        RETURNING *"#,
    )
    .bind(input.title.trim())
    .bind(&slug)
    .bind(&input.description)
    .bind(input.challenge_type)
    .bind(input.target_count)
    .bind(sqlx::types::Json(&input.criteria))
    .bind(input.points_reward)
    .bind(input.badge_id)
    .bind(input.shop_item_id)
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(input.duration_for_user_days)
    .bind(input.is_active)
    .bind(input.is_repeatable)
    .bind(input.repeat_interval_days)
    .bind(input.required_level)
    .fetch_one(&state.db)
    .await
    .map_err(conflict_on_duplicate("Challenge slug"))?;

    catalogue::invalidate(&state).await;
    tracing::info!(admin = %admin.id, challenge_id = challenge.id, slug = %challenge.slug, "challenge created");
    Ok(Json(json!({ "challenge": challenge })))
}

/// Type and criteria are frozen while any attempt is IN_PROGRESS.
fn check_rule_change(existing: &Challenge, input: &ChallengeInput, running: i64) -> AppResult<()> {
    let rule_changed = existing.challenge_type != input.challenge_type
        || existing.criteria.0 != input.criteria;
    if running > 0 && rule_changed {
        return Err(AppError::Conflict(format!(
            "type and criteria cannot change while {running} attempt(s) are in progress"
        )));
    }
    Ok(())
}

pub async fn update_challenge(
    State(state): State<AppState>,
    admin: axum::Extension<AuthUser>,
    Path(id): Path<i32>,
    Json(input): Json<ChallengeInput>,
) -> AppResult<Json<Value>> {
    challenge_engine::validate_input(&input)?;
    check_reward_refs(&state, &input).await?;

    let mut tx = state.db.begin().await?;
    let existing: Challenge = sqlx::query_as("SELECT * FROM challenges WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Challenge not found".into()))?;

    let running: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_challenge_progress WHERE challenge_id = $1 AND status = $2",
    )
    .bind(id)
    .bind(ProgressStatus::InProgress)
    .fetch_one(&mut *tx)
    .await?;
    check_rule_change(&existing, &input, running)?;

    let title = input.title.trim();
    let slug = if title != existing.title {
        unique_slug(&mut *tx, SlugTable::Challenges, title, Some(id)).await?
    } else {
        existing.slug
    };

    let challenge: Challenge = sqlx::query_as(
        r#"UPDATE challenges SET
            title = $1, slug = $2, description = $3, challenge_type = $4, target_count = $5,
            criteria = $6, points_reward = $7, badge_id = $8, shop_item_id = $9,
            start_date = $10, end_date = $11, duration_for_user_days = $12, is_active = $13,
            is_repeatable = $14, repeat_interval_days = $15, required_level = $16, updated_at = NOW()
        WHERE id = $17
        RETURNING *"#,
    )
    .bind(title)
    .bind(&slug)
    .bind(&input.description)
    .bind(input.challenge_type)
    .bind(input.target_count)
    .bind(sqlx::types::Json(&input.criteria))
    .bind(input.points_reward)
    .bind(input.badge_id)
    .bind(input.shop_item_id)
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(input.duration_for_user_days)
    .bind(input.is_active)
    .bind(input.is_repeatable)
    .bind(input.repeat_interval_days)
    .bind(input.required_level)
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(conflict_on_duplicate("Challenge slug"))?;

    let outbox = progress_tracker::retarget_attempts(
        &mut *tx,
        &challenge,
        state.config.challenges.auto_claim,
        Utc::now(),
    )
    .await?;
    tx.commit().await?;

    let notices = outbox.len();
    notifier::notify_all(&state.db, &state.hub, outbox).await;
    catalogue::invalidate(&state).await;
    tracing::info!(admin = %admin.id, challenge_id = id, running, notices, "challenge updated");
    Ok(Json(json!({ "challenge": challenge })))
}

pub async fn delete_challenge(
    State(state): State<AppState>,
    admin: axum::Extension<AuthUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM challenges WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Challenge not found".into()));
    }

    catalogue::invalidate(&state).await;
    tracing::info!(admin = %admin.id, challenge_id = id, "challenge deleted");
    Ok(Json(json!({ "success": true })))
}

pub async fn toggle_challenge(
    State(state): State<AppState>,
    admin: axum::Extension<AuthUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let challenge: Challenge = sqlx::query_as(
        "UPDATE challenges SET is_active = NOT is_active, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Challenge not found".into()))?;

    catalogue::invalidate(&state).await;
    tracing::info!(admin = %admin.id, challenge_id = id, active = challenge.is_active, "challenge toggled");
    Ok(Json(json!({ "challenge": challenge })))
}

// --- Badges ---

pub async fn list_badges(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let badges: Vec<Badge> = sqlx::query_as("SELECT * FROM badges ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(json!({ "badges": badges })))
}

pub async fn get_badge(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let badge: Badge = sqlx::query_as("SELECT * FROM badges WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Badge not found".into()))?;
    Ok(Json(json!({ "badge": badge })))
}

pub async fn create_badge(
    State(state): State<AppState>,
    Json(input): Json<BadgeInput>,
) -> AppResult<Json<Value>> {
    require_name(&input.name, 120)?;
    let slug = unique_slug(&state.db, SlugTable::Badges, &input.name, None).await?;

    let badge: Badge = sqlx::query_as(
        "INSERT INTO badges (name, slug, description, icon_url, created_at) VALUES ($1, $2, $3, $4, NOW()) RETURNING *",
    )
    .bind(input.name.trim())
    .bind(&slug)
    .bind(&input.description)
    .bind(&input.icon_url)
    .fetch_one(&state.db)
    .await
    .map_err(conflict_on_duplicate("Badge slug"))?;

    Ok(Json(json!({ "badge": badge })))
}

pub async fn update_badge(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(input): Json<BadgeInput>,
) -> AppResult<Json<Value>> {
    require_name(&input.name, 120)?;
    let current: Option<String> = sqlx::query_scalar("SELECT name FROM badges WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    let current = current.ok_or_else(|| AppError::NotFound("Badge not found".into()))?;

    let name = input.name.trim();
    let new_slug = if name != current {
        Some(unique_slug(&state.db, SlugTable::Badges, name, Some(id)).await?)
    } else {
        None
    };

    let badge: Badge = sqlx::query_as(
        r#"UPDATE badges SET name = $1, slug = COALESCE($2, slug), description = $3, icon_url = $4
        WHERE id = $5 RETURNING *"#,
    )
    .bind(name)
    .bind(&new_slug)
    .bind(&input.description)
    .bind(&input.icon_url)
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(conflict_on_duplicate("Badge slug"))?
    .ok_or_else(|| AppError::NotFound("Badge not found".into()))?;

    catalogue::invalidate(&state).await;
    Ok(Json(json!({ "badge": badge })))
}

pub async fn delete_badge(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM badges WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Badge not found".into()));
    }
    // challenges referencing it now have badge_id = NULL
    catalogue::invalidate(&state).await;
    Ok(Json(json!({ "success": true })))
}

// --- Shop items ---

pub async fn list_shop_items(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let items: Vec<ShopItem> = sqlx::query_as("SELECT * FROM shop_items ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(json!({ "items": items })))
}

pub async fn get_shop_item(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let item: ShopItem = sqlx::query_as("SELECT * FROM shop_items WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Shop item not found".into()))?;
    Ok(Json(json!({ "item": item })))
}

pub async fn create_shop_item(
    State(state): State<AppState>,
    Json(input): Json<ShopItemInput>,
) -> AppResult<Json<Value>> {
    validate_shop_item(&input)?;
    let slug = unique_slug(&state.db, SlugTable::ShopItems, &input.name, None).await?;

    let item: ShopItem = sqlx::query_as(
        r#"INSERT INTO shop_items (name, slug, description, item_type, price, icon_url, metadata, is_active, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        RETURNING *"#,
    )
    .bind(input.name.trim())
    .bind(&slug)
    .bind(&input.description)
    .bind(input.item_type.trim())
    .bind(input.price)
    .bind(&input.icon_url)
    .bind(&input.metadata)
    .bind(input.is_active)
    .fetch_one(&state.db)
    .await
    .map_err(conflict_on_duplicate("Shop item slug"))?;

    Ok(Json(json!({ "item": item })))
}

pub async fn update_shop_item(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(input): Json<ShopItemInput>,
) -> AppResult<Json<Value>> {
    validate_shop_item(&input)?;
    let current: Option<String> = sqlx::query_scalar("SELECT name FROM shop_items WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    let current = current.ok_or_else(|| AppError::NotFound("Shop item not found".into()))?;

    let name = input.name.trim();
    let new_slug = if name != current {
        Some(unique_slug(&state.db, SlugTable::ShopItems, name, Some(id)).await?)
    } else {
        None
    };

    let item: ShopItem = sqlx::query_as(
        r#"UPDATE shop_items SET name = $1, slug = COALESCE($2, slug), description = $3,
            item_type = $4, price = $5, icon_url = $6, metadata = $7, is_active = $8
        WHERE id = $9 RETURNING *"#,
    )
    .bind(name)
    .bind(&new_slug)
    .bind(&input.description)
    .bind(input.item_type.trim())
    .bind(input.price)
    .bind(&input.icon_url)
    .bind(&input.metadata)
    .bind(input.is_active)
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(conflict_on_duplicate("Shop item slug"))?
    .ok_or_else(|| AppError::NotFound("Shop item not found".into()))?;

    catalogue::invalidate(&state).await;
    Ok(Json(json!({ "item": item })))
}

pub async fn delete_shop_item(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM shop_items WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Shop item not found".into()));
    }
    catalogue::invalidate(&state).await;
    Ok(Json(json!({ "success": true })))
}

// --- Genres ---

pub async fn list_genres(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let genres: Vec<Genre> = sqlx::query_as("SELECT * FROM genres ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(json!({ "genres": genres })))
}

pub async fn get_genre(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let genre: Genre = sqlx::query_as("SELECT * FROM genres WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Genre not found".into()))?;
    Ok(Json(json!({ "genre": genre })))
}

pub async fn create_genre(
    State(state): State<AppState>,
    Json(input): Json<GenreInput>,
) -> AppResult<Json<Value>> {
    require_name(&input.name, 100)?;
    let genre: Genre = sqlx::query_as(
        "INSERT INTO genres (name, description, created_at) VALUES ($1, $2, NOW()) RETURNING *",
    )
    .bind(input.name.trim())
    .bind(&input.description)
    .fetch_one(&state.db)
    .await
    .map_err(conflict_on_duplicate("Genre"))?;
    Ok(Json(json!({ "genre": genre })))
}

pub async fn update_genre(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(input): Json<GenreInput>,
) -> AppResult<Json<Value>> {
    require_name(&input.name, 100)?;
    let genre: Genre = sqlx::query_as(
        "UPDATE genres SET name = $1, description = $2 WHERE id = $3 RETURNING *",
    )
    .bind(input.name.trim())
    .bind(&input.description)
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(conflict_on_duplicate("Genre"))?
    .ok_or_else(|| AppError::NotFound("Genre not found".into()))?;
    Ok(Json(json!({ "genre": genre })))
}

pub async fn delete_genre(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM genres WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Genre not found".into()));
    }
    Ok(Json(json!({ "success": true })))
}

// --- Categories ---

pub async fn list_categories(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let categories: Vec<Category> = sqlx::query_as("SELECT * FROM categories ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(json!({ "categories": categories })))
}

pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let category: Category = sqlx::query_as("SELECT * FROM categories WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Category not found".into()))?;
    Ok(Json(json!({ "category": category })))
}

pub async fn create_category(
    State(state): State<AppState>,
    Json(input): Json<CategoryInput>,
) -> AppResult<Json<Value>> {
    require_name(&input.name, 100)?;
    let category: Category = sqlx::query_as(
        "INSERT INTO categories (name, description, created_at) VALUES ($1, $2, NOW()) RETURNING *",
    )
    .bind(input.name.trim())
    .bind(&input.description)
    .fetch_one(&state.db)
    .await
    .map_err(conflict_on_duplicate("Category"))?;
    Ok(Json(json!({ "category": category })))
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(input): Json<CategoryInput>,
) -> AppResult<Json<Value>> {
    require_name(&input.name, 100)?;
    let category: Category = sqlx::query_as(
        "UPDATE categories SET name = $1, description = $2 WHERE id = $3 RETURNING *",
    )
    .bind(input.name.trim())
    .bind(&input.description)
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(conflict_on_duplicate("Category"))?
    .ok_or_else(|| AppError::NotFound("Category not found".into()))?;
    Ok(Json(json!({ "category": category })))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM categories WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Category not found".into()));
    }
    Ok(Json(json!({ "success": true })))
}

// --- Countries ---

pub async fn list_countries(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let countries: Vec<Country> = sqlx::query_as("SELECT * FROM countries ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(json!({ "countries": countries })))
}

pub async fn get_country(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let country: Country = sqlx::query_as("SELECT * FROM countries WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Country not found".into()))?;
    Ok(Json(json!({ "country": country })))
}

pub async fn create_country(
    State(state): State<AppState>,
    Json(input): Json<CountryInput>,
) -> AppResult<Json<Value>> {
    require_name(&input.name, 100)?;
    let code = country_code(&input.code)?;
    let country: Country = sqlx::query_as(
        "INSERT INTO countries (code, name, created_at) VALUES ($1, $2, NOW()) RETURNING *",
    )
    .bind(&code)
    .bind(input.name.trim())
    .fetch_one(&state.db)
    .await
    .map_err(conflict_on_duplicate("Country"))?;
    Ok(Json(json!({ "country": country })))
}

pub async fn update_country(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(input): Json<CountryInput>,
) -> AppResult<Json<Value>> {
    require_name(&input.name, 100)?;
    let code = country_code(&input.code)?;
    let country: Country = sqlx::query_as(
        "UPDATE countries SET code = $1, name = $2 WHERE id = $3 RETURNING *",
    )
    .bind(&code)
    .bind(input.name.trim())
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(conflict_on_duplicate("Country"))?
    .ok_or_else(|| AppError::NotFound("Country not found".into()))?;
    Ok(Json(json!({ "country": country })))
}

pub async fn delete_country(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM countries WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Country not found".into()));
    }
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::challenge::{ChallengeCriteria, ChallengeType};

    #[test]
    fn shop_item_validation() {
        let mut input = ShopItemInput {
            name: "Golden frame".into(),
            description: None,
            item_type: "avatar_frame".into(),
            price: 250,
            icon_url: None,
            metadata: None,
            is_active: true,
        };
        assert!(validate_shop_item(&input).is_ok());

        input.price = -1;
        assert!(validate_shop_item(&input).is_err());

        input.price = 0;
        input.item_type = " ".into();
        assert!(validate_shop_item(&input).is_err());
    }

    #[test]
    fn names_are_trimmed_before_length_check() {
        assert!(require_name("   ", 10).is_err());
        assert!(require_name("  Horror  ", 10).is_ok());
        assert!(require_name(&"x".repeat(11), 10).is_err());
    }

    #[test]
    fn country_codes_are_two_letters() {
        assert_eq!(country_code(" de ").unwrap(), "DE");
        assert!(country_code("DEU").is_err());
        assert!(country_code("D1").is_err());
        assert!(country_code("").is_err());
    }

    fn stored(t: ChallengeType, criteria: ChallengeCriteria) -> Challenge {
        serde_json::from_value(json!({
            "id": 3,
            "title": "Horror month",
            "slug": "horror-month",
            "description": null,
            "type": t,
            "targetCount": 4,
            "criteria": criteria,
            "pointsReward": 100,
            "badgeId": null,
            "shopItemId": null,
            "startDate": null,
            "endDate": null,
            "durationForUserDays": null,
            "isActive": true,
            "isRepeatable": false,
            "repeatIntervalDays": null,
            "requiredLevel": 1,
            "createdAt": "2026-03-01T00:00:00Z",
            "updatedAt": "2026-03-01T00:00:00Z"
        }))
        .unwrap()
    }

    fn edit(t: ChallengeType, criteria: ChallengeCriteria) -> ChallengeInput {
        serde_json::from_value(json!({
            "title": "Horror month",
            "type": t,
            "targetCount": 2,
            "criteria": criteria
        }))
        .unwrap()
    }

    #[test]
    fn rule_change_is_blocked_only_while_attempts_run() {
        let horror = ChallengeCriteria {
            genre_ids: Some(vec![27]),
            ..Default::default()
        };
        let comedy = ChallengeCriteria {
            genre_ids: Some(vec![35]),
            ..Default::default()
        };
        let existing = stored(ChallengeType::WatchGenre, horror.clone());

        assert!(check_rule_change(&existing, &edit(ChallengeType::WatchGenre, horror.clone()), 5).is_ok());
        assert!(matches!(
            check_rule_change(&existing, &edit(ChallengeType::WatchGenre, comedy.clone()), 5),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            check_rule_change(&existing, &edit(ChallengeType::WatchMovies, ChallengeCriteria::default()), 1),
            Err(AppError::Conflict(_))
        ));
        assert!(check_rule_change(&existing, &edit(ChallengeType::WatchGenre, comedy), 0).is_ok());
    }

    fn admin(id: uuid::Uuid) -> axum::Extension<AuthUser> {
        axum::Extension(AuthUser {
            id,
            role: crate::models::user::UserRole::Admin,
        })
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn lowering_target_settles_running_attempts(pool: sqlx::PgPool) {
        use crate::services::{challenges, progress_tracker::record_activity};
        use crate::test_support::{self, chapter};

        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::ReadChapters, 5, 10).await;
        let progress = challenges::join(&state, user, c.id).await.unwrap();
        record_activity(&state, user, &[chapter(1), chapter(2), chapter(3)])
            .await
            .unwrap();

        let mut body = edit(ChallengeType::ReadChapters, ChallengeCriteria::default());
        body.title = c.title.clone();
        update_challenge(State(state.clone()), admin(user), Path(c.id), Json(body))
            .await
            .unwrap();

        let (count, status): (i32, ProgressStatus) = sqlx::query_as(
            "SELECT current_count, status FROM user_challenge_progress WHERE id = $1",
        )
        .bind(progress.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!((count, status), (2, ProgressStatus::Completed));

        // no attempt is running any more, so the rule may change
        let type_change = edit(ChallengeType::WatchMovies, ChallengeCriteria::default());
        assert!(update_challenge(State(state), admin(user), Path(c.id), Json(type_change))
            .await
            .is_ok());
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres (DATABASE_URL)
    async fn type_change_is_refused_while_attempts_run(pool: sqlx::PgPool) {
        use crate::services::challenges;
        use crate::test_support;

        let state = test_support::state(pool.clone(), false);
        let user = test_support::user(&pool).await;
        let c = test_support::challenge(&pool, ChallengeType::ReadChapters, 5, 10).await;
        challenges::join(&state, user, c.id).await.unwrap();

        let body = edit(ChallengeType::WatchMovies, ChallengeCriteria::default());
        let err = update_challenge(State(state), admin(user), Path(c.id), Json(body))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
