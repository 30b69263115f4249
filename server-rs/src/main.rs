use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod cache;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod services;
mod telemetry;
#[cfg(test)]
mod test_support;

use cache::Cache;
use config::Config;
use middleware::rate_limit::RateLimiter;
use services::notifier::NotificationHub;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub cache: Cache,
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
    pub hub: NotificationHub,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| o.parse().ok())
        .collect();

    let origin = if allowed.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn build_router(state: AppState) -> Router {
    let auth_layer = || axum_mw::from_fn_with_state(state.clone(), middleware::auth::authenticate);

    // --- Auth routes (no auth required) ---
    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh));

    // --- Authenticated routes ---
    let user_routes = Router::new()
        .route(
            "/me",
            get(routes::users::me).put(routes::users::update_me),
        )
        .route("/me/inventory", get(routes::users::inventory))
        .route("/me/points", get(routes::users::points_history))
        .layer(auth_layer());

    // Slugs and ids share one path segment, so the parameter name is shared too.
    let challenge_routes = Router::new()
        .route("/", get(routes::challenges::list))
        .route("/me", get(routes::challenges::my_progress))
        .route("/:challenge", get(routes::challenges::get_by_slug))
        .route("/:challenge/join", post(routes::challenges::join))
        .route("/:challenge/leave", post(routes::challenges::leave))
        .route("/progress/:id/claim", post(routes::challenges::claim))
        .layer(auth_layer());

    let activity_routes = Router::new()
        .route("/movies/:id/watched", post(routes::activity::movie_watched))
        .route("/chapters/:id/read", post(routes::activity::chapter_read))
        .route("/ratings", post(routes::activity::rate))
        .route("/collections", post(routes::activity::create_collection))
        .layer(auth_layer());

    let friend_routes = Router::new()
        .route("/", get(routes::friends::list_friends))
        .route("/requests", get(routes::friends::friend_requests))
        .route("/request", post(routes::friends::send_request))
        .route("/:id/accept", post(routes::friends::accept_request))
        .route("/:id/decline", post(routes::friends::decline_request))
        .route("/:id/remove", post(routes::friends::remove_friend))
        .layer(auth_layer());

    let notification_routes = Router::new()
        .route("/", get(routes::notifications::list))
        .route("/read-all", post(routes::notifications::mark_all_read))
        .route("/:id/read", post(routes::notifications::mark_read))
        .layer(auth_layer());

    let badge_routes = Router::new()
        .route("/", get(routes::shop::list_badges))
        .layer(auth_layer());

    let shop_routes = Router::new()
        .route("/", get(routes::shop::list_items))
        .route("/:id/purchase", post(routes::shop::purchase))
        .layer(auth_layer());

    // --- Admin routes (authenticate runs first, then the role check) ---
    let admin_routes = Router::new()
        .route(
            "/challenges",
            get(routes::admin::list_challenges).post(routes::admin::create_challenge),
        )
        .route(
            "/challenges/:id",
            get(routes::admin::get_challenge)
                .put(routes::admin::update_challenge)
                .delete(routes::admin::delete_challenge),
        )
        .route("/challenges/:id/toggle", post(routes::admin::toggle_challenge))
        .route(
            "/badges",
            get(routes::admin::list_badges).post(routes::admin::create_badge),
        )
        .route(
            "/badges/:id",
            get(routes::admin::get_badge)
                .put(routes::admin::update_badge)
                .delete(routes::admin::delete_badge),
        )
        .route(
            "/shop-items",
            get(routes::admin::list_shop_items).post(routes::admin::create_shop_item),
        )
        .route(
            "/shop-items/:id",
            get(routes::admin::get_shop_item)
                .put(routes::admin::update_shop_item)
                .delete(routes::admin::delete_shop_item),
        )
        .route(
            "/genres",
            get(routes::admin::list_genres).post(routes::admin::create_genre),
        )
        .route(
            "/genres/:id",
            get(routes::admin::get_genre)
                .put(routes::admin::update_genre)
                .delete(routes::admin::delete_genre),
        )
        .route(
            "/categories",
            get(routes::admin::list_categories).post(routes::admin::create_category),
        )
        .route(
            "/categories/:id",
            get(routes::admin::get_category)
                .put(routes::admin::update_category)
                .delete(routes::admin::delete_category),
        )
        .route(
            "/countries",
            get(routes::admin::list_countries).post(routes::admin::create_country),
        )
        .route(
            "/countries/:id",
            get(routes::admin::get_country)
                .put(routes::admin::update_country)
                .delete(routes::admin::delete_country),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::admin::require_admin,
        ))
        .layer(auth_layer());

    // --- Compose full API ---
    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .nest("/challenges", challenge_routes)
        .nest("/activity", activity_routes)
        .nest("/friends", friend_routes)
        .nest("/notifications", notification_routes)
        .nest("/badges", badge_routes)
        .nest("/shop", shop_routes)
        .nest("/admin", admin_routes)
        .route("/ws", get(routes::ws::ws_upgrade));

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api", api)
        // Global middleware
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    telemetry::init_tracing(&config.log_format);

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let cache = match Cache::connect(&config).await {
        Ok(cache) => cache,
        Err(e) => {
            tracing::warn!(error = %e, "redis unavailable, running without cache");
            Cache::disabled(&config.redis.key_prefix)
        }
    };
    let rate_limiter =
        RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_secs);

    let state = AppState {
        db: pool,
        cache,
        config: Arc::new(config),
        rate_limiter,
        hub: NotificationHub::new(),
    };

    services::expiry::spawn_sweeper(
        state.clone(),
        Duration::from_secs(state.config.challenges.sweep_interval_secs.max(1)),
    );

    let limiter = state.rate_limiter.clone();
    let window = state.config.rate_limit.window_secs.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(window));
        loop {
            ticker.tick().await;
            limiter.evict_expired().await;
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    tracing::info!(
        %addr,
        environment = %state.config.environment,
        auto_claim = state.config.challenges.auto_claim,
        "media challenges API listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| error::AppError::Internal(e.to_string()))?;
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| error::AppError::Internal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::models::user::UserRole;

    fn test_state() -> AppState {
        let config = Config::for_tests();
        let db = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy(&config.database_url())
            .unwrap();
        AppState {
            db,
            cache: Cache::disabled("test:"),
            rate_limiter: RateLimiter::new(1000, 60),
            config: Arc::new(config),
            hub: NotificationHub::new(),
        }
    }

    async fn status_of(req: Request<Body>) -> StatusCode {
        build_router(test_state()).oneshot(req).await.unwrap().status()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn challenge_listing_requires_a_token() {
        assert_eq!(status_of(get_req("/api/challenges")).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_area_requires_a_token() {
        assert_eq!(
            status_of(get_req("/api/admin/challenges")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn refresh_token_cannot_call_the_api() {
        let jwt = Config::for_tests().jwt;
        let (_, refresh) =
            middleware::auth::generate_tokens(Uuid::new_v4(), UserRole::User, &jwt).unwrap();
        let req = Request::builder()
            .uri("/api/notifications")
            .header("authorization", format!("Bearer {refresh}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn taxonomy_admin_requires_a_token() {
        for uri in ["/api/admin/categories", "/api/admin/countries/1"] {
            assert_eq!(status_of(get_req(uri)).await, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_routes_are_404() {
        assert_eq!(status_of(get_req("/api/nowhere")).await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_is_public() {
        // the lazy pool cannot connect, so the report is degraded but served
        assert_eq!(status_of(get_req("/health")).await, StatusCode::OK);
    }
}
