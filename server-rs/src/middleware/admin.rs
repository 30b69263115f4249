use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::models::user::UserRole;
use crate::AppState;

/// Middleware: requires the authenticated user to hold the admin role.
/// The role is re-read from the database so a demotion takes effect before
/// the user's token expires.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

    let role: Option<UserRole> = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?;

    if role != Some(UserRole::Admin) {
        return Err(AppError::Forbidden("Requires admin role".into()));
    }
    req.extensions_mut().insert(AuthUser {
        id: user.id,
        role: UserRole::Admin,
    });

    Ok(next.run(req).await)
}
