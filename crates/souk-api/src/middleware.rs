use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use uuid::Uuid;

use souk_types::api::Claims;
use souk_types::models::Role;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(req.headers(), &state.jwt_secret).ok_or(ApiError::Unauthorized)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Runs after `require_auth`. The role is read from the database so a
/// promotion or demotion applies without a new token.
pub async fn require_moderator(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;

    if !current_role(&state, claims.sub).await?.can_moderate() {
        return Err(ApiError::Forbidden("moderators only"));
    }

    Ok(next.run(req).await)
}

/// The caller's role as stored now. The role inside a token is only a
/// snapshot from sign-in and is never used for authorization.
pub async fn current_role(state: &AppState, user_id: Uuid) -> Result<Role, ApiError> {
    let uid = user_id.to_string();
    let profile = state
        .db(move |db| db.get_profile_by_id(&uid))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    profile.role.parse().map_err(|_| ApiError::Internal)
}

/// Claims from a `Bearer` token, if present and valid.
pub fn bearer_claims(headers: &HeaderMap, secret: &str) -> Option<Claims> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?
        .strip_prefix("Bearer ")?;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}
