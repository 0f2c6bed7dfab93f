use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use souk_db::models::NewProfile;
use souk_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use souk_types::models::{Profile, Role};
use souk_types::phone::{looks_like_phone, normalize_phone};
use souk_types::referral::normalize_code;

use crate::error::ApiError;
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_NAME_LEN: usize = 80;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    let email = req.email.trim().to_string();
    if email.len() > 254 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ApiError::bad_request("invalid e-mail address"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }
    let full_name = req.full_name.trim().to_string();
    if full_name.is_empty() || full_name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::bad_request("full name must be 1 to 80 characters"));
    }
    let phone = match req.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => Some(normalize_phone(raw)?),
        None => None,
    };

    // Resolve the referral code before touching anything else
    let referral = match req.referral_code.as_deref().map(normalize_code).filter(|c| !c.is_empty()) {
        Some(code) => {
            let lookup = code.clone();
            let referrer = state
                .db(move |db| db.active_referrer(&lookup))
                .await?
                .ok_or_else(|| ApiError::bad_request("unknown referral code"))?;
            Some((referrer, code))
        }
        None => None,
    };

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();
    let now = state.clock.now();

    let (db_email, db_phone, db_name) = (email.clone(), phone.clone(), full_name.clone());
    let code = state
        .db(move |db| {
            let id = user_id.to_string();
            let profile = NewProfile {
                id: &id,
                email: &db_email,
                phone: db_phone.as_deref(),
                full_name: &db_name,
                password_hash: &password_hash,
            };
            let referrer = referral.as_ref().map(|(id, code)| (id.as_str(), code.as_str()));
            db.create_profile(&profile, referrer, now)
        })
        .await?;

    info!("Registered {} with referral code {}", user_id, code);

    let profile = Profile {
        id: user_id,
        email,
        phone,
        full_name,
        role: Role::User,
        created_at: now,
    };
    let token = create_token(&state.jwt_secret, &profile, now + state.token_ttl)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            token,
            profile,
        }),
    ))
}

/// Accepts an e-mail address or a phone number. Phone numbers are
/// normalized and resolved to the owning account's e-mail first.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identifier = req.identifier.trim().to_string();
    if identifier.is_empty() {
        return Err(ApiError::bad_request("e-mail or phone number required"));
    }

    let email = if looks_like_phone(&identifier) {
        let phone = normalize_phone(&identifier)?;
        state
            .db(move |db| db.email_for_phone(&phone))
            .await?
            .ok_or(ApiError::Unauthorized)?
    } else {
        identifier
    };

    let row = state
        .db(move |db| db.get_profile_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&row.password).map_err(|e| {
        error!("Stored password hash for {} is unreadable: {}", row.id, e);
        ApiError::Internal
    })?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let profile = row.to_profile()?;
    let token = create_token(&state.jwt_secret, &profile, state.clock.now() + state.token_ttl)?;

    Ok(Json(AuthResponse {
        user_id: profile.id,
        token,
        profile,
    }))
}

/// Tokens are stateless; the client drops its copy.
pub async fn logout(Extension(claims): Extension<Claims>) -> StatusCode {
    info!("{} signed out", claims.sub);
    StatusCode::NO_CONTENT
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Profile>, ApiError> {
    let uid = claims.sub.to_string();
    let row = state
        .db(move |db| db.get_profile_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("profile"))?;
    Ok(Json(row.to_profile()?))
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal
        })
}

fn create_token(secret: &str, profile: &Profile, expires: DateTime<Utc>) -> Result<String, ApiError> {
    let claims = Claims {
        sub: profile.id,
        email: profile.email.clone(),
        role: profile.role,
        exp: expires.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Failed to sign token: {}", e);
        ApiError::Internal
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hashes_are_salted_and_verifiable() {
        let a = hash_password("correct horse").unwrap();
        let b = hash_password("correct horse").unwrap();
        assert_ne!(a, b);

        let parsed = PasswordHash::new(&a).unwrap();
        assert!(Argon2::default().verify_password(b"correct horse", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong horse", &parsed).is_err());
    }
}
