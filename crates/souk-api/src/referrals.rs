use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{debug, info};

use souk_types::api::{
    Claims, ClaimReferralRequest, ReferralCodeToggle, ReferralSummary, ReferralValidation,
};
use souk_types::referral::{is_well_formed, normalize_code};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /referrals/me
pub async fn summary(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReferralSummary>, ApiError> {
    let uid = claims.sub.to_string();
    let (code, points, referred_count) = state
        .db(move |db| {
            let code = db.referral_code_for_user(&uid)?;
            let points = db.referral_points(&uid)?;
            let referred = db.referred_count(&uid)?;
            Ok((code, points, referred))
        })
        .await?;
    let code = code
        .ok_or(ApiError::NotFound("referral code"))?
        .to_referral_code()?;

    Ok(Json(ReferralSummary {
        code: code.code,
        is_active: code.is_active,
        total_points: points.total(),
        points,
        referred_count,
    }))
}

/// PUT /referrals/me: pause or resume the caller's code.
pub async fn set_active(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReferralCodeToggle>,
) -> Result<StatusCode, ApiError> {
    let uid = claims.sub.to_string();
    let code = state
        .db(move |db| {
            db.set_referral_code_active(&uid, req.is_active)?;
            db.referral_code_for_user(&uid)
        })
        .await?
        .ok_or(ApiError::NotFound("referral code"))?;

    state.referral_cache.invalidate(&code.code);
    info!("{} set referral code {} active={}", claims.sub, code.code, req.is_active);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /referrals/validate/{code}: backs the live check on the sign-up form.
pub async fn validate(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<ReferralValidation>, ApiError> {
    let code = normalize_code(&raw);
    if !is_well_formed(&code) {
        return Ok(Json(ReferralValidation { code, valid: false }));
    }

    if let Some(valid) = state.referral_cache.get(&code) {
        debug!("Referral code {} served from cache", code);
        return Ok(Json(ReferralValidation { code, valid }));
    }

    let lookup = code.clone();
    let valid = state
        .db(move |db| db.active_referrer(&lookup))
        .await?
        .is_some();
    state.referral_cache.insert(code.clone(), valid);

    Ok(Json(ReferralValidation { code, valid }))
}

/// POST /referrals/claim: attach a referrer to an existing account.
pub async fn claim(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ClaimReferralRequest>,
) -> Result<StatusCode, ApiError> {
    let code = normalize_code(&req.code);
    if !is_well_formed(&code) {
        return Err(ApiError::bad_request("unknown referral code"));
    }

    let lookup = code.clone();
    let referrer = state
        .db(move |db| db.active_referrer(&lookup))
        .await?
        .ok_or_else(|| ApiError::bad_request("unknown referral code"))?;

    let uid = claims.sub.to_string();
    if referrer == uid {
        return Err(ApiError::bad_request("you cannot use your own referral code"));
    }

    let lookup = referrer.clone();
    let referrers_referrer = state.db(move |db| db.referrer_of(&lookup)).await?;
    if referrers_referrer.as_deref() == Some(uid.as_str()) {
        return Err(ApiError::bad_request("you referred the owner of this code"));
    }

    let now = state.clock.now();
    let db_code = code.clone();
    state
        .db(move |db| db.record_referral(&uid, &referrer, &db_code, now))
        .await?;

    info!("{} claimed referral code {}", claims.sub, code);
    Ok(StatusCode::NO_CONTENT)
}
