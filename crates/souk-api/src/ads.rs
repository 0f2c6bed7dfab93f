use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use souk_db::models::{AdContent, AdRow};
use souk_types::api::{AdRequest, Claims, PageQuery, SetAdStatusRequest, VipRequest};
use souk_types::models::{Ad, Role};
use souk_types::moderation::ModerationStatus;
use souk_types::search::{self, SearchFilter};

use crate::error::ApiError;
use crate::middleware::{bearer_claims, current_role};
use crate::state::AppState;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;
const MAX_IMAGES: usize = 8;
const MAX_VIP_DAYS: u32 = 90;

/// GET /ads: public catalogue.
///
/// Category and location are pushed down to SQL; the free-text query, price
/// bounds, VIP flag and ordering run over the fetched page.
pub async fn list_ads(
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Ad>>, ApiError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = page.offset.unwrap_or(0);
    let category = non_empty(filter.category.as_deref());
    let location = non_empty(filter.location.as_deref());

    let rows = state
        .db(move |db| db.list_public_ads(category.as_deref(), location.as_deref(), limit, offset))
        .await?;

    Ok(Json(search::apply(into_ads(rows), &filter, state.clock.now())))
}

/// GET /ads/{ad_id}: anyone may read a public ad; the owner and moderators
/// also see it while pending, rejected or inactive.
pub async fn get_ad(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ad_id): Path<Uuid>,
) -> Result<Json<Ad>, ApiError> {
    let ad = load_ad(&state, ad_id).await?;
    if ad.is_public() {
        return Ok(Json(ad));
    }

    let Some(viewer) = bearer_claims(&headers, &state.jwt_secret) else {
        return Err(ApiError::NotFound("ad"));
    };
    if viewer.sub == ad.user_id {
        return Ok(Json(ad));
    }
    // Hidden ads stay hidden from anyone whose account is gone
    match current_role(&state, viewer.sub).await {
        Ok(role) if role.can_moderate() => Ok(Json(ad)),
        Ok(_) | Err(ApiError::Unauthorized) => Err(ApiError::NotFound("ad")),
        Err(e) => Err(e),
    }
}

/// POST /me/ads: new ads wait in the moderation queue.
pub async fn create_ad(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AdRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let req = validate(req)?;
    let ad_id = Uuid::new_v4();
    let now = state.clock.now();

    let uid = claims.sub.to_string();
    state
        .db(move |db| db.insert_ad(&ad_id.to_string(), &uid, &content(&req), now))
        .await?;

    info!("{} posted ad {}", claims.sub, ad_id);
    Ok((StatusCode::CREATED, Json(load_ad(&state, ad_id).await?)))
}

/// PUT /me/ads/{ad_id}: any edit sends the ad back to moderation.
pub async fn update_ad(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ad_id): Path<Uuid>,
    Json(req): Json<AdRequest>,
) -> Result<Json<Ad>, ApiError> {
    let req = validate(req)?;
    let ad = load_owned_ad(&state, ad_id, &claims).await?;

    if ad.moderation_status != ModerationStatus::Pending {
        ad.moderation_status.transition(ModerationStatus::Pending)?;
    }

    let now = state.clock.now();
    let updated = state
        .db(move |db| db.update_ad_content(&ad_id.to_string(), &content(&req), now))
        .await?;
    if !updated {
        return Err(ApiError::NotFound("ad"));
    }

    info!("{} edited ad {}, back in moderation", claims.sub, ad_id);
    Ok(Json(load_ad(&state, ad_id).await?))
}

/// POST /me/ads/{ad_id}/status: owner pauses or resumes a listing.
pub async fn set_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ad_id): Path<Uuid>,
    Json(req): Json<SetAdStatusRequest>,
) -> Result<Json<Ad>, ApiError> {
    load_owned_ad(&state, ad_id, &claims).await?;

    let now = state.clock.now();
    state
        .db(move |db| db.set_ad_status(&ad_id.to_string(), req.status, now))
        .await?;

    Ok(Json(load_ad(&state, ad_id).await?))
}

/// GET /me/ads: every ad the caller owns, whatever its state.
pub async fn my_ads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Ad>>, ApiError> {
    let uid = claims.sub.to_string();
    let rows = state.db(move |db| db.list_ads_by_owner(&uid)).await?;
    Ok(Json(into_ads(rows)))
}

/// POST /moderation/ads/{ad_id}/vip: starts or extends the VIP window.
pub async fn grant_vip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ad_id): Path<Uuid>,
    Json(req): Json<VipRequest>,
) -> Result<Json<Ad>, ApiError> {
    if req.days == 0 || req.days > MAX_VIP_DAYS {
        return Err(ApiError::bad_request("VIP duration must be 1 to 90 days"));
    }

    let ad = load_ad(&state, ad_id).await?;
    let now = state.clock.now();
    // An active window is extended, a lapsed one starts over
    let start = ad.expires_at.filter(|until| *until > now).unwrap_or(now);
    let until = start + Duration::days(i64::from(req.days));

    state
        .db(move |db| db.set_vip_until(&ad_id.to_string(), until, now))
        .await?;

    info!("{} made ad {} VIP until {}", claims.sub, ad_id, until);
    Ok(Json(load_ad(&state, ad_id).await?))
}

pub(crate) async fn load_ad(state: &AppState, ad_id: Uuid) -> Result<Ad, ApiError> {
    let row = state
        .db(move |db| db.get_ad(&ad_id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("ad"))?;
    Ok(row.into_ad()?)
}

async fn load_owned_ad(state: &AppState, ad_id: Uuid, claims: &Claims) -> Result<Ad, ApiError> {
    let ad = load_ad(state, ad_id).await?;
    if ad.user_id != claims.sub && current_role(state, claims.sub).await? != Role::Admin {
        return Err(ApiError::Forbidden("not your ad"));
    }
    Ok(ad)
}

/// Rows that fail to decode are logged and skipped rather than failing the
/// whole page.
pub(crate) fn into_ads(rows: Vec<AdRow>) -> Vec<Ad> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            row.into_ad()
                .map_err(|e| warn!("Skipping corrupt ad {}: {:#}", id, e))
                .ok()
        })
        .collect()
}

fn validate(mut req: AdRequest) -> Result<AdRequest, ApiError> {
    req.title = req.title.trim().to_string();
    req.description = req.description.trim().to_string();
    req.category = req.category.trim().to_string();
    req.location = req.location.trim().to_string();

    let title_len = req.title.chars().count();
    if !(3..=120).contains(&title_len) {
        return Err(ApiError::bad_request("title must be 3 to 120 characters"));
    }
    if req.description.is_empty() || req.description.chars().count() > 5000 {
        return Err(ApiError::bad_request("description must be 1 to 5000 characters"));
    }
    if req.category.is_empty() || req.location.is_empty() {
        return Err(ApiError::bad_request("category and location are required"));
    }
    if req.price.is_some_and(|p| p < 0) {
        return Err(ApiError::bad_request("price cannot be negative"));
    }
    if req.images.len() > MAX_IMAGES {
        return Err(ApiError::bad_request("at most 8 images per ad"));
    }
    Ok(req)
}

fn content(req: &AdRequest) -> AdContent<'_> {
    AdContent {
        title: &req.title,
        description: &req.description,
        category: &req.category,
        location: &req.location,
        price: req.price,
        images: &req.images,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}
