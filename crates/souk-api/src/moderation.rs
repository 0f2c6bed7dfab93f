use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;

use souk_types::api::{Claims, PageQuery};
use souk_types::events::GatewayEvent;
use souk_types::models::Ad;
use souk_types::moderation::{ModerationDecision, ModerationStatus};

use crate::ads::{into_ads, load_ad};
use crate::error::ApiError;
use crate::state::AppState;

/// GET /moderation/queue: pending ads, longest waiting first.
pub async fn queue(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Ad>>, ApiError> {
    let limit = page.limit.unwrap_or(50).clamp(1, 200);
    let rows = state.db(move |db| db.moderation_queue(limit)).await?;
    Ok(Json(into_ads(rows)))
}

/// POST /moderation/ads/{ad_id}
///
/// The update only applies if the ad is still in the state the decision was
/// checked against. A concurrent decision by another moderator yields 409.
pub async fn decide(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ad_id): Path<Uuid>,
    Json(decision): Json<ModerationDecision>,
) -> Result<Json<Ad>, ApiError> {
    let ad = load_ad(&state, ad_id).await?;
    let expected = ad.moderation_status;
    let outcome = decision.resolve(expected)?;

    let now = state.clock.now();
    let moderator = claims.sub.to_string();
    let db_outcome = outcome.clone();
    let applied = state
        .db(move |db| db.moderate_ad(&ad_id.to_string(), expected, &db_outcome, &moderator, now))
        .await?;
    if !applied {
        return Err(ApiError::Conflict("ad was already moderated".into()));
    }

    info!(
        "{} moved ad {} from {} to {}",
        claims.sub,
        ad_id,
        expected.as_str(),
        outcome.moderation_status.as_str()
    );

    let ad = load_ad(&state, ad_id).await?;
    state
        .dispatcher
        .send_to_user(
            ad.user_id,
            GatewayEvent::AdModerated {
                ad_id,
                moderation_status: ad.moderation_status,
                notes: ad.moderation_notes.clone(),
            },
        )
        .await;

    if ad.moderation_status == ModerationStatus::Approved && ad.is_public() {
        state.dispatcher.broadcast(GatewayEvent::AdPublished {
            ad_id,
            title: ad.title.clone(),
            category: ad.category.clone(),
            location: ad.location.clone(),
        });
    }

    Ok(Json(ad))
}
