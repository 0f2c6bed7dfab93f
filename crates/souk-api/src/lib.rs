pub mod ads;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod moderation;
pub mod referrals;
pub mod state;
pub mod storage;
pub mod uploads;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde_json::{Value, json};

pub use state::{AppState, AppStateInner};

/// REST routes. The WebSocket gateway and the outer layers (CORS, tracing)
/// are added by the server binary.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/ads", get(ads::list_ads))
        .route("/ads/{ad_id}", get(ads::get_ad))
        .route("/referrals/validate/{code}", get(referrals::validate))
        .route("/media/{name}", get(uploads::serve_media));

    let moderator = Router::new()
        .route("/moderation/queue", get(moderation::queue))
        .route("/moderation/ads/{ad_id}", post(moderation::decide))
        .route("/moderation/ads/{ad_id}/vip", post(ads::grant_vip))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_moderator));

    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/me/ads", get(ads::my_ads).post(ads::create_ad))
        .route("/me/ads/{ad_id}", axum::routing::put(ads::update_ad))
        .route("/me/ads/{ad_id}/status", post(ads::set_status))
        .route("/referrals/me", get(referrals::summary).put(referrals::set_active))
        .route("/referrals/claim", post(referrals::claim))
        .route(
            "/conversations",
            get(messages::list_conversations).post(messages::start_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(messages::mark_read))
        .route("/messages/unread-count", get(messages::unread_count))
        .route(
            "/uploads",
            post(uploads::upload_image).layer(DefaultBodyLimit::max(uploads::MAX_IMAGE_SIZE * 2)),
        )
        .merge(moderator)
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "online": state.dispatcher.online_count().await,
    }))
}
