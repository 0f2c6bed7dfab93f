use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::SubsecRound;
use tracing::{debug, info, warn};
use uuid::Uuid;

use souk_db::models::{ConversationSummaryRow, parse_id};
use souk_db::{from_db_time, to_db_time};
use souk_gateway::notify::refresh_unread;
use souk_types::api::{
    Claims, ConversationSummary, MarkReadResponse, MessagesQuery, SendMessageRequest,
    StartConversationRequest, UnreadCountResponse,
};
use souk_types::events::GatewayEvent;
use souk_types::models::{Conversation, Message};

use crate::ads::load_ad;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_MESSAGE_LEN: usize = 4000;
const MAX_ATTACHMENTS: usize = 4;

/// GET /conversations: the caller's inbox, most recent activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let uid = claims.sub.to_string();
    let rows = state.db(move |db| db.list_conversations(&uid)).await?;

    let inbox = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            summary_from_row(row)
                .map_err(|e| warn!("Skipping corrupt conversation {}: {:#}", id, e))
                .ok()
        })
        .collect();

    Ok(Json(inbox))
}

/// POST /conversations: contact the owner of an ad, optionally with a
/// first message. Returns the existing conversation on repeat contact.
pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ad = load_ad(&state, req.ad_id).await?;
    if !ad.is_public() {
        return Err(ApiError::NotFound("ad"));
    }
    if ad.user_id == claims.sub {
        return Err(ApiError::bad_request("you cannot message yourself"));
    }

    let now = state.clock.now();
    let (ad_id, me, owner) = (ad.id.to_string(), claims.sub.to_string(), ad.user_id.to_string());
    let conversation = state
        .db(move |db| db.find_or_create_conversation(&ad_id, &me, &owner, now))
        .await?
        .to_conversation()?;

    if let Some(text) = req.message.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        deliver(&state, &conversation, &claims, text.to_string(), Vec::new()).await?;
    }

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /conversations/{conversation_id}/messages: newest first; pass the
/// oldest `created_at` of a page as `before` to fetch the next one.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    load_conversation(&state, conversation_id, &claims).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let before = query
        .before
        .map(|at| (to_db_time(at), query.before_id.map(|id| id.to_string())));
    let rows = state
        .db(move |db| {
            let cursor = before.as_ref().map(|(at, id)| (at.as_str(), id.as_deref()));
            db.get_messages(&conversation_id.to_string(), limit, cursor)
        })
        .await?;

    let messages = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            row.into_message()
                .map_err(|e| warn!("Skipping corrupt message {}: {:#}", id, e))
                .ok()
        })
        .collect();

    Ok(Json(messages))
}

/// POST /conversations/{conversation_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = load_conversation(&state, conversation_id, &claims).await?;

    let content = req.content.trim().to_string();
    if content.is_empty() && req.attachments.is_empty() {
        return Err(ApiError::bad_request("message is empty"));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::bad_request("message is too long"));
    }
    if req.attachments.len() > MAX_ATTACHMENTS {
        return Err(ApiError::bad_request("at most 4 attachments per message"));
    }

    let message = deliver(&state, &conversation, &claims, content, req.attachments).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /conversations/{conversation_id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let conversation = load_conversation(&state, conversation_id, &claims).await?;

    let (cid, uid) = (conversation_id.to_string(), claims.sub.to_string());
    let marked = state
        .db(move |db| db.mark_conversation_read(&cid, &uid))
        .await?;

    refresh_unread(&state.db, &state.dispatcher, claims.sub).await;
    if marked > 0 {
        if let Some(other) = conversation.other_participant(claims.sub) {
            state
                .dispatcher
                .send_to_user(
                    other,
                    GatewayEvent::MessagesRead { conversation_id, reader_id: claims.sub },
                )
                .await;
        }
    }

    Ok(Json(MarkReadResponse { marked }))
}

/// GET /messages/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let uid = claims.sub.to_string();
    let total = state.db(move |db| db.unread_count(&uid)).await?;
    Ok(Json(UnreadCountResponse { total }))
}

fn summary_from_row(row: ConversationSummaryRow) -> anyhow::Result<ConversationSummary> {
    Ok(ConversationSummary {
        id: parse_id(&row.id)?,
        ad_id: row.ad_id.as_deref().map(parse_id).transpose()?,
        other_user_id: parse_id(&row.other_user_id)?,
        last_message_at: row.last_message_at.as_deref().map(from_db_time).transpose()?,
        ad_title: row.ad_title,
        other_user_name: row.other_user_name,
        last_message: row.last_message,
        unread: row.unread,
    })
}

/// Conversation the caller takes part in. Outsiders get 404.
async fn load_conversation(
    state: &AppState,
    conversation_id: Uuid,
    claims: &Claims,
) -> Result<Conversation, ApiError> {
    let conversation = state
        .db(move |db| db.get_conversation(&conversation_id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?
        .to_conversation()?;

    if !conversation.includes(claims.sub) {
        return Err(ApiError::NotFound("conversation"));
    }
    Ok(conversation)
}

/// Stores a message, pushes it to the recipient and refreshes their badge.
async fn deliver(
    state: &AppState,
    conversation: &Conversation,
    claims: &Claims,
    content: String,
    attachments: Vec<String>,
) -> Result<Message, ApiError> {
    let recipient = conversation
        .other_participant(claims.sub)
        .ok_or(ApiError::NotFound("conversation"))?;

    let message = Message {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        sender_id: claims.sub,
        recipient_id: recipient,
        content,
        attachments,
        is_read: false,
        // Stored at microsecond precision
        created_at: state.clock.now().trunc_subsecs(6),
    };

    let row = message.clone();
    let sender_name = state
        .db(move |db| {
            db.insert_message(
                &row.id.to_string(),
                &row.conversation_id.to_string(),
                &row.sender_id.to_string(),
                &row.recipient_id.to_string(),
                &row.content,
                &row.attachments,
                row.created_at,
            )?;
            db.get_display_name(&row.sender_id.to_string())
        })
        .await?
        .unwrap_or_default();

    state
        .dispatcher
        .send_to_user(
            recipient,
            GatewayEvent::MessageCreate {
                id: message.id,
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                sender_name,
                content: message.content.clone(),
                attachments: message.attachments.clone(),
                timestamp: message.created_at,
            },
        )
        .await;
    refresh_unread(&state.db, &state.dispatcher, recipient).await;
    if !state.dispatcher.is_online(recipient).await {
        debug!("{} is offline, message waits in the inbox", recipient);
    }

    info!("{} -> {} in {}", message.sender_id, recipient, message.conversation_id);
    Ok(message)
}
