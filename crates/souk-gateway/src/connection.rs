use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use souk_db::Database;
use souk_types::api::Claims;
use souk_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;
use crate::notify::refresh_unread;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// The first frame must be an Identify within this window.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, then the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let Some(claims) = wait_for_identify(&mut receiver, &jwt_secret, IDENTIFY_TIMEOUT).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };
    let user_id = claims.sub;

    let name_db = db.clone();
    let uid = user_id.to_string();
    let full_name = match tokio::task::spawn_blocking(move || name_db.get_display_name(&uid)).await {
        Ok(Ok(Some(name))) => name,
        Ok(Ok(None)) => {
            warn!("Token for unknown profile {}, closing", user_id);
            return;
        }
        Ok(Err(e)) => {
            error!("Failed to load profile {}: {}", user_id, e);
            return;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return;
        }
    };

    info!("{} ({}) connected to gateway", full_name, user_id);

    // Step 2: Ready, then the unread count
    let Some((conn_id, user_rx)) = greet(&mut sender, &dispatcher, &db, user_id, &full_name).await else {
        return;
    };

    run_connection_loop(sender, receiver, dispatcher, db, user_id, conn_id, user_rx).await;
    info!("{} ({}) disconnected from gateway", full_name, user_id);
}

/// Sends `Ready`, registers the connection's targeted channel and queues an
/// `UnreadCount` read from the database on it, so every (re)connect starts
/// from the stored total.
async fn greet<S>(
    sender: &mut S,
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    full_name: &str,
) -> Option<(Uuid, mpsc::UnboundedReceiver<GatewayEvent>)>
where
    S: Sink<Message> + Unpin,
{
    let ready = GatewayEvent::Ready { user_id, full_name: full_name.to_string() };
    if !send_event(sender, &ready).await {
        return None;
    }

    let (conn_id, user_rx) = dispatcher.register_user_channel(user_id).await;
    debug!("{} users online", dispatcher.online_count().await);

    refresh_unread(db, dispatcher, user_id).await;
    Some((conn_id, user_rx))
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    conn_id: Uuid,
    mut user_rx: mpsc::UnboundedReceiver<GatewayEvent>,
) {
    let mut broadcast_rx = dispatcher.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_db = db.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_dispatcher, &recv_db, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_user_channel(user_id, conn_id).await;
}

/// The first data frame must be an Identify carrying a valid token, and it
/// must arrive within `within`. Ping/Pong control frames are ignored; any
/// other frame ends the handshake.
async fn wait_for_identify<S, E>(receiver: &mut S, jwt_secret: &str, within: Duration) -> Option<Claims>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(within, async {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Text(text) => text,
                other => {
                    debug!("Expected Identify, got {:?}", other);
                    return None;
                }
            };

            let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) else {
                debug!("First frame was not Identify");
                return None;
            };

            let token_data = decode::<Claims>(
                &token,
                &DecodingKey::from_secret(jwt_secret.as_bytes()),
                &Validation::default(),
            )
            .ok()?;

            return Some(token_data.claims);
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(dispatcher: &Dispatcher, db: &Arc<Database>, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::StartTyping { conversation_id } => {
            trace!("{} typing in {}", user_id, conversation_id);
            if let Some(other) = counterpart(db, conversation_id, user_id).await {
                dispatcher
                    .send_to_user(other, GatewayEvent::TypingStart { conversation_id, user_id })
                    .await;
            }
        }

        GatewayCommand::MarkRead { conversation_id } => {
            let Some(other) = counterpart(db, conversation_id, user_id).await else {
                return;
            };

            let db_task = db.clone();
            let (cid, uid) = (conversation_id.to_string(), user_id.to_string());
            let marked = match tokio::task::spawn_blocking(move || {
                db_task.mark_conversation_read(&cid, &uid)
            })
            .await
            {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("Failed to mark {} read for {}: {}", conversation_id, user_id, e);
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            };

            refresh_unread(db, dispatcher, user_id).await;
            if marked > 0 {
                dispatcher
                    .send_to_user(other, GatewayEvent::MessagesRead { conversation_id, reader_id: user_id })
                    .await;
            }
        }
    }
}

/// The other participant, if `user_id` belongs to the conversation.
async fn counterpart(db: &Arc<Database>, conversation_id: Uuid, user_id: Uuid) -> Option<Uuid> {
    let db = db.clone();
    let cid = conversation_id.to_string();
    let row = tokio::task::spawn_blocking(move || db.get_conversation(&cid))
        .await
        .ok()?
        .map_err(|e| error!("Failed to load conversation {}: {}", conversation_id, e))
        .ok()??;

    let conversation = row
        .to_conversation()
        .map_err(|e| warn!("{}", e))
        .ok()?;
    let other = conversation.other_participant(user_id);
    if other.is_none() {
        warn!("{} is not a participant of {}", user_id, conversation_id);
    }
    other
}

async fn send_event<S>(sender: &mut S, event: &GatewayEvent) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use futures_util::stream;
    use jsonwebtoken::{EncodingKey, Header, encode};

    use souk_db::models::{AdContent, NewProfile};
    use souk_types::models::Role;

    const SECRET: &str = "gateway-test-secret";

    struct Seeded {
        db: Arc<Database>,
        seller: Uuid,
        buyer: Uuid,
        stranger: Uuid,
        conversation: Uuid,
    }

    fn profile(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let email = format!("{name}@example.cm");
        db.create_profile(
            &NewProfile {
                id: &id.to_string(),
                email: &email,
                phone: None,
                full_name: name,
                password_hash: "hash",
            },
            None,
            Utc::now(),
        )
        .unwrap();
        id
    }

    /// Buyer has sent the seller two messages about one ad.
    fn seed() -> Seeded {
        let db = Database::open_in_memory().unwrap();
        let seller = profile(&db, "seller");
        let buyer = profile(&db, "buyer");
        let stranger = profile(&db, "stranger");

        let ad_id = Uuid::new_v4().to_string();
        let images: Vec<String> = vec![];
        db.insert_ad(
            &ad_id,
            &seller.to_string(),
            &AdContent {
                title: "Congélateur",
                description: "200 litres",
                category: "Électroménager",
                location: "Garoua",
                price: Some(180_000),
                images: &images,
            },
            Utc::now(),
        )
        .unwrap();
        let conversation = db
            .find_or_create_conversation(&ad_id, &buyer.to_string(), &seller.to_string(), Utc::now())
            .unwrap();
        for text in ["bonjour", "prix final ?"] {
            db.insert_message(
                &Uuid::new_v4().to_string(),
                &conversation.id,
                &buyer.to_string(),
                &seller.to_string(),
                text,
                &[],
                Utc::now(),
            )
            .unwrap();
        }

        Seeded {
            db: Arc::new(db),
            seller,
            buyer,
            stranger,
            conversation: conversation.id.parse().unwrap(),
        }
    }

    fn token_for(user_id: Uuid) -> String {
        let claims = Claims {
            sub: user_id,
            email: "seller@example.cm".into(),
            role: Role::User,
            exp: (Utc::now().timestamp() + 3600) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn text(command: &GatewayCommand) -> Result<Message, axum::Error> {
        Ok(Message::Text(serde_json::to_string(command).unwrap().into()))
    }

    #[tokio::test]
    async fn identify_accepts_a_valid_token() {
        let user = Uuid::new_v4();
        let mut frames = stream::iter(vec![
            Ok(Message::Ping(vec![].into())),
            text(&GatewayCommand::Identify { token: token_for(user) }),
        ]);
        let claims = wait_for_identify(&mut frames, SECRET, IDENTIFY_TIMEOUT).await;
        assert_eq!(claims.map(|c| c.sub), Some(user));
    }

    #[tokio::test]
    async fn identify_must_be_the_first_frame() {
        let user = Uuid::new_v4();
        let mut frames = stream::iter(vec![
            text(&GatewayCommand::StartTyping { conversation_id: Uuid::new_v4() }),
            text(&GatewayCommand::Identify { token: token_for(user) }),
        ]);
        assert!(wait_for_identify(&mut frames, SECRET, IDENTIFY_TIMEOUT).await.is_none());

        let mut frames = stream::iter(vec![
            Ok(Message::Binary(vec![1u8, 2, 3].into())),
            text(&GatewayCommand::Identify { token: token_for(user) }),
        ]);
        assert!(wait_for_identify(&mut frames, SECRET, IDENTIFY_TIMEOUT).await.is_none());
    }

    #[tokio::test]
    async fn identify_rejects_a_forged_token() {
        let mut frames = stream::iter(vec![text(&GatewayCommand::Identify {
            token: "not.a.jwt".into(),
        })]);
        assert!(wait_for_identify(&mut frames, SECRET, IDENTIFY_TIMEOUT).await.is_none());
    }

    #[tokio::test]
    async fn silent_clients_time_out() {
        let mut frames = stream::pending::<Result<Message, axum::Error>>();
        let claims = wait_for_identify(&mut frames, SECRET, Duration::from_millis(20)).await;
        assert!(claims.is_none());
    }

    #[tokio::test]
    async fn greeting_is_ready_then_the_stored_unread_count() {
        let seeded = seed();
        let dispatcher = Dispatcher::new();
        let mut sent: Vec<Message> = Vec::new();

        let (_conn, mut rx) = greet(&mut sent, &dispatcher, &seeded.db, seeded.seller, "seller")
            .await
            .unwrap();

        assert_eq!(sent.len(), 1);
        let Message::Text(ready) = &sent[0] else {
            panic!("expected a text frame, got {:?}", sent[0]);
        };
        let ready: GatewayEvent = serde_json::from_str(ready.as_str()).unwrap();
        assert!(matches!(ready, GatewayEvent::Ready { user_id, .. } if user_id == seeded.seller));

        assert!(matches!(rx.try_recv(), Ok(GatewayEvent::UnreadCount { total: 2 })));
        assert!(dispatcher.is_online(seeded.seller).await);
    }

    #[tokio::test]
    async fn mark_read_updates_rows_and_pushes_fresh_counts() {
        let seeded = seed();
        let dispatcher = Dispatcher::new();
        let (_s, mut seller_rx) = dispatcher.register_user_channel(seeded.seller).await;
        let (_b, mut buyer_rx) = dispatcher.register_user_channel(seeded.buyer).await;

        let cmd = GatewayCommand::MarkRead { conversation_id: seeded.conversation };
        handle_command(&dispatcher, &seeded.db, seeded.seller, cmd).await;

        assert_eq!(seeded.db.unread_count(&seeded.seller.to_string()).unwrap(), 0);
        assert!(matches!(seller_rx.try_recv(), Ok(GatewayEvent::UnreadCount { total: 0 })));
        assert!(matches!(
            buyer_rx.try_recv(),
            Ok(GatewayEvent::MessagesRead { reader_id, .. }) if reader_id == seeded.seller
        ));
    }

    #[tokio::test]
    async fn typing_reaches_only_the_other_participant() {
        let seeded = seed();
        let dispatcher = Dispatcher::new();
        let (_s, mut seller_rx) = dispatcher.register_user_channel(seeded.seller).await;
        let (_b, mut buyer_rx) = dispatcher.register_user_channel(seeded.buyer).await;

        let cmd = GatewayCommand::StartTyping { conversation_id: seeded.conversation };
        handle_command(&dispatcher, &seeded.db, seeded.buyer, cmd).await;

        assert!(matches!(
            seller_rx.try_recv(),
            Ok(GatewayEvent::TypingStart { user_id, .. }) if user_id == seeded.buyer
        ));
        assert!(buyer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn outsiders_cannot_type_or_read_in_a_conversation() {
        let seeded = seed();
        let dispatcher = Dispatcher::new();
        let (_s, mut seller_rx) = dispatcher.register_user_channel(seeded.seller).await;
        let (_b, mut buyer_rx) = dispatcher.register_user_channel(seeded.buyer).await;
        let (_x, mut stranger_rx) = dispatcher.register_user_channel(seeded.stranger).await;

        let typing = GatewayCommand::StartTyping { conversation_id: seeded.conversation };
        handle_command(&dispatcher, &seeded.db, seeded.stranger, typing).await;
        let read = GatewayCommand::MarkRead { conversation_id: seeded.conversation };
        handle_command(&dispatcher, &seeded.db, seeded.stranger, read).await;

        assert!(seller_rx.try_recv().is_err());
        assert!(buyer_rx.try_recv().is_err());
        assert!(stranger_rx.try_recv().is_err());
        assert_eq!(seeded.db.unread_count(&seeded.seller.to_string()).unwrap(), 2);
    }
}
