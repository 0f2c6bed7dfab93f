use std::sync::Arc;

use tracing::error;
use uuid::Uuid;

use souk_db::Database;
use souk_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;

/// Reads the user's unread total from the messages table and pushes it.
///
/// Clients never adjust counters themselves; every change is followed by a
/// fresh count so a reconnecting client cannot drift.
pub async fn refresh_unread(db: &Arc<Database>, dispatcher: &Dispatcher, user_id: Uuid) {
    let db = db.clone();
    let uid = user_id.to_string();
    let total = match tokio::task::spawn_blocking(move || db.unread_count(&uid)).await {
        Ok(Ok(total)) => total,
        Ok(Err(e)) => {
            error!("Failed to count unread messages for {}: {}", user_id, e);
            return;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return;
        }
    };

    dispatcher
        .send_to_user(user_id, GatewayEvent::UnreadCount { total })
        .await;
}
