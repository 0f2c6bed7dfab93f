use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use souk_types::events::GatewayEvent;

/// Manages all connected clients and routes events to them.
///
/// Most events are addressed to one user (a message recipient, an ad owner)
/// and go through that user's targeted channels. Only catalogue-wide events
/// use the broadcast channel.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for events every client receives
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user targeted send channels: user_id -> conn_id -> sender.
    /// A user may be connected from several devices at once.
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a targeted channel for one connection. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Drop one connection's channel. Other connections of the same user stay.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to every connection of a user. Returns how many
    /// connections accepted it.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let channels = self.inner.user_channels.read().await;
        channels
            .get(&user_id)
            .map(|conns| {
                conns
                    .values()
                    .filter(|tx| tx.send(event.clone()).is_ok())
                    .count()
            })
            .unwrap_or(0)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.user_channels.read().await.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.inner.user_channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn targeted_events_reach_every_connection_of_the_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (_c1, mut rx1) = dispatcher.register_user_channel(user).await;
        let (_c2, mut rx2) = dispatcher.register_user_channel(user).await;
        let (_c3, mut rx3) = dispatcher.register_user_channel(other).await;

        let delivered = dispatcher
            .send_to_user(user, GatewayEvent::UnreadCount { total: 4 })
            .await;
        assert_eq!(delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(rx.try_recv(), Ok(GatewayEvent::UnreadCount { total: 4 })));
        }
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistering_one_connection_keeps_the_others() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (c1, _rx1) = dispatcher.register_user_channel(user).await;
        let (c2, _rx2) = dispatcher.register_user_channel(user).await;

        dispatcher.unregister_user_channel(user, c1).await;
        assert!(dispatcher.is_online(user).await);

        dispatcher.unregister_user_channel(user, c2).await;
        assert!(!dispatcher.is_online(user).await);
        assert_eq!(dispatcher.online_count().await, 0);
    }

    #[tokio::test]
    async fn sending_to_offline_user_is_a_no_op() {
        let dispatcher = Dispatcher::new();
        let delivered = dispatcher
            .send_to_user(Uuid::new_v4(), GatewayEvent::UnreadCount { total: 1 })
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn broadcasts_reach_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let ad_id = Uuid::new_v4();
        dispatcher.broadcast(GatewayEvent::AdPublished {
            ad_id,
            title: "Moto".into(),
            category: "Véhicules".into(),
            location: "Bafoussam".into(),
        });
        assert!(matches!(rx.recv().await, Ok(GatewayEvent::AdPublished { ad_id: id, .. }) if id == ad_id));
    }
}
