//! Connection registry and broadcaster.
//!
//! At most one live connection per user. A connection is just the sending
//! half of the queue its socket writer task drains, so a slow or dead peer
//! never blocks a broadcast: frames that do not fit are dropped and logged.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_shared::protocol::ServerEvent;
use murmur_shared::{ChannelId, ChatError, UserId};

use crate::membership::{missing, Result};
use crate::SharedRepo;

struct Connection {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

#[derive(Clone)]
pub struct Hub {
    connections: Arc<Mutex<HashMap<UserId, Connection>>>,
    repo: SharedRepo,
}

impl Hub {
    pub fn new(repo: SharedRepo) -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            repo,
        }
    }

    /// Register `tx` as `user`'s live connection, superseding any previous
    /// one. The superseded socket is left to notice on its own.
    pub async fn register(&self, user: UserId, tx: mpsc::Sender<String>) -> Uuid {
        let id = Uuid::new_v4();
        let previous = self
            .connections
            .lock()
            .await
            .insert(user, Connection { id, tx });
        if let Some(previous) = previous {
            debug!(user = %user, superseded = %previous.id, "Connection superseded");
        }
        info!(user = %user, conn = %id, "Connection registered");
        id
    }

    /// Remove `user`'s entry if it is still the connection `conn_id`.
    pub async fn unregister(&self, user: &UserId, conn_id: Uuid) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get(user) {
            Some(current) if current.id == conn_id => {
                connections.remove(user);
                info!(user = %user, conn = %conn_id, "Connection unregistered");
                true
            }
            _ => {
                debug!(user = %user, conn = %conn_id, "Stale connection closed, entry kept");
                false
            }
        }
    }

    /// Push `event` to `user` only. Returns whether it was queued.
    pub async fn notify_user(&self, user: &UserId, event: &ServerEvent) -> bool {
        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = event.kind(), error = %e, "Failed to encode event");
                return false;
            }
        };
        let connections = self.connections.lock().await;
        match connections.get(user) {
            Some(conn) => deliver(user, conn, frame, event.kind()),
            None => false,
        }
    }

    /// Push `event` to every current member of `channel` that is online.
    /// Returns how many connections it was queued on.
    pub async fn broadcast_to_channel(&self, channel: &ChannelId, event: &ServerEvent) -> Result<usize> {
        let members = {
            let repo = self.repo.lock().await;
            repo.get_channel(channel)
                .map_err(missing("channel"))?
                .member_ids()
        };
        let frame = event
            .to_json()
            .map_err(|e| ChatError::dependency(format!("event encoding failed: {e}")))?;

        let connections = self.connections.lock().await;
        let mut delivered = 0;
        for member in &members {
            if let Some(conn) = connections.get(member) {
                if deliver(member, conn, frame.clone(), event.kind()) {
                    delivered += 1;
                }
            }
        }
        debug!(
            channel = %channel,
            kind = event.kind(),
            members = members.len(),
            delivered,
            "Broadcast"
        );
        Ok(delivered)
    }
}

fn deliver(user: &UserId, conn: &Connection, frame: String, kind: &str) -> bool {
    match conn.tx.try_send(frame) {
        Ok(()) => true,
        Err(e) => {
            warn!(user = %user, conn = %conn.id, kind, error = %e, "Dropping event for connection");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::protocol::{ErrorNotice, HiddenNotice};
    use murmur_shared::MessageId;

    use super::*;
    use crate::testutil::{drain, Fixture};

    fn error_event(text: &str) -> ServerEvent {
        ServerEvent::Error(ErrorNotice {
            message: text.into(),
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_online_members_only() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let outsider = fx.user("Eve").await;
        let channel = fx.group(&a, &[a, b, c]).await;

        let mut rx_a = fx.connect(&a).await;
        let mut rx_b = fx.connect(&b).await;
        let mut rx_eve = fx.connect(&outsider).await;

        let sent = fx.hub.broadcast_to_channel(&channel.id, &error_event("x")).await.unwrap();
        assert_eq!(sent, 2);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b)[0]["type"], "error");
        assert!(drain(&mut rx_eve).is_empty());
    }

    #[tokio::test]
    async fn broadcast_reads_membership_fresh() {
        let fx = Fixture::new();
        let (a, b, c) = fx.trio().await;
        let d = fx.user("Dave").await;
        let channel = fx.group(&a, &[a, b, c, d]).await;
        let mut rx_d = fx.connect(&d).await;

        fx.channels.remove_member(&channel.id, &a, &d).await.unwrap();
        fx.hub.broadcast_to_channel(&channel.id, &error_event("after")).await.unwrap();
        assert!(drain(&mut rx_d).is_empty());
    }

    #[tokio::test]
    async fn newer_connection_supersedes_and_survives_stale_unregister() {
        let fx = Fixture::new();
        let a = fx.user("Alice").await;

        let (old_tx, mut old_rx) = mpsc::channel(4);
        let old_id = fx.hub.register(a, old_tx).await;
        let (new_tx, mut new_rx) = mpsc::channel(4);
        let new_id = fx.hub.register(a, new_tx).await;

        assert!(!fx.hub.unregister(&a, old_id).await);

        let event = ServerEvent::MessageHidden(HiddenNotice {
            channel_id: None,
            message_id: MessageId::new(),
        });
        assert!(fx.hub.notify_user(&a, &event).await);
        assert!(drain(&mut old_rx).is_empty());
        assert_eq!(drain(&mut new_rx)[0]["type"], "message_hidden");

        assert!(fx.hub.unregister(&a, new_id).await);
        assert!(!fx.hub.notify_user(&a, &event).await);
    }

    #[tokio::test]
    async fn full_queue_drops_without_unregistering() {
        let fx = Fixture::new();
        let a = fx.user("Alice").await;
        let (tx, mut rx) = mpsc::channel(1);
        fx.hub.register(a, tx).await;

        assert!(fx.hub.notify_user(&a, &error_event("one")).await);
        assert!(!fx.hub.notify_user(&a, &error_event("two")).await);
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(fx.hub.notify_user(&a, &error_event("three")).await);
    }

    #[tokio::test]
    async fn broadcast_to_unknown_channel_is_not_found() {
        let fx = Fixture::new();
        let err = fx
            .hub
            .broadcast_to_channel(&ChannelId::new(), &error_event("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }
}
