//! Outbound event delivery to WebSocket clients.
//!
//! Each connected instance gets a bounded per-client queue; the socket's
//! writer task drains it. `post` never blocks broker state on a slow
//! socket: a full queue drops the event and counts against the client,
//! and a client that keeps dropping is unbound entirely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use fdc3_broker::collaborators::{CollaboratorError, Transport};
use fdc3_core::ids::InstanceId;
use fdc3_core::protocol::BrokerEvent;

use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE};

/// Maximum lifetime drops before a slow client is unbound.
const MAX_TOTAL_DROPS: u64 = 100;

/// Queue depth per client.
const CLIENT_QUEUE_DEPTH: usize = 256;

struct ClientQueue {
    tx: mpsc::Sender<Arc<String>>,
    drops: AtomicU64,
}

/// WebSocket-backed [`Transport`] shared by every session's broker.
pub struct WsTransport {
    clients: DashMap<InstanceId, ClientQueue>,
}

impl WsTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Bind an instance to a fresh outbound queue; the returned receiver
    /// belongs to the connection's writer task.
    #[must_use]
    pub fn bind(&self, instance: &InstanceId) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        let _ = self.clients.insert(
            instance.clone(),
            ClientQueue {
                tx,
                drops: AtomicU64::new(0),
            },
        );
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        rx
    }

    /// Unbind a departed instance. Idempotent.
    pub fn unbind(&self, instance: &InstanceId) {
        if self.clients.remove(instance).is_some() {
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
            debug!(instance = %instance, "transport unbound");
        }
    }

    /// Whether an instance currently has a bound queue.
    #[must_use]
    pub fn is_bound(&self, instance: &InstanceId) -> bool {
        self.clients.contains_key(instance)
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn post(&self, instance: &InstanceId, event: &BrokerEvent) -> Result<(), CollaboratorError> {
        let json = serde_json::to_string(event)
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        let Some(client) = self.clients.get(instance) else {
            return Err(CollaboratorError::Transport(format!(
                "no connection bound for {instance}"
            )));
        };
        if client.tx.try_send(Arc::new(json)).is_ok() {
            return Ok(());
        }

        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        let drops = client.drops.fetch_add(1, Ordering::Relaxed) + 1;
        drop(client);
        if drops >= MAX_TOTAL_DROPS {
            warn!(instance = %instance, drops, "unbinding slow client");
            self.unbind(instance);
        } else {
            warn!(instance = %instance, drops, "event dropped (client queue full)");
        }
        Err(CollaboratorError::Transport(format!(
            "queue full for {instance}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdc3_core::ids::ChannelId;

    fn event() -> BrokerEvent {
        BrokerEvent::ChannelChanged {
            instance_id: InstanceId::from_string("inst_a"),
            channel_id: Some(ChannelId::new("red")),
        }
    }

    #[tokio::test]
    async fn posts_reach_the_bound_receiver() {
        let transport = WsTransport::new();
        let inst = InstanceId::from_string("inst_a");
        let mut rx = transport.bind(&inst);

        transport.post(&inst, &event()).unwrap();
        let json = rx.recv().await.unwrap();
        assert!(json.contains("channelChangedEvent"));
    }

    #[tokio::test]
    async fn post_to_unbound_instance_fails() {
        let transport = WsTransport::new();
        let inst = InstanceId::from_string("inst_ghost");
        assert!(transport.post(&inst, &event()).is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let transport = WsTransport::new();
        let inst = InstanceId::from_string("inst_slow");
        // Receiver never drained.
        let _rx = transport.bind(&inst);
        for _ in 0..CLIENT_QUEUE_DEPTH {
            transport.post(&inst, &event()).unwrap();
        }
        assert!(transport.post(&inst, &event()).is_err());
        assert!(transport.is_bound(&inst));
    }

    #[tokio::test]
    async fn persistent_dropper_gets_unbound() {
        let transport = WsTransport::new();
        let inst = InstanceId::from_string("inst_slow");
        let _rx = transport.bind(&inst);
        for _ in 0..CLIENT_QUEUE_DEPTH {
            transport.post(&inst, &event()).unwrap();
        }
        for _ in 0..MAX_TOTAL_DROPS {
            let _ = transport.post(&inst, &event());
        }
        assert!(!transport.is_bound(&inst));
    }

    #[tokio::test]
    async fn rebinding_replaces_the_queue() {
        let transport = WsTransport::new();
        let inst = InstanceId::from_string("inst_a");
        let mut old_rx = transport.bind(&inst);
        let mut new_rx = transport.bind(&inst);

        transport.post(&inst, &event()).unwrap();
        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());
    }
}
