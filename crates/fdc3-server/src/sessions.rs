//! Per-session broker registry.
//!
//! One [`Broker`] per session id, created lazily on the first hello that
//! names the session. Waiters (tests, tooling, late-binding UIs) can park
//! on a session id until its broker exists.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::info;

use fdc3_broker::collaborators::{Directory, Launcher, Resolver, Transport};
use fdc3_broker::{Broker, BrokerConfig};
use fdc3_core::errors::{Fdc3Error, Result};
use fdc3_core::ids::SessionId;

use crate::metrics::SESSIONS_ACTIVE;

/// Shared collaborators handed to every new broker.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Broker>>,
    waiters: Mutex<HashMap<SessionId, Arc<Notify>>>,
    config: BrokerConfig,
    directory: Arc<dyn Directory>,
    resolver: Arc<dyn Resolver>,
    launcher: Arc<dyn Launcher>,
    transport: Arc<dyn Transport>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        config: BrokerConfig,
        directory: Arc<dyn Directory>,
        resolver: Arc<dyn Resolver>,
        launcher: Arc<dyn Launcher>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            waiters: Mutex::new(HashMap::new()),
            config,
            directory,
            resolver,
            launcher,
            transport,
        }
    }

    /// The broker for a session, created on first use.
    pub fn get_or_create(&self, session_id: &SessionId) -> Arc<Broker> {
        if let Some(existing) = self.sessions.get(session_id) {
            return Arc::clone(&existing);
        }
        let broker = Arc::clone(
            self.sessions
                .entry(session_id.clone())
                .or_insert_with(|| {
                    info!(session = %session_id, "session broker created");
                    gauge!(SESSIONS_ACTIVE).increment(1.0);
                    Arc::new(Broker::new(
                        session_id.clone(),
                        self.config,
                        Arc::clone(&self.directory),
                        Arc::clone(&self.resolver),
                        Arc::clone(&self.launcher),
                        Arc::clone(&self.transport),
                    ))
                })
                .value(),
        );
        if let Some(notify) = self.waiters.lock().get(session_id) {
            notify.notify_waiters();
        }
        broker
    }

    /// The broker for an existing session.
    pub fn get(&self, session_id: &SessionId) -> Result<Arc<Broker>> {
        self.sessions
            .get(session_id)
            .map(|b| Arc::clone(&b))
            .ok_or_else(|| Fdc3Error::SessionNotFound(session_id.to_string()))
    }

    /// Wait until a session's broker exists.
    pub async fn wait_for(&self, session_id: &SessionId, timeout: Duration) -> Result<Arc<Broker>> {
        let notify = Arc::clone(
            self.waiters
                .lock()
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(Notify::new())),
        );
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = notify.notified();
            if let Ok(broker) = self.get(session_id) {
                return Ok(broker);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(Fdc3Error::SessionNotFound(session_id.to_string()));
            }
        }
    }

    /// Drop a session's broker and all its in-memory state.
    pub fn remove(&self, session_id: &SessionId) {
        if self.sessions.remove(session_id).is_some() {
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
            info!(session = %session_id, "session broker dropped");
        }
        let _ = self.waiters.lock().remove(session_id);
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::WsTransport;
    use assert_matches::assert_matches;
    use fdc3_broker::collaborators::{MockDirectory, MockLauncher, MockResolver};

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            BrokerConfig::default(),
            Arc::new(MockDirectory::new()),
            Arc::new(MockResolver::new()),
            Arc::new(MockLauncher::new()),
            Arc::new(WsTransport::new()),
        )
    }

    #[tokio::test]
    async fn brokers_are_per_session_and_reused() {
        let reg = registry();
        let (a, b) = (SessionId::from_string("sess_a"), SessionId::from_string("sess_b"));
        let broker_a = reg.get_or_create(&a);
        let broker_a2 = reg.get_or_create(&a);
        let broker_b = reg.get_or_create(&b);
        assert!(Arc::ptr_eq(&broker_a, &broker_a2));
        assert!(!Arc::ptr_eq(&broker_a, &broker_b));
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let reg = registry();
        assert_matches!(
            reg.get(&SessionId::from_string("sess_nope")).err().unwrap(),
            Fdc3Error::SessionNotFound(_)
        );
    }

    #[tokio::test]
    async fn wait_for_wakes_on_creation() {
        let reg = Arc::new(registry());
        let id = SessionId::from_string("sess_late");
        let waiter = reg.wait_for(&id, Duration::from_secs(5));
        let creator = async {
            tokio::task::yield_now().await;
            let _ = reg.get_or_create(&id);
        };
        let (waited, ()) = tokio::join!(waiter, creator);
        assert!(waited.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out() {
        let reg = registry();
        let err = reg
            .wait_for(&SessionId::from_string("sess_never"), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_matches!(err, Fdc3Error::SessionNotFound(_));
    }

    #[tokio::test]
    async fn registry_shares_one_concrete_transport() {
        // Same wiring as server startup: the transport stays typed for
        // `bind`/`unbind` while the registry takes the trait object.
        let transport = Arc::new(WsTransport::new());
        let reg = SessionRegistry::new(
            BrokerConfig::default(),
            Arc::new(MockDirectory::new()),
            Arc::new(MockResolver::new()),
            Arc::new(MockLauncher::new()),
            Arc::clone(&transport) as Arc<dyn Transport>,
        );
        let _ = reg.get_or_create(&SessionId::from_string("sess_a"));
        assert_eq!(reg.len(), 1);
        assert!(!transport.is_bound(&fdc3_core::ids::InstanceId::from_string("inst_x")));
    }

    #[tokio::test]
    async fn remove_drops_the_broker() {
        let reg = registry();
        let id = SessionId::from_string("sess_a");
        let _ = reg.get_or_create(&id);
        reg.remove(&id);
        assert!(reg.is_empty());
        assert!(reg.get(&id).is_err());
    }
}
