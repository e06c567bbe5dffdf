//! Connection lifecycle: hello handshake, readiness waiters, and the
//! disconnect cascade.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{debug, info, instrument, warn};

use fdc3_core::directory::AppMetadata;
use fdc3_core::errors::{Fdc3Error, Result};
use fdc3_core::ids::{ChannelId, InstanceId};
use fdc3_core::protocol::BrokerEvent;

use crate::collaborators::{Directory, Transport};
use crate::instances::{HostingMode, InstanceRegistry, InstanceState};
use crate::intents::IntentRouter;
use crate::listeners::{ListenerKind, ListenerRegistry};
use crate::pending::PendingQueue;

/// Handshake and teardown coordinator for one session.
pub struct ConnectionManager {
    instances: Arc<InstanceRegistry>,
    listeners: Arc<ListenerRegistry>,
    pending: Arc<PendingQueue>,
    router: Arc<IntentRouter>,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    /// One-shot readiness signals, keyed by instance. Waiters re-check
    /// registry state after every wake, so a spurious notify is harmless.
    waiters: Mutex<HashMap<InstanceId, Arc<Notify>>>,
    debug_recovery: bool,
}

impl ConnectionManager {
    pub(crate) fn new(
        instances: Arc<InstanceRegistry>,
        listeners: Arc<ListenerRegistry>,
        pending: Arc<PendingQueue>,
        router: Arc<IntentRouter>,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        debug_recovery: bool,
    ) -> Self {
        Self {
            instances,
            listeners,
            pending,
            router,
            directory,
            transport,
            waiters: Mutex::new(HashMap::new()),
            debug_recovery,
        }
    }

    /// Pre-register a launching app instance as `Pending`.
    pub fn register_app_launch(
        &self,
        app_id: &str,
        hosting: HostingMode,
        metadata: AppMetadata,
        destination: Option<ChannelId>,
    ) -> InstanceId {
        self.instances.register(app_id, hosting, metadata, destination)
    }

    /// Complete an app's hello handshake.
    ///
    /// Accepts only a `Pending` instance whose claimed app id matches the
    /// registration. With debug recovery enabled, an unknown instance id
    /// claiming an app the directory actually lists gets a fresh
    /// registration under the presented id; everything else is an explicit
    /// [`Fdc3Error::InvalidInstance`] rejection.
    #[instrument(skip(self), fields(instance = %instance_id, app = app_id))]
    pub async fn hello(&self, instance_id: &InstanceId, app_id: &str) -> Result<()> {
        match self.instances.details(instance_id) {
            Some(details) if details.state == InstanceState::Pending => {
                if details.app_id != app_id {
                    warn!(registered = details.app_id, "hello claimed a different app id");
                    return Err(Fdc3Error::InvalidInstance(format!(
                        "{instance_id} is registered to {}",
                        details.app_id
                    )));
                }
            }
            Some(_) => {
                warn!("hello for an already-connected instance");
                return Err(Fdc3Error::InvalidInstance(format!(
                    "{instance_id} already completed its handshake"
                )));
            }
            None => {
                self.try_debug_recovery(instance_id, app_id).await?;
            }
        }

        self.instances.set_state(instance_id, InstanceState::Connected)?;
        gauge!("fdc3_connected_instances").increment(1.0);
        info!("instance connected");

        // Channel-setup notification: tells the app where it landed.
        let event = BrokerEvent::ChannelChanged {
            instance_id: instance_id.clone(),
            channel_id: self.instances.channel_of(instance_id),
        };
        if let Err(e) = self.transport.post(instance_id, &event) {
            warn!(error = %e, "channel-setup notification failed");
        }

        self.replay_owned(instance_id);

        if let Some(notify) = self.waiters.lock().get(instance_id) {
            notify.notify_waiters();
        }
        Ok(())
    }

    /// Recovery path for a hello with an unrecognized instance id: only
    /// under the debug flag, and only when the claimed app id resolves in
    /// the directory.
    async fn try_debug_recovery(&self, instance_id: &InstanceId, app_id: &str) -> Result<()> {
        if !self.debug_recovery {
            return Err(Fdc3Error::InvalidInstance(instance_id.to_string()));
        }
        let apps = self.directory.apps_by_id(app_id).await.unwrap_or_else(|e| {
            warn!(error = %e, "directory lookup failed during recovery");
            Vec::new()
        });
        let Some(app) = apps.first() else {
            warn!("debug recovery refused: app not in directory");
            return Err(Fdc3Error::InvalidInstance(instance_id.to_string()));
        };
        warn!("debug recovery: registering unknown instance");
        self.instances.register_with_id(
            instance_id.clone(),
            app_id,
            HostingMode::Tab,
            AppMetadata {
                title: Some(app.title.clone()),
                icon: app.icon.clone(),
            },
            None,
        );
        Ok(())
    }

    /// Replay parked deliveries for listeners this instance already owns.
    /// Normal connects own none yet; recovery reconnects may.
    fn replay_owned(&self, instance_id: &InstanceId) {
        for subscription in self.listeners.owned_by(instance_id) {
            match &subscription.kind {
                ListenerKind::Context { context_type, channel } => {
                    while let Some((context, parked_channel)) = self.pending.claim_context(
                        instance_id,
                        context_type.as_deref(),
                        channel.as_ref(),
                    ) {
                        let event = BrokerEvent::Context {
                            listener_id: subscription.listener_id.clone(),
                            channel_id: parked_channel,
                            context,
                        };
                        if let Err(e) = self.transport.post(instance_id, &event) {
                            warn!(error = %e, "parked context replay failed");
                            break;
                        }
                    }
                }
                ListenerKind::Intent { intent } => {
                    while self.router.replay_parked(instance_id, intent) {}
                }
            }
        }
    }

    /// Wait until an instance completes its handshake.
    pub async fn wait_connected(&self, instance_id: &InstanceId, timeout: Duration) -> Result<()> {
        let notify = Arc::clone(
            self.waiters
                .lock()
                .entry(instance_id.clone())
                .or_insert_with(|| Arc::new(Notify::new())),
        );
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = notify.notified();
            match self.instances.details(instance_id).map(|d| d.state) {
                Some(InstanceState::Connected) => return Ok(()),
                Some(_) => {}
                None => return Err(Fdc3Error::InvalidInstance(instance_id.to_string())),
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(instance = %instance_id, "wait for handshake timed out");
                return Err(Fdc3Error::ResolverTimeout);
            }
        }
    }

    /// Tear down everything tied to a departing instance: listeners,
    /// parked deliveries, in-flight raises, channel membership, and the
    /// registration itself. Idempotent.
    #[instrument(skip(self), fields(instance = %instance_id))]
    pub fn disconnect(&self, instance_id: &InstanceId) {
        let Some(details) = self.instances.details(instance_id) else {
            return;
        };
        let dropped_listeners = self.listeners.drop_owned_by(instance_id);
        let dropped_pending = self.pending.drop_for(instance_id);
        self.router.discard_raised_by(instance_id);
        let _ = self.instances.set_state(instance_id, InstanceState::Terminated);
        let _ = self.waiters.lock().remove(instance_id);
        if details.state == InstanceState::Connected {
            gauge!("fdc3_connected_instances").decrement(1.0);
        }
        info!(app = details.app_id, dropped_listeners, dropped_pending, "instance disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CollaboratorError, MockDirectory, MockLauncher, MockResolver, MockTransport,
    };
    use assert_matches::assert_matches;
    use fdc3_core::constants::PENDING_DELIVERY_TTL;
    use fdc3_core::context::Context;
    use fdc3_core::directory::{AppIntent, DirectoryApp};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct Harness {
        instances: Arc<InstanceRegistry>,
        listeners: Arc<ListenerRegistry>,
        pending: Arc<PendingQueue>,
        posted: Arc<StdMutex<Vec<(InstanceId, BrokerEvent)>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                instances: Arc::new(InstanceRegistry::new()),
                listeners: Arc::new(ListenerRegistry::new()),
                pending: Arc::new(PendingQueue::new(PENDING_DELIVERY_TTL)),
                posted: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        fn manager(&self, directory: MockDirectory, debug_recovery: bool) -> ConnectionManager {
            let posted = Arc::clone(&self.posted);
            let mut transport = MockTransport::new();
            let _ = transport.expect_post().returning(move |inst, event| {
                posted.lock().unwrap().push((inst.clone(), event.clone()));
                Ok(())
            });
            let transport: Arc<dyn Transport> = Arc::new(transport);
            let directory: Arc<dyn Directory> = Arc::new(directory);
            let router = Arc::new(IntentRouter::new(
                Arc::clone(&self.listeners),
                Arc::clone(&self.instances),
                Arc::clone(&self.pending),
                Arc::clone(&directory),
                Arc::new(MockResolver::new()),
                Arc::new(MockLauncher::new()),
                Arc::clone(&transport),
                Duration::from_secs(5),
            ));
            ConnectionManager::new(
                Arc::clone(&self.instances),
                Arc::clone(&self.listeners),
                Arc::clone(&self.pending),
                router,
                directory,
                transport,
                debug_recovery,
            )
        }
    }

    fn chart_app() -> DirectoryApp {
        DirectoryApp {
            app_id: "charting".into(),
            title: "Charting".into(),
            url: None,
            icon: None,
            intents: vec![AppIntent {
                name: "ViewChart".into(),
                display_name: None,
                contexts: vec![],
            }],
        }
    }

    #[tokio::test]
    async fn hello_promotes_and_notifies_channel() {
        let h = Harness::new();
        let mgr = h.manager(MockDirectory::new(), false);
        let id = mgr.register_app_launch(
            "charting",
            HostingMode::Frame,
            AppMetadata::default(),
            Some(ChannelId::new("red")),
        );
        mgr.hello(&id, "charting").await.unwrap();

        assert_eq!(
            h.instances.details(&id).unwrap().state,
            InstanceState::Connected
        );
        let posted = h.posted.lock().unwrap();
        assert_matches!(
            &posted[0],
            (to, BrokerEvent::ChannelChanged { channel_id: Some(c), .. })
                if to == &id && c.as_str() == "red"
        );
    }

    #[tokio::test]
    async fn hello_with_unknown_id_is_rejected() {
        let h = Harness::new();
        let mgr = h.manager(MockDirectory::new(), false);
        let err = mgr
            .hello(&InstanceId::from_string("inst_ghost"), "charting")
            .await
            .unwrap_err();
        assert_matches!(err, Fdc3Error::InvalidInstance(_));
    }

    #[tokio::test]
    async fn hello_with_mismatched_app_id_is_rejected() {
        let h = Harness::new();
        let mgr = h.manager(MockDirectory::new(), false);
        let id =
            mgr.register_app_launch("charting", HostingMode::Frame, AppMetadata::default(), None);
        let err = mgr.hello(&id, "news").await.unwrap_err();
        assert_matches!(err, Fdc3Error::InvalidInstance(_));
        assert_eq!(h.instances.details(&id).unwrap().state, InstanceState::Pending);
    }

    #[tokio::test]
    async fn second_hello_is_rejected() {
        let h = Harness::new();
        let mgr = h.manager(MockDirectory::new(), false);
        let id =
            mgr.register_app_launch("charting", HostingMode::Frame, AppMetadata::default(), None);
        mgr.hello(&id, "charting").await.unwrap();
        let err = mgr.hello(&id, "charting").await.unwrap_err();
        assert_matches!(err, Fdc3Error::InvalidInstance(_));
    }

    #[tokio::test]
    async fn debug_recovery_requires_flag_and_directory_entry() {
        let h = Harness::new();
        // Flag off: rejected without consulting the directory.
        let mgr = h.manager(MockDirectory::new(), false);
        let ghost = InstanceId::from_string("inst_ghost");
        assert_matches!(
            mgr.hello(&ghost, "charting").await.unwrap_err(),
            Fdc3Error::InvalidInstance(_)
        );

        // Flag on but app unknown to the directory: still rejected.
        let h = Harness::new();
        let mut dir = MockDirectory::new();
        let _ = dir.expect_apps_by_id().returning(|_| Ok(Vec::new()));
        let mgr = h.manager(dir, true);
        assert_matches!(
            mgr.hello(&ghost, "charting").await.unwrap_err(),
            Fdc3Error::InvalidInstance(_)
        );

        // Flag on and the directory lists the app: recovered.
        let h = Harness::new();
        let mut dir = MockDirectory::new();
        let _ = dir.expect_apps_by_id().returning(|_| Ok(vec![chart_app()]));
        let mgr = h.manager(dir, true);
        mgr.hello(&ghost, "charting").await.unwrap();
        let details = h.instances.details(&ghost).unwrap();
        assert_eq!(details.state, InstanceState::Connected);
        assert_eq!(details.hosting, HostingMode::Tab);
    }

    #[tokio::test]
    async fn directory_failure_blocks_recovery() {
        let h = Harness::new();
        let mut dir = MockDirectory::new();
        let _ = dir
            .expect_apps_by_id()
            .returning(|_| Err(CollaboratorError::Directory("boom".into())));
        let mgr = h.manager(dir, true);
        let err = mgr
            .hello(&InstanceId::from_string("inst_ghost"), "charting")
            .await
            .unwrap_err();
        assert_matches!(err, Fdc3Error::InvalidInstance(_));
    }

    #[tokio::test]
    async fn wait_connected_wakes_on_hello() {
        let h = Harness::new();
        let mgr = Arc::new(h.manager(MockDirectory::new(), false));
        let id =
            mgr.register_app_launch("charting", HostingMode::Frame, AppMetadata::default(), None);

        let waiter = mgr.wait_connected(&id, Duration::from_secs(5));
        let greeter = async {
            tokio::task::yield_now().await;
            mgr.hello(&id, "charting").await.unwrap();
        };
        let (waited, ()) = tokio::join!(waiter, greeter);
        waited.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_connected_times_out() {
        let h = Harness::new();
        let mgr = h.manager(MockDirectory::new(), false);
        let id =
            mgr.register_app_launch("charting", HostingMode::Frame, AppMetadata::default(), None);
        let err = mgr.wait_connected(&id, Duration::from_secs(1)).await.unwrap_err();
        assert_matches!(err, Fdc3Error::ResolverTimeout);
    }

    #[tokio::test]
    async fn hello_replays_parked_context_for_owned_listener() {
        let h = Harness::new();
        let mut dir = MockDirectory::new();
        let _ = dir.expect_apps_by_id().returning(|_| Ok(vec![chart_app()]));
        let mgr = h.manager(dir, true);

        // A recovered instance that already owned a listener before the
        // broker saw its hello.
        let ghost = InstanceId::from_string("inst_ghost");
        let listener = h.listeners.add_context(&ghost, None, None);
        h.pending
            .enqueue_context(&ghost, Context::new("fdc3.instrument", json!({"n": 7})), None);

        mgr.hello(&ghost, "charting").await.unwrap();

        let posted = h.posted.lock().unwrap();
        let replayed = posted.iter().any(|(to, ev)| {
            to == &ghost
                && matches!(ev, BrokerEvent::Context { listener_id, context, .. }
                    if listener_id == &listener && context.payload["n"] == 7)
        });
        assert!(replayed);
        assert!(h.pending.is_empty());
    }

    #[tokio::test]
    async fn disconnect_cascades_and_is_idempotent() {
        let h = Harness::new();
        let mgr = h.manager(MockDirectory::new(), false);
        let id =
            mgr.register_app_launch("charting", HostingMode::Frame, AppMetadata::default(), None);
        mgr.hello(&id, "charting").await.unwrap();
        let _ = h.listeners.add_context(&id, None, None);
        let _ = h.listeners.add_intent(&id, "ViewChart".into());
        h.pending
            .enqueue_context(&id, Context::new("fdc3.instrument", json!({})), None);

        mgr.disconnect(&id);
        assert!(h.instances.details(&id).is_none());
        assert!(h.listeners.owned_by(&id).is_empty());
        assert!(h.pending.is_empty());

        // A second disconnect is a no-op.
        mgr.disconnect(&id);
    }
}
