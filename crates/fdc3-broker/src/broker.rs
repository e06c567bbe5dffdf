//! The per-session broker facade.
//!
//! One `Broker` exists per user session and owns that session's entire
//! state: channels, listener subscriptions, instance registry, pending
//! queue, and in-flight intent transfers. Nothing here is durable; a
//! session's state dies with it.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument, warn};

use fdc3_core::constants::DEFAULT_CHANNEL_ID;
use fdc3_core::context::Context;
use fdc3_core::directory::{AppMetadata, IntentAppList};
use fdc3_core::errors::{Fdc3Error, Result};
use fdc3_core::ids::{ChannelId, InstanceId, ListenerId, RequestId, SessionId};
use fdc3_core::protocol::{BrokerEvent, ChannelInfo, ChannelType, IntentResolution, IntentTarget};

use crate::channels::ChannelStore;
use crate::collaborators::{Directory, Launcher, Resolver, Transport};
use crate::config::BrokerConfig;
use crate::instances::{AppInstance, HostingMode, InstanceRegistry, InstanceState};
use crate::intents::IntentRouter;
use crate::listeners::ListenerRegistry;
use crate::pending::PendingQueue;
use crate::session::ConnectionManager;

/// One session's interop broker.
pub struct Broker {
    session_id: SessionId,
    channels: ChannelStore,
    instances: Arc<InstanceRegistry>,
    listeners: Arc<ListenerRegistry>,
    pending: Arc<PendingQueue>,
    router: Arc<IntentRouter>,
    connections: ConnectionManager,
    directory: Arc<dyn Directory>,
    launcher: Arc<dyn Launcher>,
    transport: Arc<dyn Transport>,
    config: BrokerConfig,
}

impl Broker {
    /// Build a broker for one session.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        config: BrokerConfig,
        directory: Arc<dyn Directory>,
        resolver: Arc<dyn Resolver>,
        launcher: Arc<dyn Launcher>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let instances = Arc::new(InstanceRegistry::new());
        let listeners = Arc::new(ListenerRegistry::new());
        let pending = Arc::new(PendingQueue::new(config.pending_delivery_ttl));
        let router = Arc::new(IntentRouter::new(
            Arc::clone(&listeners),
            Arc::clone(&instances),
            Arc::clone(&pending),
            Arc::clone(&directory),
            resolver,
            Arc::clone(&launcher),
            Arc::clone(&transport),
            config.intent_ack_timeout,
        ));
        let connections = ConnectionManager::new(
            Arc::clone(&instances),
            Arc::clone(&listeners),
            Arc::clone(&pending),
            Arc::clone(&router),
            Arc::clone(&directory),
            Arc::clone(&transport),
            config.debug_recovery,
        );
        Self {
            session_id,
            channels: ChannelStore::new(),
            instances,
            listeners,
            pending,
            router,
            connections,
            directory,
            launcher,
            transport,
            config,
        }
    }

    /// The session this broker serves.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Pre-register a launching app instance.
    pub fn register_app_launch(
        &self,
        app_id: &str,
        hosting: HostingMode,
        metadata: AppMetadata,
        destination: Option<ChannelId>,
    ) -> InstanceId {
        self.connections
            .register_app_launch(app_id, hosting, metadata, destination)
    }

    /// Complete an app's hello handshake.
    pub async fn hello(&self, instance_id: &InstanceId, app_id: &str) -> Result<()> {
        self.connections.hello(instance_id, app_id).await
    }

    /// Tear down a departed instance.
    pub fn disconnect(&self, instance_id: &InstanceId) {
        self.connections.disconnect(instance_id);
    }

    /// All connected instances, oldest first.
    #[must_use]
    pub fn connected_apps(&self) -> Vec<AppInstance> {
        self.instances.connected()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channels and broadcast
    // ─────────────────────────────────────────────────────────────────────

    /// Broadcast a context.
    ///
    /// The channel is the explicit one if given, else the sender's current
    /// channel, else the default. The context lands in the channel history
    /// first, then fans out to every matching listener from one membership
    /// snapshot; a failed delivery to one recipient never affects the rest.
    #[instrument(skip(self, context), fields(sender = %sender, context_type = %context.context_type))]
    pub fn broadcast(
        &self,
        sender: &InstanceId,
        channel: Option<ChannelId>,
        context: Context,
    ) -> Result<()> {
        let details = self.ensure_connected(sender)?;
        let channel = channel
            .or(details.channel_id)
            .unwrap_or_else(|| ChannelId::new(DEFAULT_CHANNEL_ID));

        self.channels.append(&channel, context.clone());
        counter!("fdc3_broadcasts_total").increment(1);

        let memberships = self.instances.channel_snapshot();
        let recipients =
            self.listeners
                .broadcast_recipients(sender, &channel, &context, &memberships);
        debug!(channel = %channel, recipients = recipients.len(), "broadcast fan-out");
        for (listener_id, owner) in recipients {
            let event = BrokerEvent::Context {
                listener_id,
                channel_id: Some(channel.clone()),
                context: context.clone(),
            };
            if let Err(e) = self.transport.post(&owner, &event) {
                warn!(error = %e, recipient = %owner, "context delivery failed");
            }
        }
        Ok(())
    }

    /// Join a user channel, or leave all channels when `channel` is unset.
    /// Emits a membership-change event to the instance either way.
    pub fn join_user_channel(
        &self,
        instance_id: &InstanceId,
        channel: Option<ChannelId>,
    ) -> Result<()> {
        let _ = self.ensure_connected(instance_id)?;
        if let Some(ref c) = channel {
            let joinable = self.channels.info(c).is_some_and(|info| {
                matches!(info.channel_type, ChannelType::User | ChannelType::System)
            });
            if !joinable {
                return Err(Fdc3Error::CreationFailed(format!(
                    "'{c}' is not a user channel"
                )));
            }
        }
        self.instances.set_channel(instance_id, channel.clone())?;
        let event = BrokerEvent::ChannelChanged {
            instance_id: instance_id.clone(),
            channel_id: channel,
        };
        if let Err(e) = self.transport.post(instance_id, &event) {
            warn!(error = %e, instance = %instance_id, "channel-change notification failed");
        }
        Ok(())
    }

    /// Get or create an app channel.
    pub fn get_or_create_channel(
        &self,
        instance_id: &InstanceId,
        channel: &ChannelId,
    ) -> Result<ChannelInfo> {
        let _ = self.ensure_connected(instance_id)?;
        self.channels.get_or_create(channel, ChannelType::App)
    }

    /// The most recent context on a channel, optionally filtered by type.
    #[must_use]
    pub fn get_current_context(
        &self,
        channel: &ChannelId,
        context_type: Option<&str>,
    ) -> Option<Context> {
        self.channels.current_context(channel, context_type)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────

    /// Register a context listener. At most one compatible parked delivery
    /// is replayed to it immediately.
    pub fn add_context_listener(
        &self,
        owner: &InstanceId,
        context_type: Option<String>,
        channel: Option<ChannelId>,
    ) -> Result<ListenerId> {
        let _ = self.ensure_connected(owner)?;
        let listener_id =
            self.listeners
                .add_context(owner, context_type.clone(), channel.clone());
        if let Some((context, parked_channel)) =
            self.pending
                .claim_context(owner, context_type.as_deref(), channel.as_ref())
        {
            let event = BrokerEvent::Context {
                listener_id: listener_id.clone(),
                channel_id: parked_channel,
                context,
            };
            if let Err(e) = self.transport.post(owner, &event) {
                warn!(error = %e, owner = %owner, "parked context replay failed");
            }
        }
        Ok(listener_id)
    }

    /// Register an intent listener and replay any parked intent for it.
    pub fn add_intent_listener(&self, owner: &InstanceId, intent: &str) -> Result<ListenerId> {
        let _ = self.ensure_connected(owner)?;
        let listener_id = self.listeners.add_intent(owner, intent.to_string());
        let _ = self.router.replay_parked(owner, intent);
        Ok(listener_id)
    }

    /// Drop a listener. Idempotent; reports whether anything was removed.
    pub fn drop_listener(&self, listener_id: &ListenerId) -> bool {
        self.listeners.drop_listener(listener_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Intents
    // ─────────────────────────────────────────────────────────────────────

    /// Raise an intent and wait for the fulfilling app's ack.
    pub async fn raise_intent(
        &self,
        raiser: &InstanceId,
        intent: &str,
        context: Context,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolution> {
        let _ = self.ensure_connected(raiser)?;
        self.router.raise(raiser, intent, context, target).await
    }

    /// Correlate an intent target's ack back to the waiting raiser.
    pub fn intent_result(
        &self,
        from: &InstanceId,
        request_id: &RequestId,
        result_id: Option<String>,
    ) -> bool {
        self.router.ack(from, request_id, result_id)
    }

    /// Apps able to handle an intent.
    pub async fn find_intent(&self, intent: &str, context_type: Option<&str>) -> IntentAppList {
        self.router.find_intent(intent, context_type).await
    }

    /// Intents usable with a context type.
    pub async fn find_intents_by_context(&self, context_type: &str) -> Vec<IntentAppList> {
        self.router.find_intents_by_context(context_type).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Open
    // ─────────────────────────────────────────────────────────────────────

    /// Open a directory app, optionally handing it a startup context.
    ///
    /// The context is parked before the launch so the new instance's first
    /// matching context listener claims it, then the call waits for the
    /// handshake. A launch that never connects is torn down on timeout.
    #[instrument(skip(self, context), fields(opener = %opener, app = app_id))]
    pub async fn open(
        &self,
        opener: &InstanceId,
        app_id: &str,
        context: Option<Context>,
    ) -> Result<InstanceId> {
        let _ = self.ensure_connected(opener)?;
        let apps = self.directory.apps_by_id(app_id).await.unwrap_or_else(|e| {
            warn!(error = %e, "directory lookup failed, treating as empty");
            Vec::new()
        });
        let Some(app) = apps.first() else {
            return Err(Fdc3Error::AppNotFound(app_id.to_string()));
        };

        let instance_id = self.register_app_launch(
            app_id,
            HostingMode::Frame,
            AppMetadata {
                title: Some(app.title.clone()),
                icon: app.icon.clone(),
            },
            None,
        );
        if let Some(context) = context {
            self.pending.enqueue_context(&instance_id, context, None);
        }

        if let Err(e) = self.launcher.launch(app, &instance_id, None).await {
            warn!(error = %e, "launch failed");
            self.connections.disconnect(&instance_id);
            return Err(Fdc3Error::AppNotFound(format!("{app_id}: launch failed")));
        }
        counter!("fdc3_opens_total").increment(1);

        if let Err(e) = self
            .connections
            .wait_connected(&instance_id, self.config.intent_ack_timeout)
            .await
        {
            warn!(instance = %instance_id, "opened app never completed its handshake");
            self.connections.disconnect(&instance_id);
            return Err(e);
        }
        Ok(instance_id)
    }

    fn ensure_connected(&self, instance_id: &InstanceId) -> Result<AppInstance> {
        match self.instances.details(instance_id) {
            Some(details) if details.state == InstanceState::Connected => Ok(details),
            Some(_) => Err(Fdc3Error::InvalidInstance(format!(
                "{instance_id} has not completed its handshake"
            ))),
            None => Err(Fdc3Error::InvalidInstance(instance_id.to_string())),
        }
    }
}
