//! Intent routing: candidate discovery, resolution, delivery, and ack
//! correlation.
//!
//! A raise is a *transfer*: the raiser's future parks on a oneshot keyed by
//! the transfer's request id, the chosen target receives an intent event
//! (immediately, or via the pending queue once it registers a listener),
//! and the target's `intentResultRequest` ack resolves the oneshot. A
//! caller-facing timeout bounds the whole thing.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Duration;
use tracing::{debug, instrument, warn};

use fdc3_core::context::Context;
use fdc3_core::directory::{AppMetadata, DirectoryApp, IntentAppList, ResolverCandidate};
use fdc3_core::errors::{Fdc3Error, Result};
use fdc3_core::ids::{ChannelId, InstanceId, RequestId};
use fdc3_core::protocol::{BrokerEvent, IntentResolution, IntentTarget};

use crate::collaborators::{Directory, Launcher, Resolver, ResolverOutcome, Transport};
use crate::instances::{AppInstance, HostingMode, InstanceRegistry, InstanceState};
use crate::listeners::ListenerRegistry;
use crate::pending::PendingQueue;

/// An intent target's acknowledgment.
#[derive(Debug)]
struct IntentAck {
    instance_id: InstanceId,
    result_id: Option<String>,
}

/// How far an in-flight transfer has progressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransferStatus {
    /// Intent event posted to a live listener; awaiting the ack.
    Delivered,
    /// Parked in the pending queue until the target registers its
    /// listener; then awaiting the ack.
    Parked,
}

struct IntentTransfer {
    raiser: InstanceId,
    /// Instance the intent was delivered (or parked) to; the only one
    /// whose ack resolves the transfer.
    target: InstanceId,
    status: TransferStatus,
}

/// Per-session intent router.
pub struct IntentRouter {
    listeners: Arc<ListenerRegistry>,
    instances: Arc<InstanceRegistry>,
    pending: Arc<PendingQueue>,
    directory: Arc<dyn Directory>,
    resolver: Arc<dyn Resolver>,
    launcher: Arc<dyn Launcher>,
    transport: Arc<dyn Transport>,
    acks: Mutex<HashMap<RequestId, oneshot::Sender<IntentAck>>>,
    transfers: Mutex<HashMap<RequestId, IntentTransfer>>,
    ack_timeout: Duration,
}

impl IntentRouter {
    pub(crate) fn new(
        listeners: Arc<ListenerRegistry>,
        instances: Arc<InstanceRegistry>,
        pending: Arc<PendingQueue>,
        directory: Arc<dyn Directory>,
        resolver: Arc<dyn Resolver>,
        launcher: Arc<dyn Launcher>,
        transport: Arc<dyn Transport>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            listeners,
            instances,
            pending,
            directory,
            resolver,
            launcher,
            transport,
            acks: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            ack_timeout,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Raise
    // ─────────────────────────────────────────────────────────────────────

    /// Raise `intent` on behalf of `raiser` and wait for the fulfilling
    /// app's ack.
    #[instrument(skip(self, context), fields(raiser = %raiser, intent))]
    pub async fn raise(
        &self,
        raiser: &InstanceId,
        intent: &str,
        context: Context,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolution> {
        counter!("fdc3_intents_raised_total").increment(1);
        let raiser_details = self
            .instances
            .details(raiser)
            .ok_or_else(|| Fdc3Error::InvalidInstance(raiser.to_string()))?;

        // An explicit instance target short-circuits discovery entirely.
        if let Some(instance_id) = target.as_ref().and_then(|t| t.instance_id.clone()) {
            let details = self
                .instances
                .details(&instance_id)
                .ok_or_else(|| Fdc3Error::InvalidInstance(instance_id.to_string()))?;
            return self.deliver(&details, intent, context, raiser).await;
        }
        let target_app = target.and_then(|t| t.app_id);

        let running = self.running_candidates(intent, target_app.as_deref());
        let directory = self
            .directory_candidates(intent, Some(&context.context_type), target_app.as_deref())
            .await;

        let mut distinct_apps: Vec<&str> = running
            .iter()
            .map(|i| i.app_id.as_str())
            .chain(directory.iter().map(|a| a.app_id.as_str()))
            .collect();
        distinct_apps.sort_unstable();
        distinct_apps.dedup();

        if distinct_apps.is_empty() {
            counter!("fdc3_intents_unmatched_total").increment(1);
            return Err(Fdc3Error::NoAppsFound(intent.to_string()));
        }

        // Tab-hosted raisers have no workspace frame to anchor implicit
        // choices; resolution is always explicit for them.
        if raiser_details.hosting == HostingMode::Tab {
            return self
                .escalate(raiser, &raiser_details, intent, context, &running, &directory)
                .await;
        }

        if distinct_apps.len() == 1 {
            if running.is_empty() {
                if let [only] = directory.as_slice() {
                    return self
                        .launch_and_deliver(only, raiser_details.channel_id.clone(), intent, context, raiser)
                        .await;
                }
            } else {
                let in_channel: Vec<&AppInstance> = running
                    .iter()
                    .filter(|i| i.channel_id == raiser_details.channel_id)
                    .collect();
                if let [only] = in_channel.as_slice() {
                    let chosen = (*only).clone();
                    return self.deliver(&chosen, intent, context, raiser).await;
                }
            }
        }

        self.escalate(raiser, &raiser_details, intent, context, &running, &directory)
            .await
    }

    fn running_candidates(&self, intent: &str, target_app: Option<&str>) -> Vec<AppInstance> {
        self.listeners
            .intent_holders(intent)
            .into_iter()
            .filter_map(|id| self.instances.details(&id))
            .filter(|i| i.state == InstanceState::Connected)
            .filter(|i| target_app.is_none_or(|app| i.app_id == app))
            .collect()
    }

    /// Directory candidates for an intent. A directory read failure is
    /// logged and degrades to no candidates.
    async fn directory_candidates(
        &self,
        intent: &str,
        context_type: Option<&str>,
        target_app: Option<&str>,
    ) -> Vec<DirectoryApp> {
        match self.directory.apps_by_intent(intent, context_type).await {
            Ok(apps) => apps
                .into_iter()
                .filter(|a| a.advertises(intent, context_type))
                .filter(|a| target_app.is_none_or(|t| a.app_id == t))
                .collect(),
            Err(e) => {
                warn!(error = %e, intent, "directory lookup failed, treating as empty");
                Vec::new()
            }
        }
    }

    async fn escalate(
        &self,
        raiser: &InstanceId,
        raiser_details: &AppInstance,
        intent: &str,
        context: Context,
        running: &[AppInstance],
        directory: &[DirectoryApp],
    ) -> Result<IntentResolution> {
        counter!("fdc3_resolver_escalations_total").increment(1);
        // Running instances first, then directory entries for a fresh
        // launch. A directory entry stays listed even when an instance of
        // the same app is running.
        let mut candidates: Vec<ResolverCandidate> =
            running.iter().map(candidate_from_instance).collect();
        candidates.extend(directory.iter().map(candidate_from_app));

        let outcome = self
            .resolver
            .resolve(intent, &context, candidates)
            .await
            .map_err(|e| {
                warn!(error = %e, intent, "resolver failed");
                Fdc3Error::ResolverTimeout
            })?;

        match outcome {
            ResolverOutcome::Cancelled => {
                debug!(intent, "resolver dismissed without a choice");
                Err(Fdc3Error::UserCancelled)
            }
            ResolverOutcome::Chosen(choice) => {
                if let Some(instance_id) = choice.instance_id {
                    let details = self
                        .instances
                        .details(&instance_id)
                        .ok_or_else(|| Fdc3Error::InvalidInstance(instance_id.to_string()))?;
                    self.deliver(&details, intent, context, raiser).await
                } else {
                    let app = directory
                        .iter()
                        .find(|a| a.app_id == choice.app_id)
                        .ok_or_else(|| Fdc3Error::AppNotFound(choice.app_id.clone()))?;
                    self.launch_and_deliver(
                        app,
                        raiser_details.channel_id.clone(),
                        intent,
                        context,
                        raiser,
                    )
                    .await
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────────────

    /// Deliver to an already-registered instance: immediately when it holds
    /// a listener for the intent, parked otherwise.
    async fn deliver(
        &self,
        target: &AppInstance,
        intent: &str,
        context: Context,
        raiser: &InstanceId,
    ) -> Result<IntentResolution> {
        let request_id = RequestId::generate();
        let rx = self.track(&request_id, raiser, &target.instance_id);

        let has_listener = self
            .listeners
            .owned_by(&target.instance_id)
            .iter()
            .any(|s| matches!(&s.kind, crate::listeners::ListenerKind::Intent { intent: i } if i == intent));

        if has_listener && target.state == InstanceState::Connected {
            let event = BrokerEvent::Intent {
                request_id: request_id.clone(),
                intent: intent.to_string(),
                context,
                source: Some(raiser.clone()),
            };
            if let Err(e) = self.transport.post(&target.instance_id, &event) {
                warn!(error = %e, target = %target.instance_id, "intent delivery failed");
                self.untrack(&request_id);
                return Err(Fdc3Error::ResolverTimeout);
            }
            debug!(target = %target.instance_id, request = %request_id, "intent delivered");
        } else {
            self.mark_parked(&request_id);
            self.pending.enqueue_intent(
                &target.instance_id,
                request_id.clone(),
                intent,
                context,
                Some(raiser.clone()),
            );
        }

        self.await_ack(request_id, rx, &target.app_id, intent).await
    }

    /// Launch a directory app into the raiser's channel and park the
    /// delivery until the new instance registers its listener.
    async fn launch_and_deliver(
        &self,
        app: &DirectoryApp,
        destination: Option<ChannelId>,
        intent: &str,
        context: Context,
        raiser: &InstanceId,
    ) -> Result<IntentResolution> {
        let instance_id = self.instances.register(
            &app.app_id,
            HostingMode::Frame,
            AppMetadata {
                title: Some(app.title.clone()),
                icon: app.icon.clone(),
            },
            destination.clone(),
        );
        let request_id = RequestId::generate();
        let rx = self.track(&request_id, raiser, &instance_id);
        self.mark_parked(&request_id);
        self.pending.enqueue_intent(
            &instance_id,
            request_id.clone(),
            intent,
            context,
            Some(raiser.clone()),
        );

        if let Err(e) = self
            .launcher
            .launch(app, &instance_id, destination.as_ref())
            .await
        {
            warn!(error = %e, app = app.app_id, "launch failed");
            self.untrack(&request_id);
            let _ = self.pending.drop_for(&instance_id);
            let _ = self.instances.set_state(&instance_id, InstanceState::Terminated);
            return Err(Fdc3Error::NoAppsFound(intent.to_string()));
        }
        counter!("fdc3_intent_launches_total").increment(1);

        self.await_ack(request_id, rx, &app.app_id, intent).await
    }

    fn track(
        &self,
        request_id: &RequestId,
        raiser: &InstanceId,
        target: &InstanceId,
    ) -> oneshot::Receiver<IntentAck> {
        let (tx, rx) = oneshot::channel();
        let _ = self.acks.lock().insert(request_id.clone(), tx);
        let _ = self.transfers.lock().insert(
            request_id.clone(),
            IntentTransfer {
                raiser: raiser.clone(),
                target: target.clone(),
                status: TransferStatus::Delivered,
            },
        );
        rx
    }

    fn mark_parked(&self, request_id: &RequestId) {
        if let Some(t) = self.transfers.lock().get_mut(request_id) {
            t.status = TransferStatus::Parked;
        }
    }

    fn untrack(&self, request_id: &RequestId) {
        let _ = self.acks.lock().remove(request_id);
        let _ = self.transfers.lock().remove(request_id);
    }

    async fn await_ack(
        &self,
        request_id: RequestId,
        rx: oneshot::Receiver<IntentAck>,
        source_app: &str,
        intent: &str,
    ) -> Result<IntentResolution> {
        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(ack)) => {
                self.untrack(&request_id);
                counter!("fdc3_intents_resolved_total").increment(1);
                Ok(IntentResolution {
                    source: source_app.to_string(),
                    instance_id: ack.instance_id,
                    intent: intent.to_string(),
                    result_id: ack.result_id,
                })
            }
            // The tracked sender was dropped: the target (or the raiser)
            // disconnected before acking.
            Ok(Err(_)) => {
                self.untrack(&request_id);
                Err(Fdc3Error::ResolverTimeout)
            }
            Err(_) => {
                warn!(request = %request_id, intent, "intent ack timed out");
                counter!("fdc3_intent_timeouts_total").increment(1);
                self.untrack(&request_id);
                Err(Fdc3Error::ResolverTimeout)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Acks and replay
    // ─────────────────────────────────────────────────────────────────────

    /// Correlate a target's `intentResultRequest` back to the waiting
    /// raiser. Unknown or already-resolved request ids are ignored, as are
    /// acks from any instance other than the delivery target.
    pub fn ack(&self, from: &InstanceId, request_id: &RequestId, result_id: Option<String>) -> bool {
        let from_target = match self.transfers.lock().get(request_id) {
            Some(t) => &t.target == from,
            None => {
                debug!(request = %request_id, from = %from, "ack for unknown transfer ignored");
                return false;
            }
        };
        if !from_target {
            warn!(request = %request_id, from = %from, "ack from non-target instance ignored");
            return false;
        }
        let Some(tx) = self.acks.lock().remove(request_id) else {
            debug!(request = %request_id, from = %from, "ack for unknown transfer ignored");
            return false;
        };
        tx.send(IntentAck {
            instance_id: from.clone(),
            result_id,
        })
        .is_ok()
    }

    /// Replay the oldest parked intent for a freshly registered listener.
    /// Returns `true` when a delivery went out.
    pub fn replay_parked(&self, owner: &InstanceId, intent: &str) -> bool {
        let Some((request_id, context, source)) = self.pending.claim_intent(owner, intent) else {
            return false;
        };
        if let Some(t) = self.transfers.lock().get_mut(&request_id) {
            t.status = TransferStatus::Delivered;
        }
        let event = BrokerEvent::Intent {
            request_id: request_id.clone(),
            intent: intent.to_string(),
            context,
            source,
        };
        match self.transport.post(owner, &event) {
            Ok(()) => {
                debug!(target = %owner, request = %request_id, "parked intent replayed");
                true
            }
            Err(e) => {
                warn!(error = %e, target = %owner, "parked intent replay failed");
                false
            }
        }
    }

    /// Drop every transfer raised by a disconnecting instance. Their
    /// oneshot senders go with them, failing any stray waiters fast.
    pub fn discard_raised_by(&self, raiser: &InstanceId) {
        let stale: Vec<RequestId> = self
            .transfers
            .lock()
            .iter()
            .filter(|(_, t)| &t.raiser == raiser)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.untrack(id);
        }
        if !stale.is_empty() {
            debug!(raiser = %raiser, dropped = stale.len(), "in-flight transfers discarded");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Discovery queries
    // ─────────────────────────────────────────────────────────────────────

    /// Apps able to handle `intent`: running listener holders merged with
    /// directory entries, de-duplicated by app id (running wins).
    pub async fn find_intent(&self, intent: &str, context_type: Option<&str>) -> IntentAppList {
        let mut apps: Vec<ResolverCandidate> = Vec::new();
        for instance in self.running_candidates(intent, None) {
            if !apps.iter().any(|c| c.app_id == instance.app_id) {
                apps.push(candidate_from_instance(&instance));
            }
        }
        for app in self.directory_candidates(intent, context_type, None).await {
            if !apps.iter().any(|c| c.app_id == app.app_id) {
                apps.push(candidate_from_app(&app));
            }
        }
        IntentAppList {
            intent: intent.to_string(),
            apps,
        }
    }

    /// Every intent usable with a context type, each with its handler apps.
    pub async fn find_intents_by_context(&self, context_type: &str) -> Vec<IntentAppList> {
        let mut by_intent: HashMap<String, Vec<ResolverCandidate>> = HashMap::new();

        for (intent, holders) in self.listeners.intents_by_holder() {
            let apps = by_intent.entry(intent).or_default();
            for holder in holders {
                if let Some(instance) = self.instances.details(&holder) {
                    if instance.state == InstanceState::Connected
                        && !apps.iter().any(|c| c.app_id == instance.app_id)
                    {
                        apps.push(candidate_from_instance(&instance));
                    }
                }
            }
        }

        let directory_apps = match self.directory.apps_by_context(context_type).await {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, context_type, "directory lookup failed, treating as empty");
                Vec::new()
            }
        };
        for app in &directory_apps {
            for intent in &app.intents {
                if intent.contexts.is_empty() || intent.contexts.iter().any(|c| c == context_type)
                {
                    let apps = by_intent.entry(intent.name.clone()).or_default();
                    if !apps.iter().any(|c| c.app_id == app.app_id) {
                        apps.push(candidate_from_app(app));
                    }
                }
            }
        }

        let mut result: Vec<IntentAppList> = by_intent
            .into_iter()
            .filter(|(_, apps)| !apps.is_empty())
            .map(|(intent, apps)| IntentAppList { intent, apps })
            .collect();
        result.sort_by(|a, b| a.intent.cmp(&b.intent));
        result
    }
}

fn candidate_from_instance(instance: &AppInstance) -> ResolverCandidate {
    ResolverCandidate {
        app_id: instance.app_id.clone(),
        title: instance
            .metadata
            .title
            .clone()
            .unwrap_or_else(|| instance.app_id.clone()),
        icon: instance.metadata.icon.clone(),
        instance_id: Some(instance.instance_id.clone()),
        channel_id: instance.channel_id.clone(),
    }
}

fn candidate_from_app(app: &DirectoryApp) -> ResolverCandidate {
    ResolverCandidate {
        app_id: app.app_id.clone(),
        title: app.title.clone(),
        icon: app.icon.clone(),
        instance_id: None,
        channel_id: None,
    }
}
