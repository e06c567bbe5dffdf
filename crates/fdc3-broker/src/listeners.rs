//! Listener subscriptions and broadcast fan-out resolution.
//!
//! Subscriptions are stored in registration order, which makes fan-out
//! deterministic for a given state. The kind is an exhaustive tagged enum
//! so context- and intent-listener handling can never be confused by
//! optional-field sniffing.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use fdc3_core::constants::DEFAULT_CHANNEL_ID;
use fdc3_core::context::Context;
use fdc3_core::ids::{ChannelId, InstanceId, ListenerId};

/// What a subscription listens for.
#[derive(Clone, Debug, PartialEq)]
pub enum ListenerKind {
    /// Context broadcasts, optionally filtered by type and pinned to a
    /// channel.
    Context {
        /// Type filter; unset accepts every context type.
        context_type: Option<String>,
        /// Channel override; unset resolves to the owner's current channel
        /// at each delivery.
        channel: Option<ChannelId>,
    },
    /// A named intent.
    Intent {
        /// Intent name.
        intent: String,
    },
}

/// One registered subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct Subscription {
    /// Subscription id handed back to the owner.
    pub listener_id: ListenerId,
    /// Owning instance.
    pub owner: InstanceId,
    /// What it listens for.
    pub kind: ListenerKind,
}

/// Per-session listener registry.
pub struct ListenerRegistry {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Register a context listener and return its id.
    pub fn add_context(
        &self,
        owner: &InstanceId,
        context_type: Option<String>,
        channel: Option<ChannelId>,
    ) -> ListenerId {
        self.add(owner, ListenerKind::Context { context_type, channel })
    }

    /// Register an intent listener and return its id.
    pub fn add_intent(&self, owner: &InstanceId, intent: String) -> ListenerId {
        self.add(owner, ListenerKind::Intent { intent })
    }

    fn add(&self, owner: &InstanceId, kind: ListenerKind) -> ListenerId {
        let listener_id = ListenerId::generate();
        debug!(listener = %listener_id, owner = %owner, ?kind, "listener registered");
        self.subscriptions.lock().push(Subscription {
            listener_id: listener_id.clone(),
            owner: owner.clone(),
            kind,
        });
        listener_id
    }

    /// Drop a subscription. Idempotent: dropping an unknown or
    /// already-dropped id is a no-op reporting `false`.
    pub fn drop_listener(&self, listener_id: &ListenerId) -> bool {
        let mut guard = self.subscriptions.lock();
        let before = guard.len();
        guard.retain(|s| &s.listener_id != listener_id);
        before != guard.len()
    }

    /// Remove every subscription owned by `owner` (disconnect cascade).
    pub fn drop_owned_by(&self, owner: &InstanceId) -> usize {
        let mut guard = self.subscriptions.lock();
        let before = guard.len();
        guard.retain(|s| &s.owner != owner);
        before - guard.len()
    }

    /// All subscriptions owned by `owner`, in registration order.
    #[must_use]
    pub fn owned_by(&self, owner: &InstanceId) -> Vec<Subscription> {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| &s.owner == owner)
            .cloned()
            .collect()
    }

    /// Resolve the recipients of a broadcast.
    ///
    /// A context listener receives the broadcast when its effective channel
    /// equals the broadcast channel and its type filter matches. The
    /// effective channel is the listener's override if set, else the
    /// owner's current channel from `memberships`, else the default
    /// channel. Owners absent from `memberships` (not `Connected`) and the
    /// sender itself receive nothing.
    #[must_use]
    pub fn broadcast_recipients(
        &self,
        sender: &InstanceId,
        channel: &ChannelId,
        context: &Context,
        memberships: &HashMap<InstanceId, Option<ChannelId>>,
    ) -> Vec<(ListenerId, InstanceId)> {
        let default = ChannelId::new(DEFAULT_CHANNEL_ID);
        self.subscriptions
            .lock()
            .iter()
            .filter_map(|s| {
                let ListenerKind::Context { context_type, channel: pinned } = &s.kind else {
                    return None;
                };
                if &s.owner == sender {
                    return None;
                }
                let current = memberships.get(&s.owner)?;
                let effective = pinned
                    .as_ref()
                    .or(current.as_ref())
                    .unwrap_or(&default);
                if effective == channel && context.matches_filter(context_type.as_deref()) {
                    Some((s.listener_id.clone(), s.owner.clone()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Instances holding a listener for `intent`, de-duplicated, in
    /// registration order.
    #[must_use]
    pub fn intent_holders(&self, intent: &str) -> Vec<InstanceId> {
        let mut holders: Vec<InstanceId> = Vec::new();
        for s in self.subscriptions.lock().iter() {
            if matches!(&s.kind, ListenerKind::Intent { intent: i } if i == intent)
                && !holders.contains(&s.owner)
            {
                holders.push(s.owner.clone());
            }
        }
        holders
    }

    /// Every intent name any connected listener is registered for, with its
    /// holders.
    #[must_use]
    pub fn intents_by_holder(&self) -> HashMap<String, Vec<InstanceId>> {
        let mut map: HashMap<String, Vec<InstanceId>> = HashMap::new();
        for s in self.subscriptions.lock().iter() {
            if let ListenerKind::Intent { intent } = &s.kind {
                let holders = map.entry(intent.clone()).or_default();
                if !holders.contains(&s.owner) {
                    holders.push(s.owner.clone());
                }
            }
        }
        map
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
