//! Queued point-to-point deliveries.
//!
//! When an intent or open-context targets an instance that has not yet
//! registered a matching listener (typically because it is still loading),
//! the delivery is parked here. A later listener registration claims the
//! oldest compatible entry; entries older than the TTL are unclaimable and
//! purged opportunistically on access.
//!
//! Timing uses `tokio::time::Instant` so expiry is testable under a paused
//! runtime clock.

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

use fdc3_core::context::Context;
use fdc3_core::ids::{ChannelId, InstanceId, RequestId};

/// What a parked delivery carries.
#[derive(Clone, Debug, PartialEq)]
pub enum PendingPayload {
    /// A context destined for the target's first matching context listener
    /// (the `open` flow).
    Context {
        /// The context.
        context: Context,
        /// Channel the delivery is associated with, if any.
        channel: Option<ChannelId>,
    },
    /// An intent delivery awaiting the target's intent listener.
    Intent {
        /// Transfer id the target echoes in its ack.
        request_id: RequestId,
        /// Intent name.
        intent: String,
        /// Context argument.
        context: Context,
        /// Raising instance, when known.
        source: Option<InstanceId>,
    },
}

struct PendingDelivery {
    target: InstanceId,
    payload: PendingPayload,
    enqueued_at: Instant,
}

/// Per-session queue of undeliverable point-to-point payloads.
pub struct PendingQueue {
    deliveries: Mutex<Vec<PendingDelivery>>,
    ttl: Duration,
}

impl PendingQueue {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            ttl,
        }
    }

    /// Park a context for the target's first matching context listener.
    pub fn enqueue_context(
        &self,
        target: &InstanceId,
        context: Context,
        channel: Option<ChannelId>,
    ) {
        debug!(target = %target, context_type = %context.context_type, "context delivery parked");
        self.push(target, PendingPayload::Context { context, channel });
    }

    /// Park an intent delivery for the target's intent listener.
    pub fn enqueue_intent(
        &self,
        target: &InstanceId,
        request_id: RequestId,
        intent: &str,
        context: Context,
        source: Option<InstanceId>,
    ) {
        debug!(target = %target, intent, request = %request_id, "intent delivery parked");
        self.push(
            target,
            PendingPayload::Intent {
                request_id,
                intent: intent.to_string(),
                context,
                source,
            },
        );
    }

    fn push(&self, target: &InstanceId, payload: PendingPayload) {
        let mut guard = self.deliveries.lock();
        Self::purge(&mut guard, self.ttl);
        guard.push(PendingDelivery {
            target: target.clone(),
            payload,
            enqueued_at: Instant::now(),
        });
    }

    /// Claim the oldest live context delivery compatible with a freshly
    /// registered context listener.
    ///
    /// Compatible means: type filter unset or equal to the parked context's
    /// type, and channel override unset or equal to the parked channel.
    pub fn claim_context(
        &self,
        target: &InstanceId,
        context_type: Option<&str>,
        pinned_channel: Option<&ChannelId>,
    ) -> Option<(Context, Option<ChannelId>)> {
        let mut guard = self.deliveries.lock();
        Self::purge(&mut guard, self.ttl);
        let pos = guard.iter().position(|d| {
            &d.target == target
                && matches!(&d.payload, PendingPayload::Context { context, channel } if {
                    context.matches_filter(context_type)
                        && match (pinned_channel, channel) {
                            (Some(pinned), Some(parked)) => pinned == parked,
                            _ => true,
                        }
                })
        })?;
        match guard.remove(pos).payload {
            PendingPayload::Context { context, channel } => Some((context, channel)),
            PendingPayload::Intent { .. } => unreachable!("position matched a context payload"),
        }
    }

    /// Claim the oldest live intent delivery for a freshly registered
    /// intent listener.
    pub fn claim_intent(
        &self,
        target: &InstanceId,
        intent: &str,
    ) -> Option<(RequestId, Context, Option<InstanceId>)> {
        let mut guard = self.deliveries.lock();
        Self::purge(&mut guard, self.ttl);
        let pos = guard.iter().position(|d| {
            &d.target == target
                && matches!(&d.payload, PendingPayload::Intent { intent: i, .. } if i == intent)
        })?;
        match guard.remove(pos).payload {
            PendingPayload::Intent { request_id, context, source, .. } => {
                Some((request_id, context, source))
            }
            PendingPayload::Context { .. } => unreachable!("position matched an intent payload"),
        }
    }

    /// Discard everything parked for `target` (disconnect cascade).
    pub fn drop_for(&self, target: &InstanceId) -> usize {
        let mut guard = self.deliveries.lock();
        let before = guard.len();
        guard.retain(|d| &d.target != target);
        before - guard.len()
    }

    /// Live entries (expired ones purged first).
    #[must_use]
    pub fn len(&self) -> usize {
        let mut guard = self.deliveries.lock();
        Self::purge(&mut guard, self.ttl);
        guard.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge(deliveries: &mut Vec<PendingDelivery>, ttl: Duration) {
        let now = Instant::now();
        let before = deliveries.len();
        deliveries.retain(|d| now.duration_since(d.enqueued_at) < ttl);
        let dropped = before - deliveries.len();
        if dropped > 0 {
            debug!(dropped, "expired pending deliveries purged");
        }
    }
}
