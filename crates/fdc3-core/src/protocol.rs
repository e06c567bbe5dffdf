//! Wire protocol message families.
//!
//! Two families, each internally tagged by a `type` field:
//!
//! - **[`ClientRequest`]**: client → broker operations, wrapped in a
//!   [`WireRequest`] envelope carrying the caller's correlation id.
//! - **[`BrokerEvent`]**: broker → client pushes (channel changes, intent
//!   and context deliveries).
//!
//! The broker is transport-agnostic: these shapes travel equally over IPC,
//! WebSocket, or an in-process queue. iOS-style camelCase field names are
//! the wire convention throughout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::directory::DisplayMetadata;
use crate::ids::{ChannelId, InstanceId, ListenerId, RequestId, SessionId};

// ─────────────────────────────────────────────────────────────────────────────
// Channels on the wire
// ─────────────────────────────────────────────────────────────────────────────

/// Channel classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Predefined broker-owned channel (the reserved `"default"`).
    System,
    /// Predefined color channel users join explicitly.
    User,
    /// App-created shared channel.
    App,
    /// App-created private channel.
    Private,
}

/// Wire shape of a channel, as returned by `getOrCreateChannel`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    /// Channel id.
    pub id: ChannelId,
    /// Channel classification.
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Display metadata, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_metadata: Option<DisplayMetadata>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client → broker
// ─────────────────────────────────────────────────────────────────────────────

/// Explicit raise-intent target: an app, optionally a specific instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentTarget {
    /// Restrict candidates to this app id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Restrict candidates to this exact instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
}

/// Client → broker operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// Connection handshake carrying the broker-minted instance id the
    /// launching UI handed to this app.
    #[serde(rename = "hello", rename_all = "camelCase")]
    Hello {
        /// Pre-registered instance id.
        instance_id: InstanceId,
        /// Claimed app id, cross-checked during debug recovery.
        app_id: String,
        /// Session this instance belongs to.
        session_id: SessionId,
    },

    /// Broadcast a context on a channel.
    #[serde(rename = "broadcastRequest", rename_all = "camelCase")]
    Broadcast {
        /// Target channel; unset resolves to the sender's current channel.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
        /// Context to broadcast.
        context: Context,
    },

    /// Raise a named intent.
    #[serde(rename = "raiseIntentRequest", rename_all = "camelCase")]
    RaiseIntent {
        /// Intent name.
        intent: String,
        /// Context argument.
        context: Context,
        /// Optional explicit target.
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<IntentTarget>,
    },

    /// Subscribe to context broadcasts.
    #[serde(rename = "addContextListenerRequest", rename_all = "camelCase")]
    AddContextListener {
        /// Context-type filter; unset means all types.
        #[serde(skip_serializing_if = "Option::is_none")]
        context_type: Option<String>,
        /// Channel override; unset resolves at delivery time to the owner's
        /// current channel.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
    },

    /// Subscribe to a named intent.
    #[serde(rename = "addIntentListenerRequest", rename_all = "camelCase")]
    AddIntentListener {
        /// Intent name.
        intent: String,
    },

    /// Drop a listener subscription (idempotent).
    #[serde(rename = "dropListenerRequest", rename_all = "camelCase")]
    DropListener {
        /// Listener to drop.
        listener_id: ListenerId,
    },

    /// Read the most recent context on a channel.
    #[serde(rename = "getCurrentContextRequest", rename_all = "camelCase")]
    GetCurrentContext {
        /// Channel to read.
        channel_id: ChannelId,
        /// Optional type filter.
        #[serde(skip_serializing_if = "Option::is_none")]
        context_type: Option<String>,
    },

    /// Join a user channel (or leave all with `channel_id: None`).
    #[serde(rename = "joinUserChannelRequest", rename_all = "camelCase")]
    JoinUserChannel {
        /// Channel to join; unset leaves the current channel.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
    },

    /// Get or create an app channel.
    #[serde(rename = "getOrCreateChannelRequest", rename_all = "camelCase")]
    GetOrCreateChannel {
        /// Channel id.
        channel_id: ChannelId,
    },

    /// Query apps able to handle an intent.
    #[serde(rename = "findIntentRequest", rename_all = "camelCase")]
    FindIntent {
        /// Intent name.
        intent: String,
        /// Optional context-type filter.
        #[serde(skip_serializing_if = "Option::is_none")]
        context_type: Option<String>,
    },

    /// Query intents available for a context type.
    #[serde(rename = "findIntentsByContextRequest", rename_all = "camelCase")]
    FindIntentsByContext {
        /// Context type.
        context_type: String,
    },

    /// Open an app from the directory.
    #[serde(rename = "openRequest", rename_all = "camelCase")]
    Open {
        /// App to open.
        app_id: String,
        /// Context delivered to the opened app's first matching listener.
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Context>,
    },

    /// Ack from an intent target, correlating back to the raiser's promise.
    #[serde(rename = "intentResultRequest", rename_all = "camelCase")]
    IntentResult {
        /// The raise-intent transfer being acknowledged.
        request_id: RequestId,
        /// Opaque result handle, if the intent produced one.
        #[serde(skip_serializing_if = "Option::is_none")]
        result_id: Option<String>,
    },
}

/// Correlation envelope for client requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    /// Caller correlation id, echoed in the response.
    pub request_id: String,
    /// The operation.
    #[serde(flatten)]
    pub body: ClientRequest,
}

// ─────────────────────────────────────────────────────────────────────────────
// Broker → client
// ─────────────────────────────────────────────────────────────────────────────

/// Broker → client push events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerEvent {
    /// An instance's channel membership changed (also the channel-setup
    /// notification emitted on connect).
    #[serde(rename = "channelChangedEvent", rename_all = "camelCase")]
    ChannelChanged {
        /// Instance whose membership changed.
        instance_id: InstanceId,
        /// New channel; unset means no channel.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
    },

    /// An intent delivery to its chosen target.
    #[serde(rename = "intentEvent", rename_all = "camelCase")]
    Intent {
        /// Transfer id the target must echo in its ack.
        request_id: RequestId,
        /// Intent name.
        intent: String,
        /// Context argument.
        context: Context,
        /// Raising instance, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<InstanceId>,
    },

    /// A context delivery to one listener.
    #[serde(rename = "contextEvent", rename_all = "camelCase")]
    Context {
        /// Receiving listener.
        listener_id: ListenerId,
        /// Channel the broadcast ran on; unset for point-to-point delivery.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
        /// The context.
        context: Context,
    },
}

/// Response envelope: success result or taxonomy error, correlated by the
/// caller's request id. Handshake failures use this too — a connecting app
/// always gets an explicit rejection, never a hung promise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    /// Echoed correlation id.
    pub request_id: String,
    /// Operation result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Wire form of an [`Fdc3Error`](crate::errors::Fdc3Error).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    /// Stable taxonomy code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&crate::errors::Fdc3Error> for WireError {
    fn from(e: &crate::errors::Fdc3Error) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Caller-facing result of a successful `raiseIntent`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResolution {
    /// App that fulfilled the intent.
    pub source: String,
    /// Fulfilling instance.
    pub instance_id: InstanceId,
    /// Intent name.
    pub intent: String,
    /// Opaque result handle from the target's ack, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
}
