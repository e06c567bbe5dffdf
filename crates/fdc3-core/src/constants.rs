//! Shared constants.

use std::time::Duration;

/// The reserved channel every instance falls back to when it has joined no
/// user channel and its listener carries no override. Never creatable as an
/// app or private channel.
pub const DEFAULT_CHANNEL_ID: &str = "default";

/// Predefined user channels seeded into every session.
pub const USER_CHANNELS: &[(&str, &str)] = &[
    ("red", "#FF0000"),
    ("orange", "#FF8C00"),
    ("yellow", "#FFE733"),
    ("green", "#00CC88"),
    ("blue", "#1C7CE8"),
    ("purple", "#C873FF"),
];

/// How long a queued point-to-point delivery survives before a matching
/// listener registration can no longer claim it.
pub const PENDING_DELIVERY_TTL: Duration = Duration::from_secs(120);

/// Default caller-facing raise-intent timeout. Independent of
/// [`PENDING_DELIVERY_TTL`]; overridable via settings.
pub const DEFAULT_INTENT_ACK_TIMEOUT: Duration = Duration::from_secs(60);
