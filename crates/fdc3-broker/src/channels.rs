//! Channel registry and per-channel context history.

use std::collections::HashMap;
use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::debug;

use fdc3_core::constants::{DEFAULT_CHANNEL_ID, USER_CHANNELS};
use fdc3_core::context::Context;
use fdc3_core::directory::DisplayMetadata;
use fdc3_core::errors::{Fdc3Error, Result};
use fdc3_core::ids::ChannelId;
use fdc3_core::protocol::{ChannelInfo, ChannelType};

/// Most recent contexts retained per channel, newest first.
const HISTORY_DEPTH: usize = 32;

struct Channel {
    info: ChannelInfo,
    /// Newest first; one entry per broadcast, capped at [`HISTORY_DEPTH`].
    history: VecDeque<Context>,
    /// Latest context per type, unaffected by the history cap, so a typed
    /// read still answers after a burst of other types evicted the entry
    /// from `history`.
    latest_by_type: HashMap<String, Context>,
}

/// All channels in one session: the reserved default channel, the predefined
/// user channels, and any app/private channels created on demand.
///
/// Histories live only as long as the session. Reads return clones so no
/// lock is held while events fan out.
pub struct ChannelStore {
    channels: Mutex<HashMap<ChannelId, Channel>>,
}

impl ChannelStore {
    /// A store seeded with the default channel and the predefined user
    /// channels.
    #[must_use]
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        let default_id = ChannelId::new(DEFAULT_CHANNEL_ID);
        let _ = channels.insert(
            default_id.clone(),
            Channel {
                info: ChannelInfo {
                    id: default_id,
                    channel_type: ChannelType::System,
                    display_metadata: None,
                },
                history: VecDeque::new(),
                latest_by_type: HashMap::new(),
            },
        );
        for (name, color) in USER_CHANNELS {
            let id = ChannelId::new(*name);
            let _ = channels.insert(
                id.clone(),
                Channel {
                    info: ChannelInfo {
                        id,
                        channel_type: ChannelType::User,
                        display_metadata: Some(DisplayMetadata {
                            name: (*name).to_string(),
                            color: Some((*color).to_string()),
                        }),
                    },
                    history: VecDeque::new(),
                    latest_by_type: HashMap::new(),
                },
            );
        }
        Self {
            channels: Mutex::new(channels),
        }
    }

    /// Get an existing channel or create it with the requested type.
    ///
    /// Re-requesting an existing channel returns it unchanged regardless of
    /// the requested type, so every caller of the same id shares one
    /// channel object. The reserved default channel can never be created
    /// as an app or private channel.
    pub fn get_or_create(&self, id: &ChannelId, requested: ChannelType) -> Result<ChannelInfo> {
        let mut guard = self.channels.lock();
        if let Some(existing) = guard.get(id) {
            if existing.info.channel_type == ChannelType::System
                && requested != ChannelType::System
            {
                return Err(Fdc3Error::CreationFailed(format!(
                    "'{id}' is reserved and cannot be created as a {requested:?} channel"
                )));
            }
            return Ok(existing.info.clone());
        }
        let info = ChannelInfo {
            id: id.clone(),
            channel_type: requested,
            display_metadata: None,
        };
        debug!(channel = %id, kind = ?requested, "channel created");
        let _ = guard.insert(
            id.clone(),
            Channel {
                info: info.clone(),
                history: VecDeque::new(),
                latest_by_type: HashMap::new(),
            },
        );
        Ok(info)
    }

    /// Whether a channel with this id exists.
    #[must_use]
    pub fn exists(&self, id: &ChannelId) -> bool {
        self.channels.lock().contains_key(id)
    }

    /// Look up a channel's wire shape.
    #[must_use]
    pub fn info(&self, id: &ChannelId) -> Option<ChannelInfo> {
        self.channels.lock().get(id).map(|c| c.info.clone())
    }

    /// Push a broadcast context onto a channel's history (newest first).
    ///
    /// Broadcasting to a channel nobody created yet materializes it as an
    /// app channel, so late readers still see the context.
    pub fn append(&self, id: &ChannelId, context: Context) {
        let mut guard = self.channels.lock();
        let channel = guard.entry(id.clone()).or_insert_with(|| Channel {
            info: ChannelInfo {
                id: id.clone(),
                channel_type: ChannelType::App,
                display_metadata: None,
            },
            history: VecDeque::new(),
            latest_by_type: HashMap::new(),
        });
        let _ = channel
            .latest_by_type
            .insert(context.context_type.clone(), context.clone());
        channel.history.push_front(context);
        channel.history.truncate(HISTORY_DEPTH);
    }

    /// The most recent context on a channel, optionally the most recent of
    /// a specific type. `None` when the channel is unknown, empty, or never
    /// received that type. Typed reads answer from the per-type map, so the
    /// history cap never hides a type the channel did receive.
    #[must_use]
    pub fn current_context(&self, id: &ChannelId, context_type: Option<&str>) -> Option<Context> {
        let guard = self.channels.lock();
        let channel = guard.get(id)?;
        match context_type {
            Some(t) => channel.latest_by_type.get(t).cloned(),
            None => channel.history.front().cloned(),
        }
    }
}

impl Default for ChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn seeds_default_and_user_channels() {
        let store = ChannelStore::new();
        assert!(store.exists(&ChannelId::new("default")));
        for (name, _) in USER_CHANNELS {
            let info = store.info(&ChannelId::new(*name)).unwrap();
            assert_eq!(info.channel_type, ChannelType::User);
            assert!(info.display_metadata.is_some());
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = ChannelStore::new();
        let id = ChannelId::new("orders");
        let first = store.get_or_create(&id, ChannelType::App).unwrap();
        let second = store.get_or_create(&id, ChannelType::App).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn existing_channel_keeps_its_type() {
        let store = ChannelStore::new();
        let id = ChannelId::new("orders");
        let _ = store.get_or_create(&id, ChannelType::App).unwrap();
        let again = store.get_or_create(&id, ChannelType::Private).unwrap();
        assert_eq!(again.channel_type, ChannelType::App);
    }

    #[test]
    fn default_channel_is_reserved() {
        let store = ChannelStore::new();
        let err = store
            .get_or_create(&ChannelId::new("default"), ChannelType::App)
            .unwrap_err();
        assert_matches!(err, Fdc3Error::CreationFailed(_));
        let err = store
            .get_or_create(&ChannelId::new("default"), ChannelType::Private)
            .unwrap_err();
        assert_matches!(err, Fdc3Error::CreationFailed(_));
    }

    #[test]
    fn current_context_returns_newest() {
        let store = ChannelStore::new();
        let red = ChannelId::new("red");
        store.append(&red, Context::new("fdc3.instrument", json!({"n": 1})));
        store.append(&red, Context::new("fdc3.instrument", json!({"n": 2})));
        let latest = store.current_context(&red, None).unwrap();
        assert_eq!(latest.payload["n"], 2);
    }

    #[test]
    fn current_context_type_filter_skips_newer_mismatches() {
        let store = ChannelStore::new();
        let red = ChannelId::new("red");
        store.append(&red, Context::new("fdc3.instrument", json!({"n": 1})));
        store.append(&red, Context::new("fdc3.contact", json!({"name": "Jo"})));
        let inst = store.current_context(&red, Some("fdc3.instrument")).unwrap();
        assert_eq!(inst.payload["n"], 1);
        assert!(store.current_context(&red, Some("fdc3.country")).is_none());
    }

    #[test]
    fn unknown_channel_has_no_context() {
        let store = ChannelStore::new();
        assert!(store.current_context(&ChannelId::new("nope"), None).is_none());
    }

    #[test]
    fn history_is_capped() {
        let store = ChannelStore::new();
        let id = ChannelId::new("busy");
        for n in 0..100 {
            store.append(&id, Context::new("fdc3.instrument", json!({"n": n})));
        }
        let latest = store.current_context(&id, None).unwrap();
        assert_eq!(latest.payload["n"], 99);
    }

    #[test]
    fn typed_context_survives_history_cap() {
        let store = ChannelStore::new();
        let red = ChannelId::new("red");
        store.append(&red, Context::new("fdc3.contact", json!({"name": "Jo"})));
        // Flood the bounded history with another type.
        for n in 0..(HISTORY_DEPTH + 8) {
            store.append(&red, Context::new("fdc3.instrument", json!({"n": n})));
        }
        let contact = store.current_context(&red, Some("fdc3.contact")).unwrap();
        assert_eq!(contact.payload["name"], "Jo");
        let latest = store.current_context(&red, None).unwrap();
        assert_eq!(latest.context_type, "fdc3.instrument");
    }
}
