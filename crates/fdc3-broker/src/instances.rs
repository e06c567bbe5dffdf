//! App-instance lifecycle registry.
//!
//! An instance is minted at launch time (`Pending`), promoted to
//! `Connected` by the hello handshake, and purged outright on
//! termination. State only ever moves forward.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fdc3_core::directory::AppMetadata;
use fdc3_core::errors::{Fdc3Error, Result};
use fdc3_core::ids::{ChannelId, InstanceId};

/// Where an instance is hosted.
///
/// Hosting mode drives intent-resolution policy: `Tab`-hosted raisers
/// always get an explicit resolver, never silent auto-selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostingMode {
    /// A standalone tab or window.
    Tab,
    /// An embedded frame inside a workspace container.
    Frame,
}

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Launched but not yet handshaken.
    Pending,
    /// Handshake complete; eligible for deliveries.
    Connected,
    /// Gone. Terminated instances are purged, never resurrected.
    Terminated,
}

/// One registered app instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInstance {
    /// Broker-minted instance id.
    pub instance_id: InstanceId,
    /// Directory app id.
    pub app_id: String,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Hosting mode.
    pub hosting: HostingMode,
    /// Current channel membership; `None` means the default fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    /// Display metadata.
    #[serde(default)]
    pub metadata: AppMetadata,
    /// When the instance was registered.
    pub registered_at: DateTime<Utc>,
}

/// Per-session instance registry.
pub struct InstanceRegistry {
    instances: Mutex<HashMap<InstanceId, AppInstance>>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register a freshly launched instance as `Pending` under a new id.
    ///
    /// `destination` pre-assigns channel membership so an instance launched
    /// to fulfill an intent lands in the raiser's channel on connect.
    pub fn register(
        &self,
        app_id: &str,
        hosting: HostingMode,
        metadata: AppMetadata,
        destination: Option<ChannelId>,
    ) -> InstanceId {
        let id = InstanceId::generate();
        self.register_with_id(id.clone(), app_id, hosting, metadata, destination);
        id
    }

    /// Register under a caller-supplied id (debug recovery).
    pub fn register_with_id(
        &self,
        id: InstanceId,
        app_id: &str,
        hosting: HostingMode,
        metadata: AppMetadata,
        destination: Option<ChannelId>,
    ) {
        debug!(instance = %id, app = app_id, "instance registered");
        let _ = self.instances.lock().insert(
            id.clone(),
            AppInstance {
                instance_id: id,
                app_id: app_id.to_string(),
                state: InstanceState::Pending,
                hosting,
                channel_id: destination,
                metadata,
                registered_at: Utc::now(),
            },
        );
    }

    /// Advance an instance's lifecycle state.
    ///
    /// Transitions are strictly forward; a backward request is rejected
    /// with [`Fdc3Error::InvalidInstance`]. Moving to `Terminated` purges
    /// the record entirely.
    pub fn set_state(&self, id: &InstanceId, state: InstanceState) -> Result<()> {
        let mut guard = self.instances.lock();
        let Some(instance) = guard.get_mut(id) else {
            return Err(Fdc3Error::InvalidInstance(id.to_string()));
        };
        if state < instance.state {
            warn!(instance = %id, from = ?instance.state, to = ?state, "rejected backward state transition");
            return Err(Fdc3Error::InvalidInstance(format!(
                "{id}: cannot move from {:?} back to {state:?}",
                instance.state
            )));
        }
        if state == InstanceState::Terminated {
            let _ = guard.remove(id);
            debug!(instance = %id, "instance terminated and purged");
        } else {
            instance.state = state;
        }
        Ok(())
    }

    /// Set an instance's channel membership. `None` leaves all channels.
    pub fn set_channel(&self, id: &InstanceId, channel: Option<ChannelId>) -> Result<()> {
        let mut guard = self.instances.lock();
        let Some(instance) = guard.get_mut(id) else {
            return Err(Fdc3Error::InvalidInstance(id.to_string()));
        };
        instance.channel_id = channel;
        Ok(())
    }

    /// Full details for one instance, if it is still registered.
    #[must_use]
    pub fn details(&self, id: &InstanceId) -> Option<AppInstance> {
        self.instances.lock().get(id).cloned()
    }

    /// The channel an instance currently occupies.
    #[must_use]
    pub fn channel_of(&self, id: &InstanceId) -> Option<ChannelId> {
        self.instances.lock().get(id).and_then(|i| i.channel_id.clone())
    }

    /// All `Connected` instances.
    #[must_use]
    pub fn connected(&self) -> Vec<AppInstance> {
        let mut apps: Vec<AppInstance> = self
            .instances
            .lock()
            .values()
            .filter(|i| i.state == InstanceState::Connected)
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        apps
    }

    /// Snapshot of channel membership for every `Connected` instance.
    ///
    /// Taken once per broadcast so the whole fan-out observes one
    /// consistent view.
    #[must_use]
    pub fn channel_snapshot(&self) -> HashMap<InstanceId, Option<ChannelId>> {
        self.instances
            .lock()
            .values()
            .filter(|i| i.state == InstanceState::Connected)
            .map(|i| (i.instance_id.clone(), i.channel_id.clone()))
            .collect()
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn registry_with_pending() -> (InstanceRegistry, InstanceId) {
        let reg = InstanceRegistry::new();
        let id = reg.register("charting", HostingMode::Frame, AppMetadata::default(), None);
        (reg, id)
    }

    #[test]
    fn register_starts_pending() {
        let (reg, id) = registry_with_pending();
        let details = reg.details(&id).unwrap();
        assert_eq!(details.state, InstanceState::Pending);
        assert_eq!(details.app_id, "charting");
    }

    #[test]
    fn states_advance_monotonically() {
        let (reg, id) = registry_with_pending();
        reg.set_state(&id, InstanceState::Connected).unwrap();
        assert_eq!(reg.details(&id).unwrap().state, InstanceState::Connected);
        let err = reg.set_state(&id, InstanceState::Pending).unwrap_err();
        assert_matches!(err, Fdc3Error::InvalidInstance(_));
    }

    #[test]
    fn terminated_instances_are_purged() {
        let (reg, id) = registry_with_pending();
        reg.set_state(&id, InstanceState::Connected).unwrap();
        reg.set_state(&id, InstanceState::Terminated).unwrap();
        assert!(reg.details(&id).is_none());
        assert!(reg.connected().is_empty());
    }

    #[test]
    fn unknown_instance_is_invalid() {
        let reg = InstanceRegistry::new();
        let err = reg
            .set_state(&InstanceId::from_string("inst_nope"), InstanceState::Connected)
            .unwrap_err();
        assert_matches!(err, Fdc3Error::InvalidInstance(_));
    }

    #[test]
    fn connected_excludes_pending() {
        let (reg, id) = registry_with_pending();
        let _ = reg.register("news", HostingMode::Tab, AppMetadata::default(), None);
        reg.set_state(&id, InstanceState::Connected).unwrap();
        let connected = reg.connected();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].instance_id, id);
    }

    #[test]
    fn destination_preassigns_channel() {
        let reg = InstanceRegistry::new();
        let id = reg.register(
            "charting",
            HostingMode::Frame,
            AppMetadata::default(),
            Some(ChannelId::new("red")),
        );
        assert_eq!(reg.channel_of(&id), Some(ChannelId::new("red")));
    }

    #[test]
    fn channel_snapshot_covers_connected_only() {
        let (reg, id) = registry_with_pending();
        reg.set_state(&id, InstanceState::Connected).unwrap();
        reg.set_channel(&id, Some(ChannelId::new("blue"))).unwrap();
        let pending = reg.register("news", HostingMode::Tab, AppMetadata::default(), None);
        let snapshot = reg.channel_snapshot();
        assert_eq!(snapshot.get(&id), Some(&Some(ChannelId::new("blue"))));
        assert!(!snapshot.contains_key(&pending));
    }
}
