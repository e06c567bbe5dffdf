//! Launcher for servers without an attached shell.
//!
//! Actually materializing a window belongs to the hosting shell, which
//! supplies its own [`Launcher`] implementation. Standalone, the launch is
//! recorded and logged; the target app (or a test driving the broker API)
//! completes the handshake itself under the pre-minted instance id.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use fdc3_broker::collaborators::{CollaboratorError, Launcher};
use fdc3_core::directory::DirectoryApp;
use fdc3_core::ids::{ChannelId, InstanceId};

/// A launch the shell (or a test) still has to fulfill.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchRecord {
    /// Directory app that was asked for.
    pub app_id: String,
    /// Launch URL from the directory entry.
    pub url: Option<String>,
    /// Pre-minted instance id the launched app must hello with.
    pub instance_id: InstanceId,
    /// Channel the instance should land in.
    pub destination: Option<ChannelId>,
}

/// Recording [`Launcher`] used when no shell is attached.
pub struct RecordingLauncher {
    launches: Mutex<Vec<LaunchRecord>>,
}

impl RecordingLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Launches requested so far, oldest first.
    #[must_use]
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().clone()
    }
}

impl Default for RecordingLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Launcher for RecordingLauncher {
    async fn launch<'a>(
        &self,
        app: &'a DirectoryApp,
        instance_id: &'a InstanceId,
        destination: Option<&'a ChannelId>,
    ) -> Result<(), CollaboratorError> {
        info!(app = app.app_id, instance = %instance_id, url = ?app.url, "launch requested");
        self.launches.lock().push(LaunchRecord {
            app_id: app.app_id.clone(),
            url: app.url.clone(),
            instance_id: instance_id.clone(),
            destination: destination.cloned(),
        });
        Ok(())
    }
}
