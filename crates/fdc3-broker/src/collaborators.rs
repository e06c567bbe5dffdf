//! Collaborator seams.
//!
//! The broker core stays transport- and UI-agnostic by talking to four
//! traits: the app [`Directory`], the [`Resolver`] UI, the app [`Launcher`],
//! and the outbound [`Transport`]. Hosting environments supply real
//! implementations; tests supply mocks.

use async_trait::async_trait;
use thiserror::Error;

use fdc3_core::context::Context;
use fdc3_core::directory::{DirectoryApp, ResolverCandidate};
use fdc3_core::ids::{ChannelId, InstanceId};
use fdc3_core::protocol::BrokerEvent;

/// Failures reported by collaborators.
///
/// These never surface to API callers directly — directory failures
/// degrade to empty result sets, transport failures are logged per
/// recipient, and resolver/launcher failures map into the error taxonomy
/// at the call site.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The directory source could not be read.
    #[error("directory unavailable: {0}")]
    Directory(String),
    /// The resolver UI could not be presented.
    #[error("resolver failed: {0}")]
    Resolver(String),
    /// The app could not be launched.
    #[error("launch failed: {0}")]
    Launch(String),
    /// The event could not be delivered to the client.
    #[error("transport send failed: {0}")]
    Transport(String),
}

/// What the resolver UI came back with.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolverOutcome {
    /// The user picked a candidate.
    Chosen(ResolverCandidate),
    /// The user dismissed the resolver without choosing.
    Cancelled,
}

/// Read-only view of the app directory.
#[cfg_attr(any(test, feature = "test-mocks"), mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Apps matching an app id. Usually zero or one entry.
    async fn apps_by_id(&self, app_id: &str) -> Result<Vec<DirectoryApp>, CollaboratorError>;

    /// Apps advertising `intent` for `context_type` (unset type matches
    /// any declared context).
    async fn apps_by_intent<'a>(
        &self,
        intent: &'a str,
        context_type: Option<&'a str>,
    ) -> Result<Vec<DirectoryApp>, CollaboratorError>;

    /// All apps advertising any intent accepting `context_type`.
    async fn apps_by_context(
        &self,
        context_type: &str,
    ) -> Result<Vec<DirectoryApp>, CollaboratorError>;
}

/// The resolver UI shown when intent resolution is ambiguous.
#[cfg_attr(any(test, feature = "test-mocks"), mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Present `candidates` for `intent` and wait for the user's choice.
    async fn resolve(
        &self,
        intent: &str,
        context: &Context,
        candidates: Vec<ResolverCandidate>,
    ) -> Result<ResolverOutcome, CollaboratorError>;
}

/// Launches directory apps into the hosting environment.
#[cfg_attr(any(test, feature = "test-mocks"), mockall::automock)]
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Open `app` under the pre-registered `instance_id`.
    ///
    /// `destination` is the channel the new instance should land in
    /// (typically the raiser's current channel). The launched app completes
    /// the handshake itself; this returns once the launch is initiated.
    async fn launch<'a>(
        &self,
        app: &'a DirectoryApp,
        instance_id: &'a InstanceId,
        destination: Option<&'a ChannelId>,
    ) -> Result<(), CollaboratorError>;
}

/// Outbound event delivery to connected clients.
///
/// Implementations hand the event to a per-client queue; broker state
/// mutation never blocks on a slow socket.
#[cfg_attr(any(test, feature = "test-mocks"), mockall::automock)]
pub trait Transport: Send + Sync {
    /// Deliver `event` to `instance`.
    fn post(&self, instance: &InstanceId, event: &BrokerEvent) -> Result<(), CollaboratorError>;
}
