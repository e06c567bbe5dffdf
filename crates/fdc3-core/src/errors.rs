//! Broker error taxonomy.

use thiserror::Error;

/// Errors surfaced to connecting apps and API callers.
///
/// Each variant carries a stable wire code so clients can branch without
/// parsing messages. Directory read failures never appear here — they are
/// logged and surfaced as empty result sets.
#[derive(Debug, Error)]
pub enum Fdc3Error {
    /// A reserved channel name was requested as a new app/private channel.
    #[error("channel creation failed: {0}")]
    CreationFailed(String),

    /// An open/intent target is absent from the directory.
    #[error("app not found in directory: {0}")]
    AppNotFound(String),

    /// raiseIntent found zero candidates.
    #[error("no apps found for intent {0}")]
    NoAppsFound(String),

    /// The resolver UI or the target app's ack did not complete in time.
    #[error("intent resolution timed out")]
    ResolverTimeout,

    /// A hello handshake referenced an unknown or terminated instance id.
    #[error("invalid instance: {0}")]
    InvalidInstance(String),

    /// An operation referenced a session with no active broker.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The user dismissed the resolver without choosing.
    #[error("intent resolution cancelled by user")]
    UserCancelled,
}

impl Fdc3Error {
    /// Stable wire code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::CreationFailed(_) => "CreationFailed",
            Self::AppNotFound(_) => "AppNotFound",
            Self::NoAppsFound(_) => "NoAppsFound",
            Self::ResolverTimeout => "ResolverTimeout",
            Self::InvalidInstance(_) => "InvalidInstance",
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::UserCancelled => "UserCancelled",
        }
    }
}

/// Convenience alias used across the broker crates.
pub type Result<T> = std::result::Result<T, Fdc3Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Fdc3Error::CreationFailed("default".into()).code(), "CreationFailed");
        assert_eq!(Fdc3Error::AppNotFound("x".into()).code(), "AppNotFound");
        assert_eq!(Fdc3Error::NoAppsFound("ViewChart".into()).code(), "NoAppsFound");
        assert_eq!(Fdc3Error::ResolverTimeout.code(), "ResolverTimeout");
        assert_eq!(Fdc3Error::InvalidInstance("i".into()).code(), "InvalidInstance");
        assert_eq!(Fdc3Error::SessionNotFound("s".into()).code(), "SessionNotFound");
        assert_eq!(Fdc3Error::UserCancelled.code(), "UserCancelled");
    }

    #[test]
    fn display_includes_detail() {
        let e = Fdc3Error::NoAppsFound("ViewChart".into());
        assert!(e.to_string().contains("ViewChart"));
    }
}
