//! Branded ID newtypes.
//!
//! Every identifier that crosses a module boundary gets its own newtype so
//! an instance id can never be passed where a listener id is expected. All
//! of them serialize as plain strings on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[doc = $doc:literal])* $name:ident, $prefix:literal) => {
        $(#[doc = $doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh id (`<prefix>_<uuidv7>`).
            #[must_use]
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Wrap an existing string id (from the wire or a test).
            #[must_use]
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the raw string form.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

branded_id!(
    /// A running (or pending-connection) app instance.
    InstanceId,
    "inst"
);
branded_id!(
    /// A context or intent listener subscription.
    ListenerId,
    "lst"
);
branded_id!(
    /// A raise-intent transfer, correlating the raiser's promise with the
    /// target's eventual ack.
    RequestId,
    "req"
);
branded_id!(
    /// A user session. One broker exists per session.
    SessionId,
    "sess"
);

/// A named context-sharing channel.
///
/// Channel ids are human-chosen names ("red", "default", app-defined ids),
/// not minted uuids, so this newtype has no `generate()`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Wrap a channel name.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(InstanceId::generate().as_str().starts_with("inst_"));
        assert!(ListenerId::generate().as_str().starts_with("lst_"));
        assert!(RequestId::generate().as_str().starts_with("req_"));
        assert!(SessionId::generate().as_str().starts_with("sess_"));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ChannelId::new("red");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!("red"));
        let back: ChannelId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn from_string_round_trips() {
        let id = InstanceId::from_string("inst_fixed");
        assert_eq!(id.as_str(), "inst_fixed");
        assert_eq!(id.to_string(), "inst_fixed");
    }
}
