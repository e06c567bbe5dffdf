//! Typed context payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured payload broadcast between apps.
///
/// The broker interprets only `context_type` (the FDC3 `type` field, e.g.
/// `"fdc3.instrument"`); everything else is carried opaquely. Contexts are
/// immutable once stored in a channel's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// The FDC3 context type string.
    #[serde(rename = "type")]
    pub context_type: String,
    /// Remaining fields of the context object, untouched by the broker.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Context {
    /// Build a context from a type and a JSON object payload.
    ///
    /// Non-object payloads are stored under a `value` key so nothing is
    /// silently dropped.
    #[must_use]
    pub fn new(context_type: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                let _ = map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            context_type: context_type.into(),
            payload,
        }
    }

    /// Whether this context matches an optional type filter.
    ///
    /// An unset filter matches every context.
    #[must_use]
    pub fn matches_filter(&self, filter: Option<&str>) -> bool {
        filter.is_none_or(|t| t == self.context_type)
    }
}
