//! Settings type tree.

use serde::{Deserialize, Serialize};

/// Root settings for the FDC3 agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fdc3Settings {
    /// Settings schema version.
    pub version: String,
    /// Server (transport) settings.
    pub server: ServerSettings,
    /// Broker behavior settings.
    pub broker: BrokerSettings,
    /// App directory sources.
    pub directory: DirectorySettings,
}

impl Default for Fdc3Settings {
    fn default() -> Self {
        Self {
            version: "0.1.0".into(),
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            directory: DirectorySettings::default(),
        }
    }
}

/// WebSocket server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub bind_addr: String,
    /// WebSocket port.
    pub ws_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            ws_port: 4475,
        }
    }
}

/// Broker behavior settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Caller-facing raise-intent timeout in milliseconds.
    pub intent_ack_timeout_ms: u64,
    /// Queued point-to-point delivery TTL in milliseconds.
    pub pending_delivery_ttl_ms: u64,
    /// Permit the one-time handshake recovery for unrecognized instance
    /// ids (development escape hatch; never default-on).
    pub debug_recovery: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            intent_ack_timeout_ms: 60_000,
            pending_delivery_ttl_ms: 120_000,
            debug_recovery: false,
        }
    }
}

/// App directory sources.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySettings {
    /// Directory file paths or URLs loaded at startup.
    pub urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Fdc3Settings::default();
        assert_eq!(s.server.ws_port, 4475);
        assert_eq!(s.broker.intent_ack_timeout_ms, 60_000);
        assert_eq!(s.broker.pending_delivery_ttl_ms, 120_000);
        assert!(!s.broker.debug_recovery);
        assert!(s.directory.urls.is_empty());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: Fdc3Settings =
            serde_json::from_str(r#"{"broker": {"debugRecovery": true}}"#).unwrap();
        assert!(s.broker.debug_recovery);
        assert_eq!(s.broker.intent_ack_timeout_ms, 60_000);
        assert_eq!(s.server.ws_port, 4475);
    }

    #[test]
    fn camel_case_on_wire() {
        let json = serde_json::to_value(Fdc3Settings::default()).unwrap();
        assert!(json["broker"].get("intentAckTimeoutMs").is_some());
        assert!(json["server"].get("wsPort").is_some());
    }
}
