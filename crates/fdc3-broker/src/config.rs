//! Broker runtime configuration.

use tokio::time::Duration;

use fdc3_core::constants::{DEFAULT_INTENT_ACK_TIMEOUT, PENDING_DELIVERY_TTL};
use fdc3_settings::BrokerSettings;

/// Tunables for one broker, resolved once at construction.
#[derive(Clone, Copy, Debug)]
pub struct BrokerConfig {
    /// Caller-facing raise-intent (and open-handshake) timeout.
    pub intent_ack_timeout: Duration,
    /// TTL for parked point-to-point deliveries.
    pub pending_delivery_ttl: Duration,
    /// Permit the hello recovery path for unknown instance ids.
    pub debug_recovery: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            intent_ack_timeout: DEFAULT_INTENT_ACK_TIMEOUT,
            pending_delivery_ttl: PENDING_DELIVERY_TTL,
            debug_recovery: false,
        }
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(s: &BrokerSettings) -> Self {
        Self {
            intent_ack_timeout: Duration::from_millis(s.intent_ack_timeout_ms),
            pending_delivery_ttl: Duration::from_millis(s.pending_delivery_ttl_ms),
            debug_recovery: s.debug_recovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_track_constants() {
        let c = BrokerConfig::default();
        assert_eq!(c.intent_ack_timeout, Duration::from_secs(60));
        assert_eq!(c.pending_delivery_ttl, Duration::from_secs(120));
        assert!(!c.debug_recovery);
    }

    #[test]
    fn settings_millis_convert() {
        let s = BrokerSettings {
            intent_ack_timeout_ms: 1500,
            pending_delivery_ttl_ms: 30_000,
            debug_recovery: true,
        };
        let c = BrokerConfig::from(&s);
        assert_eq!(c.intent_ack_timeout, Duration::from_millis(1500));
        assert_eq!(c.pending_delivery_ttl, Duration::from_secs(30));
        assert!(c.debug_recovery);
    }
}
