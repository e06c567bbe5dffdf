//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
#[must_use]
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Client requests total (counter, labels: type).
pub const REQUESTS_TOTAL: &str = "fdc3_requests_total";
/// Client request errors total (counter, labels: type, code).
pub const REQUEST_ERRORS_TOTAL: &str = "fdc3_request_errors_total";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "fdc3_ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "fdc3_ws_disconnections_total";
/// Bound client queues (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "fdc3_ws_connections_active";
/// Events dropped on full client queues (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "fdc3_ws_broadcast_drops_total";
/// Live session brokers (gauge).
pub const SESSIONS_ACTIVE: &str = "fdc3_sessions_active";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_and_render() {
        // Build a recorder + handle (no global install to avoid test conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            REQUESTS_TOTAL,
            REQUEST_ERRORS_TOTAL,
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_BROADCAST_DROPS_TOTAL,
            SESSIONS_ACTIVE,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_' || c == '3'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
