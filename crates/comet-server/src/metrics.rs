//! Prometheus metrics recorder and gateway metric names.

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

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "gateway_ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "gateway_ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "gateway_ws_connections_active";
/// Long-poll requests served (counter).
pub const POLL_REQUESTS_TOTAL: &str = "gateway_poll_requests_total";
/// Long-poll requests that fell back to the empty response (counter).
pub const POLL_FALLBACKS_TOTAL: &str = "gateway_poll_fallbacks_total";
