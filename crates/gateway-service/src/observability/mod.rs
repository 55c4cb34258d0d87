//! Observability: metrics recorder setup and metric helpers.

pub mod metrics;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return its render handle.
///
/// Call once at startup; the handle is served by the `/metrics` route.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}
