use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const REQUESTS_TOTAL: &str = "ulip_gateway_http_requests_total";
const REQUEST_DURATION_SECONDS: &str = "ulip_gateway_http_request_duration_seconds";

/// Label value for responses that carry no gateway error code.
pub const NO_ERROR_KIND: &str = "none";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Records one served request. Failed lookups are told apart by `error_kind`,
/// the same code the client sees in the error body.
pub fn record_request(
    method: &str,
    route: &str,
    status: StatusCode,
    error_kind: &'static str,
    elapsed: Duration,
) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.as_u16().to_string(),
        "error_kind" => error_kind
    )
    .increment(1);

    histogram!(
        REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(elapsed.as_secs_f64());
}
