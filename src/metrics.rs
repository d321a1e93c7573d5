//! Prometheus metrics for the controllers
//!
//! Every reconcile is counted and timed per controller, failures are counted
//! separately, and downstream kinds skipped because their CRD is not
//! installed are counted per kind. The text exposition is served on
//! `--metrics-bind-address` at `/metrics`.

use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};

use crate::registry::DownstreamKind;

/// Metric names
pub mod names {
    /// Reconciles run, labelled by `controller`
    pub const RECONCILE_TOTAL: &str = "agent_access_control_reconcile_total";
    /// Reconciles that returned an error, labelled by `controller`
    pub const RECONCILE_ERRORS_TOTAL: &str = "agent_access_control_reconcile_errors_total";
    /// Reconcile wall time, labelled by `controller`
    pub const RECONCILE_DURATION_SECONDS: &str = "agent_access_control_reconcile_duration_seconds";
    /// Downstream writes skipped because the kind is not served, labelled by `kind`
    pub const SCHEMA_UNAVAILABLE_SKIPS_TOTAL: &str =
        "agent_access_control_schema_unavailable_skips_total";
}

const RECONCILE_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(names::RECONCILE_DURATION_SECONDS.to_string()),
        RECONCILE_DURATION_BUCKETS,
    )
}

/// Install the process-wide recorder; the handle renders what it collects
pub fn install() -> Result<PrometheusHandle, BuildError> {
    let handle = builder()?.install_recorder()?;
    info!("Prometheus metrics initialized");
    Ok(handle)
}

/// Record one finished reconcile
pub fn record_reconcile(controller: &'static str, duration: Duration, succeeded: bool) {
    counter!(names::RECONCILE_TOTAL, "controller" => controller).increment(1);
    if !succeeded {
        counter!(names::RECONCILE_ERRORS_TOTAL, "controller" => controller).increment(1);
    }
    histogram!(names::RECONCILE_DURATION_SECONDS, "controller" => controller)
        .record(duration.as_secs_f64());
}

/// Record a downstream write skipped because `kind` is not installed
pub fn record_schema_unavailable_skip(kind: DownstreamKind) {
    counter!(names::SCHEMA_UNAVAILABLE_SKIPS_TOTAL, "kind" => kind.kind_str()).increment(1);
}

/// Run a reconcile and record its outcome and duration under `controller`
pub async fn measured<T, E>(
    controller: &'static str,
    reconcile: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    let started = Instant::now();
    let result = reconcile.await;
    record_reconcile(controller, started.elapsed(), result.is_ok());
    result
}

/// Build the `/metrics` router
pub fn metrics_routes(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Serve `/metrics` until the process exits
pub async fn start_metrics_server(addr: SocketAddr, handle: PrometheusHandle) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => {
            info!(addr = %addr, "metrics server started");
            l
        }
        Err(e) => {
            error!(error = %e, addr = %addr, "failed to bind metrics address");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, metrics_routes(handle)).await {
        error!(error = %e, "metrics server error");
    }
}
