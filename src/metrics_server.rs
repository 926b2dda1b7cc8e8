use axum::{Router, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{error, info};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Must run before any metric is touched.
pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("ingest.tick_duration_ms".to_string()),
            &[
                1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
                30000.0,
            ],
        )
        .expect("failed to set buckets for ingest.tick_duration_ms")
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        error!("Prometheus recorder installed twice");
    }
}

/// Touch every pipeline series once so dashboards show zeros before the
/// first event, not gaps.
pub fn initialize_pipeline_metrics() {
    for name in [
        "ingest.ticks",
        "ingest.pilots_seen",
        "ingest.flights_admitted",
        "ingest.rejected_boundary",
        "ingest.rejected_flight_plan",
        "ingest.transceiver_samples",
        "ingest.sector_rows_opened",
        "ingest.sector_rows_closed",
        "ingest.transceivers.unknown_owner",
        "vatsim.fetch.success",
        "vatsim.fetch.server_error",
        "vatsim.fetch.request_error",
        "vatsim.fetch.exhausted",
        "sweeper.sectors_closed",
        "flight_summarizer.summarized",
        "flight_summarizer.failures",
        "flight_summarizer.rows_archived",
        "controller_summarizer.summarized",
        "controller_summarizer.failures",
        "db.transient_retry",
    ] {
        metrics::counter!(name).absolute(0);
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match METRICS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

/// Serve the Prometheus scrape endpoint. Runs until the process exits.
pub async fn start_metrics_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = format!("0.0.0.0:{}", port);

    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!("Metrics server listening on http://{}/metrics", addr);
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server failed: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to bind metrics server on {}: {}", addr, e);
        }
    }
}
