//! Prometheus metrics

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Idempotent; returns the render handle.
pub fn init_metrics() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// `/metrics` endpoint.
pub async fn metrics_handler() -> String {
    init_metrics().render()
}

pub fn record_request(path: &'static str) {
    metrics::counter!("coach_http_requests_total", "path" => path).increment(1);
}

pub fn record_chunk_processed() {
    metrics::counter!("coach_chunks_processed_total").increment(1);
}

pub fn record_pipeline_error(stage: &'static str) {
    metrics::counter!("coach_pipeline_errors_total", "stage" => stage).increment(1);
}

pub fn record_pipeline_latency(seconds: f64) {
    metrics::histogram!("coach_pipeline_chunk_seconds").record(seconds);
}

pub fn record_tts_bytes_forwarded(bytes: u64) {
    metrics::counter!("coach_tts_stream_bytes_total").increment(bytes);
}

pub fn record_ws_connection(delta: i64) {
    metrics::gauge!("coach_ws_connections").increment(delta as f64);
}
