use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the process-wide Prometheus recorder and returns the handle
/// `GET /metrics` renders from: per-service counters/gauges/histograms
/// exposed as Prometheus text.
pub fn install() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("install prometheus recorder")
}

pub fn record_request_started() {
    metrics::counter!("requests_total").increment(1);
}

pub fn record_request_succeeded(elapsed_ms: f64) {
    metrics::counter!("success_total").increment(1);
    metrics::histogram!("response_ms").record(elapsed_ms);
}

pub fn record_request_failed() {
    metrics::counter!("failure_total").increment(1);
}

pub fn record_restart() {
    metrics::counter!("restart_total").increment(1);
}

pub fn record_state_change() {
    metrics::counter!("state_changes_total").increment(1);
}

pub fn set_in_flight(worker_id: &str, value: i64) {
    metrics::gauge!("in_flight", "worker_id" => worker_id.to_string()).set(value as f64);
}

pub fn record_chunks_per_stream(count: f64) {
    metrics::histogram!("chunks_per_stream").record(count);
}
