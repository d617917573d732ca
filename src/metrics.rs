//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a download start
pub fn record_download_started(model: &str) {
    metrics::counter!("gguf_manager_downloads_started_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Record a finished download
pub fn record_download_completed(model: &str) {
    metrics::counter!("gguf_manager_downloads_completed_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Record a failed download
pub fn record_download_failed(model: &str) {
    metrics::counter!("gguf_manager_download_failures_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Record a successful load; `source` is `cache` or `local`
pub fn record_load_completed(model: &str, source: &'static str) {
    metrics::counter!("gguf_manager_loads_total",
        "model" => model.to_string(),
        "source" => source
    )
    .increment(1);
}

/// Record a failed load
pub fn record_load_failed(model: &str) {
    metrics::counter!("gguf_manager_load_failures_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Record an unload
pub fn record_unload(model: &str) {
    metrics::counter!("gguf_manager_unloads_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Update the loaded model gauge (0 or 1)
pub fn set_model_loaded(loaded: bool) {
    metrics::gauge!("gguf_manager_models_loaded").set(if loaded { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_download_started("m");
        record_download_completed("m");
        record_download_failed("m");
        record_load_completed("m", "cache");
        record_load_failed("m");
        record_unload("m");
        set_model_loaded(true);
    }

    #[test]
    fn test_setup_metrics_exports_counters() {
        let handle = setup_metrics().unwrap();
        record_unload("tiny");
        assert!(handle.render().contains("gguf_manager_unloads_total"));
    }
}
