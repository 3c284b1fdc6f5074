//! Phase-organized operational counters.
//!
//! Metrics go through the `metrics` facade; without an installed recorder they
//! are no-ops, so library callers and tests pay nothing for them.

/// Metric names follow `rent_market_{phase}_{name}` (`_total` for counters).
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("rent_market_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("rent_market_", $phase, "_", $name)
    };
}

/// Counters for the CSV to Parquet transform
pub struct EtlMetrics;

impl EtlMetrics {
    pub fn record_run_success(rows: usize, bytes: u64, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "etl", "runs_success")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "etl", "rows_written")).increment(rows as u64);
        ::metrics::histogram!(phase_metric!(histogram, "etl", "output_bytes")).record(bytes as f64);
        ::metrics::histogram!(phase_metric!(histogram, "etl", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_run_error() {
        ::metrics::counter!(phase_metric!(counter, "etl", "runs_error")).increment(1);
    }

    pub fn record_validation(errors: usize, warnings: usize) {
        ::metrics::counter!(phase_metric!(counter, "etl", "validation_errors"))
            .increment(errors as u64);
        ::metrics::counter!(phase_metric!(counter, "etl", "validation_warnings"))
            .increment(warnings as u64);
    }
}

/// Counters for the export downloader
pub struct DownloadMetrics;

impl DownloadMetrics {
    pub fn record_success(bytes: u64, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "download", "success")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "download", "bytes")).record(bytes as f64);
        ::metrics::histogram!(phase_metric!(histogram, "download", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_retry() {
        ::metrics::counter!(phase_metric!(counter, "download", "retries")).increment(1);
    }

    pub fn record_failure() {
        ::metrics::counter!(phase_metric!(counter, "download", "failures")).increment(1);
    }
}
