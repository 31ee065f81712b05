use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Log Boundaries
    // ============================================================================

    /// Position of the first retained record
    pub static ref LOG_START_POSITION: IntGaugeVec = IntGaugeVec::new(
        Opts::new("styx_log_start_position", "Position of the first retained record"),
        &["log"]
    ).expect("metric can be created");

    /// Synced end position
    pub static ref LOG_END_POSITION: IntGaugeVec = IntGaugeVec::new(
        Opts::new("styx_log_end_position", "Position one past the last durable record"),
        &["log"]
    ).expect("metric can be created");

    /// Synced end offset
    pub static ref LOG_END_OFFSET: IntGaugeVec = IntGaugeVec::new(
        Opts::new("styx_log_end_offset", "Offset one past the last durable record"),
        &["log"]
    ).expect("metric can be created");

    /// Retained bytes (end offset - start offset)
    pub static ref LOG_SIZE_BYTES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("styx_log_size_bytes", "Retained record bytes"),
        &["log"]
    ).expect("metric can be created");

    // ============================================================================
    // Manager
    // ============================================================================

    /// Managed log status (0 unknown, 1 ok, 2 scanning, 3 corrupt, 4 tainted)
    pub static ref LOG_STATUS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("styx_log_status", "Managed log status code"),
        &["log"]
    ).expect("metric can be created");

    /// Corruption scans by outcome
    pub static ref LOG_SCANS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("styx_log_scans_total", "Total corruption scans"),
        &["log", "result"]
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(LOG_START_POSITION.clone()))
            .expect("log_start_position can be registered");
        REGISTRY
            .register(Box::new(LOG_END_POSITION.clone()))
            .expect("log_end_position can be registered");
        REGISTRY
            .register(Box::new(LOG_END_OFFSET.clone()))
            .expect("log_end_offset can be registered");
        REGISTRY
            .register(Box::new(LOG_SIZE_BYTES.clone()))
            .expect("log_size_bytes can be registered");
        REGISTRY
            .register(Box::new(LOG_STATUS.clone()))
            .expect("log_status can be registered");
        REGISTRY
            .register(Box::new(LOG_SCANS_TOTAL.clone()))
            .expect("log_scans_total can be registered");
    });
}

/// Update the boundary gauges of one log.
pub fn record_position(log: &str, start_offset: i64, end_position: i64, end_offset: i64) {
    LOG_END_POSITION.with_label_values(&[log]).set(end_position);
    LOG_END_OFFSET.with_label_values(&[log]).set(end_offset);
    LOG_SIZE_BYTES
        .with_label_values(&[log])
        .set(end_offset - start_offset);
}

pub fn record_start(log: &str, start_position: i64) {
    LOG_START_POSITION.with_label_values(&[log]).set(start_position);
}

pub fn record_status(log: &str, code: i64) {
    LOG_STATUS.with_label_values(&[log]).set(code);
}

/// Outcomes recorded by [`record_scan`].
pub const SCAN_RESULTS: [&str; 3] = ["ok", "corrupt", "tainted"];

pub fn record_scan(log: &str, result: &str) {
    LOG_SCANS_TOTAL.with_label_values(&[log, result]).inc();
}

/// Drop every series of a log that is no longer managed.
pub fn forget(log: &str) {
    for gauge in [
        &*LOG_START_POSITION,
        &*LOG_END_POSITION,
        &*LOG_END_OFFSET,
        &*LOG_SIZE_BYTES,
        &*LOG_STATUS,
    ] {
        let _ = gauge.remove_label_values(&[log]);
    }
    for result in SCAN_RESULTS {
        let _ = LOG_SCANS_TOTAL.remove_label_values(&[log, result]);
    }
}

/// Render the registry in the Prometheus text format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        init();
        init();
    }

    #[test]
    fn test_record_position() {
        record_start("metrics-test", 10);
        record_position("metrics-test", 500, 42, 2_000);

        assert_eq!(LOG_START_POSITION.with_label_values(&["metrics-test"]).get(), 10);
        assert_eq!(LOG_END_POSITION.with_label_values(&["metrics-test"]).get(), 42);
        assert_eq!(LOG_END_OFFSET.with_label_values(&["metrics-test"]).get(), 2_000);
        assert_eq!(LOG_SIZE_BYTES.with_label_values(&["metrics-test"]).get(), 1_500);
    }

    #[test]
    fn test_scan_counter() {
        record_scan("scan-test", "ok");
        record_scan("scan-test", "ok");
        record_scan("scan-test", "corrupt");

        assert_eq!(LOG_SCANS_TOTAL.with_label_values(&["scan-test", "ok"]).get(), 2);
        assert_eq!(LOG_SCANS_TOTAL.with_label_values(&["scan-test", "corrupt"]).get(), 1);
    }

    #[test]
    fn test_gather_text() {
        init();
        record_status("gather-test", 1);
        let text = gather_text().unwrap();
        assert!(text.contains("styx_log_status{log=\"gather-test\"} 1"));
    }

    #[test]
    fn test_forget() {
        record_status("forget-test", 3);
        record_scan("forget-test", "corrupt");
        record_scan("forget-test", "ok");
        forget("forget-test");
        let text = {
            init();
            gather_text().unwrap()
        };
        assert!(!text.contains("forget-test"));
        assert_eq!(
            LOG_SCANS_TOTAL.with_label_values(&["forget-test", "corrupt"]).get(),
            0
        );
    }
}
