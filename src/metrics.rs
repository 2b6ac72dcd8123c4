/// Metrics and telemetry for OneLight
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - LAN scans and the candidates they find
/// - Registration outcomes
/// - Relay commands and status reads by outcome
/// - Ownership denials

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // ========== Discovery Metrics ==========

    /// Scans performed
    pub static ref SCANS_TOTAL: IntCounter = register_int_counter!(
        "onelight_scans_total",
        "Total number of LAN discovery scans"
    )
    .unwrap();

    /// Distinct candidates returned by scans
    pub static ref SCAN_CANDIDATES_TOTAL: IntCounter = register_int_counter!(
        "onelight_scan_candidates_total",
        "Total number of distinct candidates returned by scans"
    )
    .unwrap();

    // ========== Provisioning Metrics ==========

    /// Registration attempts by outcome
    pub static ref REGISTRATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "onelight_registrations_total",
        "Total number of device registration attempts",
        &["outcome"]
    )
    .unwrap();

    // ========== Control Metrics ==========

    /// Device calls by action and outcome
    pub static ref DEVICE_COMMANDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "onelight_device_commands_total",
        "Total number of device calls",
        &["action", "outcome"]
    )
    .unwrap();

    /// Requests refused by the ownership guard
    pub static ref AUTHORIZATION_DENIALS_TOTAL: IntCounter = register_int_counter!(
        "onelight_authorization_denials_total",
        "Total number of requests denied by ownership checks"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a registration attempt
pub fn record_registration(outcome: &str) {
    REGISTRATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a device call
pub fn record_device_command(action: &str, outcome: &str) {
    DEVICE_COMMANDS_TOTAL
        .with_label_values(&[action, outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_registered_metrics() {
        SCANS_TOTAL.inc();
        record_registration("created");
        record_device_command("set_relay", "ok");

        let text = render_metrics();
        assert!(text.contains("onelight_scans_total"));
        assert!(text.contains("onelight_registrations_total"));
        assert!(text.contains("onelight_device_commands_total"));
    }
}
