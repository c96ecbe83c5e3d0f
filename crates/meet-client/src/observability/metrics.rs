//! Metric definitions for the client core.
//!
//! Naming follows Prometheus conventions:
//! - `meet_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `kind`: 2 values (audio, video)
//! - `direction`: 2 values (outbound, inbound)
//! - `reason`: bounded by call sites (~5 values)
//! - `outcome`: bounded by call sites (~3 values)

use common::types::MediaKind;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Peer Connection Metrics
// ============================================================================

/// Record a tracked peer connection.
///
/// Metric: `meet_peer_connections_opened_total`
/// Labels: `kind`, `direction`
pub fn record_peer_connection_opened(kind: MediaKind, direction: &'static str) {
    counter!(
        "meet_peer_connections_opened_total",
        "kind" => kind.as_str(),
        "direction" => direction
    )
    .increment(1);
}

/// Record a peer connection leaving the registry.
///
/// Metric: `meet_peer_connections_closed_total`
/// Labels: `kind`, `reason` (closed, error, replaced, leave)
pub fn record_peer_connection_closed(kind: MediaKind, reason: &'static str) {
    counter!(
        "meet_peer_connections_closed_total",
        "kind" => kind.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// Set the number of tracked peer connections for a kind.
///
/// Metric: `meet_peer_connections_active`
pub fn set_peer_connections_active(kind: MediaKind, count: usize) {
    // usize to f64 conversion is safe for realistic roster sizes (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("meet_peer_connections_active", "kind" => kind.as_str()).set(count as f64);
}

/// Record a capture device failure.
///
/// Metric: `meet_capture_failures_total`
/// Labels: `kind`, `reason` (permission_denied, unavailable, other)
pub fn record_capture_failure(kind: MediaKind, reason: &'static str) {
    counter!(
        "meet_capture_failures_total",
        "kind" => kind.as_str(),
        "reason" => reason
    )
    .increment(1);
}

// ============================================================================
// Signaling & Session Metrics
// ============================================================================

/// Record a signaling reconnection outcome.
///
/// Metric: `meet_signaling_reconnects_total`
/// Labels: `outcome` (attempt, success, exhausted)
pub fn record_signaling_reconnect(outcome: &'static str) {
    counter!("meet_signaling_reconnects_total", "outcome" => outcome).increment(1);
}

/// Record how long a join took, from request to roster.
///
/// Metric: `meet_join_duration_seconds`
/// Labels: `outcome` (joined, degraded)
pub fn record_join_duration(outcome: &'static str, duration: Duration) {
    histogram!("meet_join_duration_seconds", "outcome" => outcome).record(duration.as_secs_f64());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without an installed recorder these go to the no-op recorder; the calls
    // must simply not panic.
    #[test]
    fn test_record_functions_without_recorder() {
        record_peer_connection_opened(MediaKind::Audio, "outbound");
        record_peer_connection_closed(MediaKind::Video, "error");
        set_peer_connections_active(MediaKind::Audio, 0);
        set_peer_connections_active(MediaKind::Video, 12);
        record_capture_failure(MediaKind::Video, "permission_denied");
        record_signaling_reconnect("attempt");
        record_join_duration("joined", Duration::from_millis(250));
    }

    #[test]
    fn test_peer_connection_counter_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_peer_connection_opened(MediaKind::Audio, "inbound");
            record_peer_connection_opened(MediaKind::Audio, "inbound");
            record_peer_connection_closed(MediaKind::Audio, "leave");
        });

        let snapshot = snapshotter.snapshot().into_vec();

        let opened = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "meet_peer_connections_opened_total")
            .expect("opened counter recorded");
        assert!(matches!(opened.3, DebugValue::Counter(2)));
        assert!(opened
            .0
            .key()
            .labels()
            .any(|label| label.key() == "kind" && label.value() == "audio"));

        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "meet_peer_connections_closed_total"));
    }
}
