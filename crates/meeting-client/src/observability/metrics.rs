//! Metrics definitions for the meeting client.
//!
//! All metrics follow Prometheus naming conventions:
//! - `client_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! No recorder is installed here; the embedding application chooses one.

use common::types::TransportDirection;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

use crate::engine::TransportState;

/// Record a join attempt.
///
/// Metric: `client_joins_total`
/// Labels: `status` (success, error)
pub fn record_join(status: &'static str) {
    counter!("client_joins_total", "status" => status).increment(1);
}

/// Record the time from `join()` to the in-call state.
///
/// Metric: `client_join_duration_seconds`
pub fn record_join_duration(duration: Duration) {
    histogram!("client_join_duration_seconds").record(duration.as_secs_f64());
}

/// Record one signaling request/response round-trip.
///
/// Metric: `client_signaling_request_duration_seconds`
/// Labels: `operation`, `status`
///
/// Cardinality: 3 operations x 4 statuses
pub fn record_signaling_request(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!(
        "client_signaling_request_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Record an inbound signaling event that decoded successfully.
///
/// Metric: `client_signaling_events_received_total`
/// Labels: `event` (bounded by the protocol's server event names)
pub fn record_event_received(event: &'static str) {
    counter!("client_signaling_events_received_total", "event" => event).increment(1);
}

/// Record an inbound frame that was dropped.
///
/// Metric: `client_signaling_frames_dropped_total`
/// Labels: `reason` (too_large, invalid_frame, unknown_event, invalid_payload, encode, unmatched)
pub fn record_frame_dropped(reason: &'static str) {
    counter!("client_signaling_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record an engine-reported transport state change.
///
/// Metric: `client_transport_state_changes_total`
/// Labels: `direction`, `state`
pub fn record_transport_state(direction: TransportDirection, state: TransportState) {
    counter!(
        "client_transport_state_changes_total",
        "direction" => direction.as_str(),
        "state" => state.as_str()
    )
    .increment(1);
}

/// Record an error surfaced to the session.
///
/// Metric: `client_errors_total`
/// Labels: `error_type` (bounded by `ClientError::error_type_label`)
pub fn record_error(error_type: &'static str) {
    counter!("client_errors_total", "error_type" => error_type).increment(1);
}

/// Set the number of remote participants.
///
/// Metric: `client_peers_active`
pub fn set_peers_active(count: usize) {
    // usize to f64 conversion is safe for realistic peer counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("client_peers_active").set(count as f64);
}

/// Set the number of remote subscriptions.
///
/// Metric: `client_consumers_active`
pub fn set_consumers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("client_consumers_active").set(count as f64);
}
