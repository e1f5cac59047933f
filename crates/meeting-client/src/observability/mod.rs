//! Observability for the meeting client.
//!
//! # Privacy by Default
//!
//! Logs carry ids, kinds, directions and states. Capability blobs, DTLS
//! parameters and display names are never logged. Metric labels are bounded:
//! - `operation`: 3 values (connect_transport, start_producing, start_consuming)
//! - `status`: success, rejected, timeout, cancelled
//! - `reason`: bounded by codec error variants plus `unmatched`
//! - `error_type`: bounded by `ClientError` variants
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `client_joins_total` | Counter | `status` | Join attempts |
//! | `client_join_duration_seconds` | Histogram | none | Join to in-call latency |
//! | `client_signaling_request_duration_seconds` | Histogram | `operation`, `status` | Round-trip latency |
//! | `client_signaling_events_received_total` | Counter | `event` | Inbound events |
//! | `client_signaling_frames_dropped_total` | Counter | `reason` | Rejected inbound frames |
//! | `client_transport_state_changes_total` | Counter | `direction`, `state` | Engine state reports |
//! | `client_errors_total` | Counter | `error_type` | Errors surfaced to the session |
//! | `client_peers_active` | Gauge | none | Remote participants |
//! | `client_consumers_active` | Gauge | none | Remote subscriptions |

pub mod metrics;

use common::config::ObservabilityConfig;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    }
}
