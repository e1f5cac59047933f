//! Meeting client error types.
//!
//! Every error carries a human-readable message for the UI layer and a
//! bounded label for metrics. Internal details (engine messages, server
//! error strings) are logged but never shown to the user.

use common::types::{MediaKind, ProducerId, TransportDirection};
use thiserror::Error;

/// Meeting client error type.
///
/// Propagation policy:
/// - `DeviceInit`, `TransportConnect*`, `TransportFailed`: session-fatal,
///   the controller moves to its error state
/// - `Producer*`: scoped to one media kind
/// - `Consumer*`: scoped to one remote track, logged and dropped
/// - `MediaAccess`: fatal to the join attempt only
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The media engine rejected the router capabilities.
    #[error("Device initialization failed: {0}")]
    DeviceInit(String),

    /// An operation was attempted before its prerequisite state.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// `join()` called while a session is already active.
    #[error("Session already active")]
    AlreadyActive,

    /// No `transport_connected` arrived in time.
    #[error("Timed out connecting {0} transport")]
    TransportConnectTimeout(TransportDirection),

    /// The server rejected the transport handshake.
    #[error("Failed to connect {direction} transport: {reason}")]
    TransportConnect {
        direction: TransportDirection,
        reason: String,
    },

    /// The engine reported a failed or lost transport after connecting.
    #[error("{0} transport connection lost")]
    TransportFailed(TransportDirection),

    /// No `producer_created` arrived in time.
    #[error("Timed out publishing {0}")]
    ProducerCreateTimeout(MediaKind),

    /// The server rejected or the engine failed a produce request.
    #[error("Failed to publish {kind}: {reason}")]
    Producer { kind: MediaKind, reason: String },

    /// No `consumer_created` arrived in time.
    #[error("Timed out subscribing to producer {0}")]
    ConsumerCreateTimeout(ProducerId),

    /// The server rejected or the engine failed a consume request.
    #[error("Failed to subscribe to producer {producer_id}: {reason}")]
    Consumer {
        producer_id: ProducerId,
        reason: String,
    },

    /// Camera or microphone could not be opened.
    #[error("Media access error: {0}")]
    MediaAccess(MediaAccessError),

    /// The signaling connection is gone or rejected a message.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The media engine failed an operation.
    #[error("Engine error: {0}")]
    Engine(String),

    /// The operation belonged to a session that was left or torn down.
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Camera/microphone acquisition failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaAccessError {
    /// The user or platform denied access.
    #[error("Permission denied")]
    PermissionDenied,

    /// No camera or microphone is present.
    #[error("No capture device found")]
    NotFound,

    /// The device is held by another application.
    #[error("Capture device in use")]
    InUse,

    /// The device cannot satisfy the requested resolution.
    #[error("Unsupported resolution")]
    UnsupportedResolution,

    /// Any other capture failure.
    #[error("{0}")]
    Other(String),
}

impl MediaAccessError {
    /// Whether a retry at a lower resolution could succeed.
    #[must_use]
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, MediaAccessError::PermissionDenied)
    }

    /// User-facing explanation of the failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            MediaAccessError::PermissionDenied => {
                "Camera and microphone access was denied. Allow access in your browser settings and try again.".to_string()
            }
            MediaAccessError::NotFound => {
                "No camera or microphone was found. Connect a device and try again.".to_string()
            }
            MediaAccessError::InUse => {
                "Your camera or microphone is being used by another application. Close it and try again.".to_string()
            }
            MediaAccessError::UnsupportedResolution => {
                "Your camera does not support the requested video quality.".to_string()
            }
            MediaAccessError::Other(_) => {
                "Could not access your camera or microphone.".to_string()
            }
        }
    }
}

impl From<MediaAccessError> for ClientError {
    fn from(err: MediaAccessError) -> Self {
        ClientError::MediaAccess(err)
    }
}

impl ClientError {
    /// Whether this error ends the session (controller moves to `Error`).
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::DeviceInit(_)
                | ClientError::TransportConnectTimeout(_)
                | ClientError::TransportConnect { .. }
                | ClientError::TransportFailed(_)
        )
    }

    /// Returns a bounded label string for the error variant (for metrics).
    ///
    /// Uses enum variant names, not error message content.
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            ClientError::DeviceInit(_) => "device_init",
            ClientError::NotReady(_) => "not_ready",
            ClientError::AlreadyActive => "already_active",
            ClientError::TransportConnectTimeout(_) => "transport_connect_timeout",
            ClientError::TransportConnect { .. } => "transport_connect",
            ClientError::TransportFailed(_) => "transport_failed",
            ClientError::ProducerCreateTimeout(_) => "producer_create_timeout",
            ClientError::Producer { .. } => "producer",
            ClientError::ConsumerCreateTimeout(_) => "consumer_create_timeout",
            ClientError::Consumer { .. } => "consumer",
            ClientError::MediaAccess(_) => "media_access",
            ClientError::Signaling(_) => "signaling",
            ClientError::Engine(_) => "engine",
            ClientError::Cancelled => "cancelled",
            ClientError::Internal(_) => "internal",
        }
    }

    /// Returns a message suitable for display (no internal details).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ClientError::DeviceInit(_) => {
                "Your browser does not support video calls with this server.".to_string()
            }
            ClientError::NotReady(_) | ClientError::Internal(_) | ClientError::Engine(_) => {
                "Something went wrong in the call. Please leave and join again.".to_string()
            }
            ClientError::AlreadyActive => "You are already in this call.".to_string(),
            ClientError::TransportConnectTimeout(_)
            | ClientError::TransportConnect { .. }
            | ClientError::TransportFailed(_) => {
                "Lost the media connection to the call. Please leave and join again.".to_string()
            }
            ClientError::ProducerCreateTimeout(kind) | ClientError::Producer { kind, .. } => {
                match kind {
                    MediaKind::Audio => "Your microphone could not be shared.".to_string(),
                    MediaKind::Video => "Your camera could not be shared.".to_string(),
                }
            }
            ClientError::ConsumerCreateTimeout(_) | ClientError::Consumer { .. } => {
                "A participant's media could not be loaded.".to_string()
            }
            ClientError::MediaAccess(e) => e.user_message(),
            ClientError::Signaling(_) => {
                "Connection to the call server was lost.".to_string()
            }
            ClientError::Cancelled => "The call was left.".to_string(),
        }
    }
}
