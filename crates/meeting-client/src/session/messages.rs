//! Message types for the session actor.
//!
//! Commands arrive over a bounded `tokio::sync::mpsc` mailbox and answer on
//! `tokio::sync::oneshot`. Background request tasks report back over an
//! internal channel, tagged with the generation that spawned them.

use crate::engine::{EngineConsumer, EngineProducer};
use crate::errors::ClientError;
use crate::media::MediaStream;
use crate::peers::PeerInfo;
use chrono::{DateTime, Utc};
use common::types::{ClassId, MediaKind, ParticipantId, ProducerId, StreamId};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Call state machine.
///
/// ```text
/// Idle -> Joining -> AwaitingCapabilities -> NegotiatingTransports -> InCall
///   ^                                                                  |
///   +---------------------------- Leaving <----------------------------+
/// ```
///
/// `Error` is reachable from any non-idle state; only `leave()` exits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Joining,
    AwaitingCapabilities,
    NegotiatingTransports,
    InCall,
    Leaving,
    Error,
}

impl CallState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Joining => "joining",
            CallState::AwaitingCapabilities => "awaiting_capabilities",
            CallState::NegotiatingTransports => "negotiating_transports",
            CallState::InCall => "in_call",
            CallState::Leaving => "leaving",
            CallState::Error => "error",
        }
    }

    /// States in which negotiation is still progressing.
    #[must_use]
    pub const fn is_negotiating(&self) -> bool {
        matches!(
            self,
            CallState::Joining | CallState::AwaitingCapabilities | CallState::NegotiatingTransports
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse connection status for UI indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl From<CallState> for ConnectionState {
    fn from(state: CallState) -> Self {
        match state {
            CallState::Joining | CallState::AwaitingCapabilities | CallState::NegotiatingTransports => {
                ConnectionState::Connecting
            }
            CallState::InCall => ConnectionState::Connected,
            CallState::Idle | CallState::Leaving | CallState::Error => {
                ConnectionState::Disconnected
            }
        }
    }
}

/// Snapshot returned by `get_state()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub class_id: Option<ClassId>,
    pub participant_id: Option<ParticipantId>,
    pub call_state: CallState,
    pub connection_state: ConnectionState,
    pub joined_at: Option<DateTime<Utc>>,
    pub local_stream: Option<StreamId>,
    /// Kinds with an active producer.
    pub producing: Vec<MediaKind>,
    pub consumer_count: usize,
    pub peers: Vec<PeerInfo>,
    /// User-facing message of the error that moved the session to `Error`.
    pub last_error: Option<String>,
}

/// Notifications broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(CallState),
    PeerUpdated(PeerInfo),
    PeerRemoved(ParticipantId),
    LocalMediaReady {
        stream_id: StreamId,
        kinds: Vec<MediaKind>,
    },
    Error {
        message: String,
        fatal: bool,
    },
}

/// Commands sent to the session actor.
#[derive(Debug)]
pub enum SessionMessage {
    /// Enter the call of a class. Answers once `join_video_call` is sent.
    Join {
        class_id: ClassId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Leave the call and release everything.
    Leave {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Enable or disable a local track (pauses its producer).
    SetTrackEnabled {
        kind: MediaKind,
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Snapshot the session.
    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },
}

/// Completion of a background task.
pub(crate) struct TaskOutcome {
    pub generation: u64,
    pub result: TaskResult,
}

pub(crate) enum TaskResult {
    MediaAcquired(Result<MediaStream, ClientError>),
    TransportsConnected {
        negotiation: u64,
        result: Result<(), ClientError>,
    },
    Produced {
        kind: MediaKind,
        result: Result<Arc<dyn EngineProducer>, ClientError>,
    },
    Consumed {
        producer_id: ProducerId,
        result: Result<Arc<dyn EngineConsumer>, ClientError>,
    },
}

impl TaskResult {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            TaskResult::MediaAcquired(_) => "media_acquired",
            TaskResult::TransportsConnected { .. } => "transports_connected",
            TaskResult::Produced { .. } => "produced",
            TaskResult::Consumed { .. } => "consumed",
        }
    }
}
