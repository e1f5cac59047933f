//! Signaling channel seam.
//!
//! The socket carrying signaling frames is owned by the embedding
//! application. The session sees it as an outbound [`SignalingSink`] plus a
//! queue of inbound text frames; decoding happens inside the session actor
//! so malformed frames are dropped in one place.

use crate::config::Config;
use crate::errors::ClientError;
use common::types::ParticipantId;
use signaling_protocol::{encode_client_event, ClientEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound half of the signaling channel.
pub trait SignalingSink: Send + Sync {
    /// Send one event to the server. Must not block.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Signaling` if the channel is closed or the
    /// event cannot be encoded.
    fn emit(&self, event: ClientEvent) -> Result<(), ClientError>;
}

/// Both halves of the signaling channel as seen by a session.
pub struct SignalingConnection {
    pub(crate) sink: Arc<dyn SignalingSink>,
    pub(crate) inbound: mpsc::Receiver<String>,
    pub(crate) participant_id: Option<ParticipantId>,
}

impl SignalingConnection {
    /// Wrap an existing sink and inbound frame queue.
    #[must_use]
    pub fn new(sink: Arc<dyn SignalingSink>, inbound: mpsc::Receiver<String>) -> Self {
        Self {
            sink,
            inbound,
            participant_id: None,
        }
    }

    /// Build an in-process channel pair. The returned [`SignalingPeer`] is
    /// the socket side: it reads encoded outbound frames and pushes inbound
    /// ones.
    #[must_use]
    pub fn channel(buffer: usize) -> (SignalingConnection, SignalingPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer.max(1));

        let connection = SignalingConnection::new(
            Arc::new(ChannelSink { sender: outbound_tx }),
            inbound_rx,
        );
        let peer = SignalingPeer {
            outbound: outbound_rx,
            inbound: inbound_tx,
        };

        (connection, peer)
    }

    /// Build an in-process channel pair sized by
    /// `MEETING_CLIENT_SIGNALING_BUFFER`.
    #[must_use]
    pub fn from_config(config: &Config) -> (SignalingConnection, SignalingPeer) {
        Self::channel(config.signaling_buffer)
    }

    /// Identify the local participant (the server's id for this socket).
    /// Announcements of the local participant's own producers are ignored.
    #[must_use]
    pub fn with_participant_id(mut self, participant_id: ParticipantId) -> Self {
        self.participant_id = Some(participant_id);
        self
    }
}

/// Socket side of an in-process signaling channel.
pub struct SignalingPeer {
    /// Encoded frames emitted by the session.
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Frames to deliver to the session.
    pub inbound: mpsc::Sender<String>,
}

/// Sink that encodes events onto an unbounded channel.
struct ChannelSink {
    sender: mpsc::UnboundedSender<String>,
}

impl SignalingSink for ChannelSink {
    fn emit(&self, event: ClientEvent) -> Result<(), ClientError> {
        let name = event.name();
        let frame = encode_client_event(&event)
            .map_err(|e| ClientError::Signaling(format!("failed to encode {name}: {e}")))?;

        self.sender
            .send(frame)
            .map_err(|_| ClientError::Signaling("signaling channel closed".to_string()))?;

        debug!(target: "client.signaling", event = name, "Emitted signaling event");
        Ok(())
    }
}
