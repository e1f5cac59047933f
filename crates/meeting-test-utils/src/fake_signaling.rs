//! Fake signaling server.
//!
//! Sits on the socket side of [`SignalingConnection::channel`]. Tests read
//! what the session emitted, decoded, and push server events (or raw,
//! possibly malformed, frames) back.

use common::types::ParticipantId;
use meeting_client::{Config, SignalingConnection, SignalingPeer};
use signaling_protocol::{decode_client_event, encode_server_event, ClientEvent, ServerEvent};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `recv` waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Fake signaling server for one session.
pub struct FakeSignalingServer {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::Sender<String>>,
    history: Vec<ClientEvent>,
}

impl FakeSignalingServer {
    /// Create a connection for the session and the server that answers it.
    /// The session is identified as `participant_id`.
    #[must_use]
    pub fn pair(participant_id: &str, config: &Config) -> (SignalingConnection, Self) {
        let (connection, peer) = SignalingConnection::from_config(config);
        let connection = connection.with_participant_id(ParticipantId::from(participant_id));
        (connection, Self::new(peer))
    }

    #[must_use]
    pub fn new(peer: SignalingPeer) -> Self {
        Self {
            outbound: peer.outbound,
            inbound: Some(peer.inbound),
            history: Vec::new(),
        }
    }

    /// Next event emitted by the session.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`RECV_TIMEOUT`] or a frame does not
    /// decode.
    pub async fn recv(&mut self) -> ClientEvent {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for a client event")
            .expect("session closed the signaling channel");
        let event = decode_client_event(&frame).expect("session emitted an invalid frame");
        self.history.push(event.clone());
        event
    }

    /// Next event, which must be named `name`.
    ///
    /// # Panics
    ///
    /// Panics on timeout or if a different event arrives.
    pub async fn expect(&mut self, name: &str) -> ClientEvent {
        let event = self.recv().await;
        assert_eq!(event.name(), name, "unexpected client event: {event:?}");
        event
    }

    /// Skip events until one named `name` arrives.
    ///
    /// # Panics
    ///
    /// Panics on timeout.
    pub async fn wait_for(&mut self, name: &str) -> ClientEvent {
        loop {
            let event = self.recv().await;
            if event.name() == name {
                return event;
            }
        }
    }

    /// Everything emitted so far that has not been read, without waiting.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            let event = decode_client_event(&frame).expect("session emitted an invalid frame");
            self.history.push(event.clone());
            events.push(event);
        }
        events
    }

    /// Push a server event to the session.
    ///
    /// # Panics
    ///
    /// Panics if the inbound side was disconnected or the session is gone.
    pub async fn push(&self, event: ServerEvent) {
        let frame = encode_server_event(&event).expect("server event must encode");
        self.push_raw(frame).await;
    }

    /// Push an arbitrary text frame.
    ///
    /// # Panics
    ///
    /// Panics if the inbound side was disconnected or the session is gone.
    pub async fn push_raw(&self, frame: impl Into<String>) {
        self.inbound
            .as_ref()
            .expect("inbound side disconnected")
            .send(frame.into())
            .await
            .expect("session dropped its inbound queue");
    }

    /// Close the server-to-client direction, as a dropped socket would.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Every event read so far, in order.
    #[must_use]
    pub fn history(&self) -> &[ClientEvent] {
        &self.history
    }

    /// Number of read events named `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.history.iter().filter(|e| e.name() == name).count()
    }
}
