//! Media engine abstraction.
//!
//! The client never touches RTP itself. Capture devices, the SFU device,
//! transports, producers and consumers all live behind these traits so the
//! same session logic drives a browser WebRTC stack, a native engine, or the
//! fakes in `meeting-test-utils`.
//!
//! Callback direction is engine -> client through [`TransportHandler`]: when
//! a transport needs its DTLS handshake completed or a new producer needs a
//! server id, the engine calls the handler and awaits the signaling
//! round-trip.

use crate::errors::{ClientError, MediaAccessError};
use crate::media::MediaConstraints;
use async_trait::async_trait;
use common::types::{ConsumerId, MediaKind, ProducerId, TransportDirection, TransportId};
use signaling_protocol::{DtlsParameters, RtpCapabilities, RtpParameters, TransportParams};
use std::fmt;
use std::sync::Arc;

/// Connection state of a transport.
///
/// `Failed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Failed,
    Disconnected,
    Closed,
}

impl TransportState {
    /// Whether no further transition may leave this state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }

    /// Whether the engine reports the media path as lost.
    #[must_use]
    pub const fn is_lost(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Disconnected)
    }

    /// Returns the state as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Failed => "failed",
            TransportState::Disconnected => "disconnected",
            TransportState::Closed => "closed",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry point into the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a fresh, unloaded device. One is created per join.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot create a device on this platform.
    fn create_device(&self) -> Result<Arc<dyn Device>, ClientError>;

    /// Open the camera and/or microphone.
    ///
    /// # Errors
    ///
    /// Returns a [`MediaAccessError`] describing why capture failed.
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, MediaAccessError>;
}

/// SFU device: holds the negotiated capabilities and builds transports.
#[async_trait]
pub trait Device: Send + Sync {
    /// Whether `load` has completed successfully.
    fn is_loaded(&self) -> bool;

    /// Load the router capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the router capabilities are incompatible with the
    /// local engine.
    async fn load(&self, router_capabilities: &RtpCapabilities) -> Result<(), ClientError>;

    /// Local capabilities, available once loaded.
    fn rtp_capabilities(&self) -> Option<RtpCapabilities>;

    /// Build the transport that carries local media to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not loaded or the parameters are rejected.
    fn create_send_transport(
        &self,
        params: &TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>, ClientError>;

    /// Build the transport that carries remote media from the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not loaded or the parameters are rejected.
    fn create_recv_transport(
        &self,
        params: &TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>, ClientError>;
}

/// Parameters for building a consumer on the receive transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// One engine transport.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn direction(&self) -> TransportDirection;

    /// Run the DTLS handshake. Invokes [`TransportHandler::connect`].
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or an engine error.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Publish a local track. Invokes [`TransportHandler::produce`].
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or an engine error.
    async fn produce(&self, track: Arc<dyn MediaTrack>)
        -> Result<Arc<dyn EngineProducer>, ClientError>;

    /// Build a consumer for a server-side consumer.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the RTP parameters are rejected.
    async fn consume(&self, options: ConsumerOptions)
        -> Result<Arc<dyn EngineConsumer>, ClientError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A published local track.
pub trait EngineProducer: Send + Sync {
    fn id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    fn pause(&self);

    fn resume(&self);

    fn is_paused(&self) -> bool;

    /// # Errors
    ///
    /// Returns an engine error if the producer cannot be closed cleanly.
    fn close(&self) -> Result<(), ClientError>;

    fn is_closed(&self) -> bool;
}

/// A subscription to a remote producer.
pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> ConsumerId;

    fn producer_id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    /// The remote track delivered by this consumer.
    fn track(&self) -> Arc<dyn MediaTrack>;

    /// # Errors
    ///
    /// Returns an engine error if the consumer cannot be closed cleanly.
    fn close(&self) -> Result<(), ClientError>;

    fn is_closed(&self) -> bool;
}

/// A local or remote media track.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> String;

    fn kind(&self) -> MediaKind;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Stop the track. Stopping is permanent.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Engine -> client callbacks for a transport.
#[async_trait]
pub trait TransportHandler: Send + Sync {
    /// Complete the transport handshake with the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the handshake or does not
    /// answer in time.
    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), ClientError>;

    /// Obtain the server id for a new producer.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the producer or does not
    /// answer in time.
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, ClientError>;

    /// The engine observed a connection state change.
    fn connection_state_changed(&self, state: TransportState);
}
