//! Signaling messages exchanged with the SFU signaling server.
//!
//! Every event name maps to exactly one variant carrying a typed payload.
//! On the wire a message is a JSON text frame `{"event": <name>, "data":
//! <payload>}` with camelCase payload keys.

use crate::params::{DtlsParameters, RtpCapabilities, RtpParameters, TransportParams};
use common::types::{
    ClassId, ConsumerId, MediaKind, ParticipantId, ProducerId, TransportDirection, TransportId,
};
use serde::{Deserialize, Serialize};

/// Messages sent from the client to the signaling server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Request to enter the call of a class.
    JoinVideoCall(JoinVideoCall),
    /// Announce the local device capabilities.
    SetRtpCapabilities(SetRtpCapabilities),
    /// Complete the DTLS handshake of one transport.
    ConnectTransport(ConnectTransport),
    /// Publish a local track.
    StartProducing(StartProducing),
    /// Subscribe to a remote producer.
    StartConsuming(StartConsuming),
    /// Unpause a consumer once the client is ready for its media.
    ResumeConsumer(ResumeConsumer),
    /// Leave notification.
    LeaveVideoCall,
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinVideoCall(_) => "join_video_call",
            ClientEvent::SetRtpCapabilities(_) => "set_rtp_capabilities",
            ClientEvent::ConnectTransport(_) => "connect_transport",
            ClientEvent::StartProducing(_) => "start_producing",
            ClientEvent::StartConsuming(_) => "start_consuming",
            ClientEvent::ResumeConsumer(_) => "resume_consumer",
            ClientEvent::LeaveVideoCall => "leave_video_call",
        }
    }
}

/// Messages sent from the signaling server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Router capabilities; the call is ready for negotiation.
    VideoCallReady(VideoCallReady),
    /// Connection parameters for both transports.
    TransportsCreated(TransportsCreated),
    /// A `connect_transport` request succeeded.
    TransportConnected(TransportConnectResult),
    /// A `connect_transport` request failed.
    TransportConnectError(TransportConnectResult),
    /// A `start_producing` request succeeded.
    ProducerCreated(ProducerCreated),
    /// A `start_producing` request failed.
    ProducerError(ProducerFailed),
    /// A remote participant published a track.
    NewProducerAvailable(NewProducerAvailable),
    /// A `start_consuming` request succeeded.
    ConsumerCreated(ConsumerCreated),
    /// A `start_consuming` request failed.
    ConsumerError(ConsumerFailed),
    /// A remote participant left the call.
    PeerDisconnected(PeerDisconnected),
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::VideoCallReady(_) => "video_call_ready",
            ServerEvent::TransportsCreated(_) => "transports_created",
            ServerEvent::TransportConnected(_) => "transport_connected",
            ServerEvent::TransportConnectError(_) => "transport_connect_error",
            ServerEvent::ProducerCreated(_) => "producer_created",
            ServerEvent::ProducerError(_) => "producer_error",
            ServerEvent::NewProducerAvailable(_) => "new_producer_available",
            ServerEvent::ConsumerCreated(_) => "consumer_created",
            ServerEvent::ConsumerError(_) => "consumer_error",
            ServerEvent::PeerDisconnected(_) => "peer_disconnected",
        }
    }
}

// ----------------------------------------------------------------------------
// Client payloads
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinVideoCall {
    pub class_id: ClassId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRtpCapabilities {
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransport {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProducing {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConsuming {
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumer {
    pub consumer_id: ConsumerId,
}

// ----------------------------------------------------------------------------
// Server payloads
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCallReady {
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportsCreated {
    pub send_transport: TransportParams,
    pub recv_transport: TransportParams,
}

/// Payload shared by `transport_connected` and `transport_connect_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConnectResult {
    pub transport_id: TransportId,
    pub direction: TransportDirection,
    /// `Some(false)` on a `transport_connected` event still reports failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerCreated {
    pub kind: MediaKind,
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerFailed {
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProducerAvailable {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    /// Participant that owns the producer.
    pub producer_socket_id: ParticipantId,
    /// Display name of that participant.
    #[serde(default)]
    pub producer_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerCreated {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerFailed {
    pub producer_id: ProducerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDisconnected {
    pub peer_id: ParticipantId,
}
