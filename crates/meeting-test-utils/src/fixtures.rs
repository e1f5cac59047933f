//! Pre-configured signaling payloads for client tests.

use common::types::{MediaKind, TransportDirection};
use meeting_client::Config;
use serde_json::{json, Map, Value};
use signaling_protocol::{
    ConsumerCreated, ConsumerFailed, NewProducerAvailable, PeerDisconnected, ProducerCreated,
    ProducerFailed, RtpCapabilities, RtpParameters, ServerEvent, TransportConnectResult,
    TransportParams, TransportsCreated, VideoCallReady,
};

pub const CLASS_ID: &str = "class-101";
pub const LOCAL_PARTICIPANT: &str = "socket-self";
pub const SEND_TRANSPORT: &str = "t-send";
pub const RECV_TRANSPORT: &str = "t-recv";

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Client configuration used by tests (production defaults).
#[must_use]
pub fn test_config() -> Config {
    Config::default()
}

#[must_use]
pub fn router_capabilities() -> RtpCapabilities {
    RtpCapabilities::new(object(json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    })))
}

#[must_use]
pub fn transport_params(id: &str) -> TransportParams {
    TransportParams {
        id: id.into(),
        ice_parameters: json!({ "usernameFragment": "frag", "password": "pwd", "iceLite": true }),
        ice_candidates: vec![json!({
            "foundation": "udpcandidate",
            "ip": "203.0.113.10",
            "port": 40000,
            "priority": 1_076_302_079,
            "protocol": "udp",
            "type": "host"
        })],
        dtls_parameters: json!({
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": "CC:DD" }]
        }),
        sctp_parameters: None,
    }
}

#[must_use]
pub fn video_call_ready() -> ServerEvent {
    ServerEvent::VideoCallReady(VideoCallReady {
        rtp_capabilities: router_capabilities(),
    })
}

#[must_use]
pub fn transports_created() -> ServerEvent {
    transports_created_with(SEND_TRANSPORT, RECV_TRANSPORT)
}

#[must_use]
pub fn transports_created_with(send_id: &str, recv_id: &str) -> ServerEvent {
    ServerEvent::TransportsCreated(TransportsCreated {
        send_transport: transport_params(send_id),
        recv_transport: transport_params(recv_id),
    })
}

#[must_use]
pub fn transport_connected(transport_id: &str, direction: TransportDirection) -> ServerEvent {
    ServerEvent::TransportConnected(TransportConnectResult {
        transport_id: transport_id.into(),
        direction,
        success: None,
        error: None,
    })
}

#[must_use]
pub fn transport_connect_error(
    transport_id: &str,
    direction: TransportDirection,
    reason: &str,
) -> ServerEvent {
    ServerEvent::TransportConnectError(TransportConnectResult {
        transport_id: transport_id.into(),
        direction,
        success: Some(false),
        error: Some(reason.to_string()),
    })
}

#[must_use]
pub fn producer_created(kind: MediaKind, producer_id: &str) -> ServerEvent {
    ServerEvent::ProducerCreated(ProducerCreated {
        kind,
        producer_id: producer_id.into(),
    })
}

#[must_use]
pub fn producer_error(kind: MediaKind, reason: &str) -> ServerEvent {
    ServerEvent::ProducerError(ProducerFailed {
        kind,
        error: Some(reason.to_string()),
    })
}

#[must_use]
pub fn new_producer(
    producer_id: &str,
    kind: MediaKind,
    participant_id: &str,
    name: &str,
) -> ServerEvent {
    ServerEvent::NewProducerAvailable(NewProducerAvailable {
        producer_id: producer_id.into(),
        kind,
        producer_socket_id: participant_id.into(),
        producer_name: name.to_string(),
    })
}

#[must_use]
pub fn consumer_created(consumer_id: &str, producer_id: &str, kind: MediaKind) -> ServerEvent {
    ServerEvent::ConsumerCreated(ConsumerCreated {
        consumer_id: consumer_id.into(),
        producer_id: producer_id.into(),
        kind,
        rtp_parameters: RtpParameters::new(object(json!({ "codecs": [], "encodings": [] }))),
    })
}

#[must_use]
pub fn consumer_error(producer_id: &str, reason: &str) -> ServerEvent {
    ServerEvent::ConsumerError(ConsumerFailed {
        producer_id: producer_id.into(),
        error: Some(reason.to_string()),
    })
}

#[must_use]
pub fn peer_disconnected(participant_id: &str) -> ServerEvent {
    ServerEvent::PeerDisconnected(PeerDisconnected {
        peer_id: participant_id.into(),
    })
}
