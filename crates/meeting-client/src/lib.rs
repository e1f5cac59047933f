//! Meeting Client Library
//!
//! Client-side session logic for classroom video calls routed through an
//! SFU (selective forwarding unit). The client:
//!
//! - Joins the call of a class over a signaling channel
//! - Negotiates RTP capabilities and two WebRTC transports (send and receive)
//! - Publishes local audio and video, one producer per kind
//! - Subscribes to every remote producer and composes one stream per peer
//! - Leaves cleanly, releasing every resource it acquired
//!
//! # Architecture
//!
//! ```text
//! SessionActor
//! ├── CapabilityNegotiator  (device + router capabilities)
//! ├── TransportManager      (send/recv transports, connect handshake)
//! ├── ProducerRegistry      (local audio/video producers)
//! ├── ConsumerRegistry      (remote subscriptions)
//! ├── PeerViewModel         (per-participant streams)
//! └── PendingRequests       (request/response correlation with timeouts)
//! ```
//!
//! The media stack itself sits behind the [`engine`] traits; the embedding
//! application supplies the implementation and the signaling socket.
//!
//! # Modules
//!
//! - [`session`] - The session actor and its handle
//! - [`signaling`] - Outbound sink and inbound frame queue
//! - [`engine`] - Media engine abstraction
//! - [`config`] - Client configuration from environment
//! - [`errors`] - Error types
//! - [`observability`] - Tracing setup and metrics

pub mod config;
pub mod consumer;
pub mod engine;
pub mod errors;
pub mod media;
pub mod negotiator;
pub mod observability;
pub mod peers;
pub mod pending;
pub mod producer;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::Config;
pub use errors::{ClientError, MediaAccessError};
pub use session::{
    CallState, ConnectionState, SessionActor, SessionActorHandle, SessionEvent, SessionState,
};
pub use signaling::{SignalingConnection, SignalingPeer, SignalingSink};
