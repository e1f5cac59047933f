//! Signaling protocol for SFU call negotiation.
//!
//! This crate defines one typed message per signaling event, in both
//! directions, and the text-frame codec used on the shared signaling
//! connection. Engine-owned parameter blobs (capabilities, DTLS and RTP
//! parameters) are carried opaquely.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod messages;
pub mod params;

pub use codec::{decode_client_event, decode_server_event, encode_client_event, encode_server_event, CodecError};
pub use messages::*;
pub use params::{DtlsParameters, RtpCapabilities, RtpParameters, TransportParams};
