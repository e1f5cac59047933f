//! Engine parameter blobs carried by signaling messages.
//!
//! The media engine and the SFU agree on the structure of capabilities,
//! DTLS parameters and RTP parameters; the signaling layer only checks that
//! each one is a JSON object and passes it through untouched.

use common::types::TransportId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! opaque_object {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(try_from = "Value", into = "Value")]
        pub struct $name(Map<String, Value>);

        impl $name {
            /// Wrap an already-validated JSON object.
            #[must_use]
            pub fn new(object: Map<String, Value>) -> Self {
                Self(object)
            }

            /// Borrow the underlying JSON object.
            #[must_use]
            pub fn as_object(&self) -> &Map<String, Value> {
                &self.0
            }
        }

        impl TryFrom<Value> for $name {
            type Error = String;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                match value {
                    Value::Object(object) => Ok(Self(object)),
                    other => Err(format!(
                        "{} must be a JSON object, got {}",
                        stringify!($name),
                        json_type_name(&other)
                    )),
                }
            }
        }

        impl From<$name> for Value {
            fn from(value: $name) -> Self {
                Value::Object(value.0)
            }
        }
    };
}

opaque_object!(
    /// Codec/encoding capabilities of a router or a local device.
    RtpCapabilities
);

opaque_object!(
    /// Local DTLS parameters produced by the engine during connect.
    DtlsParameters
);

opaque_object!(
    /// RTP parameters of a single produced or consumed flow.
    RtpParameters
);

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Server-side connection parameters for one transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    /// Server-assigned transport identifier.
    pub id: TransportId,
    /// ICE username fragment, password and lite flag.
    pub ice_parameters: Value,
    /// ICE candidates the server listens on.
    pub ice_candidates: Vec<Value>,
    /// Server DTLS role and fingerprints.
    pub dtls_parameters: Value,
    /// SCTP parameters when data channels are enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capabilities_accept_objects() {
        let caps: RtpCapabilities =
            serde_json::from_value(json!({ "codecs": [], "headerExtensions": [] })).unwrap();
        assert!(caps.as_object().contains_key("codecs"));
    }

    #[test]
    fn test_capabilities_reject_non_objects() {
        let err = serde_json::from_value::<RtpCapabilities>(json!(["opus"])).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));

        assert!(serde_json::from_value::<DtlsParameters>(Value::Null).is_err());
    }

    #[test]
    fn test_transport_params_require_id() {
        let missing_id = json!({
            "iceParameters": {},
            "iceCandidates": [],
            "dtlsParameters": {}
        });
        assert!(serde_json::from_value::<TransportParams>(missing_id).is_err());

        let params: TransportParams = serde_json::from_value(json!({
            "id": "t-send",
            "iceParameters": { "usernameFragment": "u" },
            "iceCandidates": [{ "ip": "10.0.0.1" }],
            "dtlsParameters": { "role": "auto" }
        }))
        .unwrap();
        assert_eq!(params.id.as_str(), "t-send");
        assert!(params.sctp_parameters.is_none());
    }
}
