//! Capability negotiation.
//!
//! Loads the router capabilities announced in `video_call_ready` into a
//! fresh engine device and exposes the local capability set the client
//! announces back with `set_rtp_capabilities`.

use crate::engine::{Device, MediaEngine};
use crate::errors::ClientError;
use signaling_protocol::RtpCapabilities;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Owns the engine device for one session.
pub struct CapabilityNegotiator {
    device: Arc<dyn Device>,
}

impl CapabilityNegotiator {
    /// Create a negotiator around a fresh device.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::DeviceInit` if the engine cannot create a device.
    pub fn new(engine: &dyn MediaEngine) -> Result<Self, ClientError> {
        let device = engine
            .create_device()
            .map_err(|e| ClientError::DeviceInit(e.to_string()))?;
        Ok(Self { device })
    }

    /// Load the router capabilities. A second call once loaded is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::DeviceInit` if the engine rejects the
    /// capabilities. This is not retried.
    pub async fn initialize(&self, router_capabilities: &RtpCapabilities) -> Result<(), ClientError> {
        if self.device.is_loaded() {
            debug!(target: "client.session", "Device already loaded, skipping");
            return Ok(());
        }

        match self.device.load(router_capabilities).await {
            Ok(()) => {
                info!(
                    target: "client.session",
                    codecs = codec_count(router_capabilities),
                    "Device loaded with router capabilities"
                );
                Ok(())
            }
            Err(e) => {
                error!(target: "client.session", error = %e, "Device rejected router capabilities");
                Err(match e {
                    ClientError::DeviceInit(reason) => ClientError::DeviceInit(reason),
                    other => ClientError::DeviceInit(other.to_string()),
                })
            }
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.device.is_loaded()
    }

    /// Local capability set to announce to the server.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotReady` before `initialize` has succeeded.
    pub fn local_capabilities(&self) -> Result<RtpCapabilities, ClientError> {
        if !self.device.is_loaded() {
            return Err(ClientError::NotReady(
                "device capabilities are not loaded".to_string(),
            ));
        }
        self.device.rtp_capabilities().ok_or_else(|| {
            ClientError::Internal("loaded device reported no capabilities".to_string())
        })
    }

    #[must_use]
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }
}

fn codec_count(capabilities: &RtpCapabilities) -> usize {
    capabilities
        .as_object()
        .get("codecs")
        .and_then(|c| c.as_array())
        .map_or(0, Vec::len)
}
