//! In-memory media engine.
//!
//! Behaves like an SFU client library with the network removed:
//! - `connect()` calls the transport handler once and remembers success
//! - `produce()` and `consume()` connect first if needed
//! - connection state is only reported when a test injects it
//!
//! Every object the engine creates is recorded so tests can assert on what
//! was stopped, closed or paused.
//!
//! # Example
//!
//! ```rust,ignore
//! use meeting_test_utils::FakeEngine;
//!
//! let engine = FakeEngine::new();
//! engine.fail_next_capture(MediaAccessError::NotFound);
//!
//! // Hand engine.as_engine() to SessionActor::spawn...
//!
//! assert!(engine.local_tracks().iter().all(|t| t.is_stopped()));
//! ```

use async_trait::async_trait;
use common::types::{ConsumerId, MediaKind, ProducerId, TransportDirection, TransportId};
use meeting_client::engine::{
    ConsumerOptions, Device, EngineConsumer, EngineProducer, EngineTransport, MediaEngine,
    MediaTrack, TransportHandler, TransportState,
};
use meeting_client::media::MediaConstraints;
use meeting_client::{ClientError, MediaAccessError};
use serde_json::json;
use signaling_protocol::{DtlsParameters, RtpCapabilities, RtpParameters, TransportParams};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared inspection state.
#[derive(Default)]
struct EngineState {
    capture_script: Mutex<VecDeque<MediaAccessError>>,
    capture_requests: Mutex<Vec<MediaConstraints>>,
    device_error: Mutex<Option<String>>,
    load_error: Mutex<Option<String>>,
    devices_created: AtomicUsize,
    local_tracks: Mutex<Vec<Arc<FakeTrack>>>,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    producers: Mutex<Vec<Arc<FakeProducer>>>,
    consumers: Mutex<Vec<Arc<FakeConsumer>>>,
}

/// Fake [`MediaEngine`]. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<EngineState>,
}

impl FakeEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine as the trait object the session expects.
    #[must_use]
    pub fn as_engine(&self) -> Arc<dyn MediaEngine> {
        Arc::new(self.clone())
    }

    /// Fail the next capture attempt with `error`. Calls queue up.
    pub fn fail_next_capture(&self, error: MediaAccessError) {
        self.state.capture_script.lock().unwrap().push_back(error);
    }

    /// Make `create_device` fail.
    pub fn fail_device_creation(&self, reason: &str) {
        *self.state.device_error.lock().unwrap() = Some(reason.to_string());
    }

    /// Make `Device::load` fail.
    pub fn fail_device_load(&self, reason: &str) {
        *self.state.load_error.lock().unwrap() = Some(reason.to_string());
    }

    /// Constraints of every capture attempt, in order.
    #[must_use]
    pub fn capture_requests(&self) -> Vec<MediaConstraints> {
        self.state.capture_requests.lock().unwrap().clone()
    }

    #[must_use]
    pub fn devices_created(&self) -> usize {
        self.state.devices_created.load(Ordering::SeqCst)
    }

    /// Every local track handed out by capture.
    #[must_use]
    pub fn local_tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.state.local_tracks.lock().unwrap().clone()
    }

    /// Every transport created, in creation order.
    #[must_use]
    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        self.state.transports.lock().unwrap().clone()
    }

    /// Most recently created transport of `direction`.
    #[must_use]
    pub fn transport(&self, direction: TransportDirection) -> Option<Arc<FakeTransport>> {
        self.transports()
            .into_iter()
            .rev()
            .find(|t| t.direction == direction)
    }

    #[must_use]
    pub fn producers(&self) -> Vec<Arc<FakeProducer>> {
        self.state.producers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn producer(&self, kind: MediaKind) -> Option<Arc<FakeProducer>> {
        self.producers().into_iter().rev().find(|p| p.kind == kind)
    }

    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<FakeConsumer>> {
        self.state.consumers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn consumer_for(&self, producer_id: &str) -> Option<Arc<FakeConsumer>> {
        self.consumers()
            .into_iter()
            .find(|c| c.producer_id.as_str() == producer_id)
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    fn create_device(&self) -> Result<Arc<dyn Device>, ClientError> {
        if let Some(reason) = self.state.device_error.lock().unwrap().clone() {
            return Err(ClientError::Engine(reason));
        }
        self.state.devices_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeDevice {
            engine: Arc::clone(&self.state),
            loaded: AtomicBool::new(false),
        }))
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, MediaAccessError> {
        self.state
            .capture_requests
            .lock()
            .unwrap()
            .push(*constraints);

        if let Some(error) = self.state.capture_script.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        let mut recorded = self.state.local_tracks.lock().unwrap();
        if constraints.audio {
            let track = FakeTrack::new(format!("local-audio-{}", recorded.len()), MediaKind::Audio);
            recorded.push(Arc::clone(&track));
            tracks.push(track);
        }
        if constraints.video.is_some() {
            let track = FakeTrack::new(format!("local-video-{}", recorded.len()), MediaKind::Video);
            recorded.push(Arc::clone(&track));
            tracks.push(track);
        }
        Ok(tracks)
    }
}

/// Fake SFU device.
pub struct FakeDevice {
    engine: Arc<EngineState>,
    loaded: AtomicBool,
}

impl FakeDevice {
    fn create_transport(
        &self,
        direction: TransportDirection,
        params: &TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>, ClientError> {
        if !self.is_loaded() {
            return Err(ClientError::Engine("device not loaded".to_string()));
        }
        let transport = Arc::new(FakeTransport {
            id: params.id.clone(),
            direction,
            handler,
            engine: Arc::clone(&self.engine),
            connect_lock: tokio::sync::Mutex::new(()),
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.engine
            .transports
            .lock()
            .unwrap()
            .push(Arc::clone(&transport));
        Ok(transport)
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn load(&self, _router_capabilities: &RtpCapabilities) -> Result<(), ClientError> {
        if let Some(reason) = self.engine.load_error.lock().unwrap().clone() {
            return Err(ClientError::Engine(reason));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.is_loaded().then(device_capabilities)
    }

    fn create_send_transport(
        &self,
        params: &TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>, ClientError> {
        self.create_transport(TransportDirection::Send, params, handler)
    }

    fn create_recv_transport(
        &self,
        params: &TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>, ClientError> {
        self.create_transport(TransportDirection::Recv, params, handler)
    }
}

/// Capabilities the fake device reports once loaded.
#[must_use]
pub fn device_capabilities() -> RtpCapabilities {
    RtpCapabilities::new(object(json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    })))
}

fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// Fake transport.
pub struct FakeTransport {
    id: TransportId,
    direction: TransportDirection,
    handler: Arc<dyn TransportHandler>,
    engine: Arc<EngineState>,
    connect_lock: tokio::sync::Mutex<()>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    closed: AtomicBool,
}

impl FakeTransport {
    #[must_use]
    pub fn transport_id(&self) -> &TransportId {
        &self.id
    }

    #[must_use]
    pub fn transport_direction(&self) -> TransportDirection {
        self.direction
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// How many times the handshake reached the handler.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Report a connection state change as the engine would.
    pub fn inject_connection_state(&self, state: TransportState) {
        self.handler.connection_state_changed(state);
    }

    async fn ensure_connected(&self) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Engine("transport closed".to_string()));
        }
        if self.is_connected() {
            return Ok(());
        }
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let dtls = DtlsParameters::new(object(json!({
            "role": "client",
            "fingerprints": [{ "algorithm": "sha-256", "value": "AA:BB" }]
        })));
        self.handler.connect(dtls).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl EngineTransport for FakeTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    async fn connect(&self) -> Result<(), ClientError> {
        self.ensure_connected().await
    }

    async fn produce(
        &self,
        track: Arc<dyn MediaTrack>,
    ) -> Result<Arc<dyn EngineProducer>, ClientError> {
        self.ensure_connected().await?;
        let kind = track.kind();
        let rtp_parameters = RtpParameters::new(object(json!({ "mid": kind.as_str(), "codecs": [] })));
        let id = self.handler.produce(kind, rtp_parameters).await?;
        let producer = Arc::new(FakeProducer {
            id,
            kind,
            track,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.engine
            .producers
            .lock()
            .unwrap()
            .push(Arc::clone(&producer));
        Ok(producer)
    }

    async fn consume(
        &self,
        options: ConsumerOptions,
    ) -> Result<Arc<dyn EngineConsumer>, ClientError> {
        self.ensure_connected().await?;
        let consumer = Arc::new(FakeConsumer {
            id: options.id.clone(),
            producer_id: options.producer_id.clone(),
            kind: options.kind,
            track: FakeTrack::new(format!("remote-{}", options.producer_id), options.kind),
            closed: AtomicBool::new(false),
        });
        self.engine
            .consumers
            .lock()
            .unwrap()
            .push(Arc::clone(&consumer));
        Ok(consumer)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Fake producer.
pub struct FakeProducer {
    id: ProducerId,
    kind: MediaKind,
    track: Arc<dyn MediaTrack>,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl FakeProducer {
    /// Id of the local track being published.
    #[must_use]
    pub fn track_id(&self) -> String {
        self.track.id()
    }
}

impl EngineProducer for FakeProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Fake consumer.
pub struct FakeConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    track: Arc<FakeTrack>,
    closed: AtomicBool,
}

impl FakeConsumer {
    /// The remote track, with its concrete type.
    #[must_use]
    pub fn fake_track(&self) -> Arc<FakeTrack> {
        Arc::clone(&self.track)
    }
}

impl EngineConsumer for FakeConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> Arc<dyn MediaTrack> {
        Arc::clone(&self.track) as Arc<dyn MediaTrack>
    }

    fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Fake local or remote track.
#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
