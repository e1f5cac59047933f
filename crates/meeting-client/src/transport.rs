//! Transport management.
//!
//! A session owns exactly two unidirectional transports: `send` carries
//! local media, `recv` carries remote media. Each is wrapped in a
//! [`ManagedTransport`] that tracks its state, and wired to a
//! [`TransportSignaling`] handler that performs the signaling round-trips
//! the engine asks for.
//!
//! State machine:
//!
//! ```text
//! New -> Connecting -> Connected -> Disconnected
//!                   \-> Failed (terminal)
//! any non-terminal -> Closed (terminal)
//! ```

use crate::engine::{EngineTransport, TransportHandler, TransportState};
use crate::errors::ClientError;
use crate::negotiator::CapabilityNegotiator;
use crate::observability::metrics;
use crate::pending::{PendingError, PendingKey, PendingReply, PendingRequests};
use crate::signaling::SignalingSink;
use async_trait::async_trait;
use common::types::{MediaKind, ProducerId, TransportDirection, TransportId};
use signaling_protocol::{
    ClientEvent, ConnectTransport, DtlsParameters, RtpParameters, StartProducing, TransportParams,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Engine-reported state change, forwarded to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStateEvent {
    pub transport_id: TransportId,
    pub direction: TransportDirection,
    pub state: TransportState,
}

/// Shared state cell that refuses to leave a terminal state.
#[derive(Debug)]
struct StateCell {
    sender: watch::Sender<TransportState>,
}

impl StateCell {
    fn new() -> Self {
        let (sender, _) = watch::channel(TransportState::New);
        Self { sender }
    }

    fn get(&self) -> TransportState {
        *self.sender.borrow()
    }

    /// Returns `false` if the current state is terminal or unchanged.
    fn transition(&self, to: TransportState) -> bool {
        self.sender.send_if_modified(|current| {
            if current.is_terminal() || *current == to {
                return false;
            }
            *current = to;
            true
        })
    }
}

/// Signaling side of one transport.
pub struct TransportSignaling {
    transport_id: TransportId,
    direction: TransportDirection,
    sink: Arc<dyn SignalingSink>,
    pending: Arc<PendingRequests>,
    request_timeout: Duration,
    state: Arc<StateCell>,
    state_events: mpsc::UnboundedSender<TransportStateEvent>,
}

impl TransportSignaling {
    async fn round_trip(
        &self,
        key: PendingKey,
        event: ClientEvent,
    ) -> Result<PendingReply, PendingError> {
        let operation = key.operation();
        let request = self.pending.register(key.clone()).map_err(|e| match e {
            ClientError::Cancelled => PendingError::Cancelled,
            other => PendingError::Rejected(other.to_string()),
        })?;

        if let Err(e) = self.sink.emit(event) {
            self.pending.forget(&key);
            return Err(PendingError::Rejected(e.to_string()));
        }

        let start = Instant::now();
        let result = self.pending.wait(request, self.request_timeout).await;
        metrics::record_signaling_request(operation, pending_status(&result), start.elapsed());
        result
    }
}

pub(crate) fn pending_status(result: &Result<PendingReply, PendingError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(PendingError::Rejected(_)) => "rejected",
        Err(PendingError::TimedOut) => "timeout",
        Err(PendingError::Cancelled) => "cancelled",
    }
}

#[async_trait]
impl TransportHandler for TransportSignaling {
    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), ClientError> {
        debug!(
            target: "client.transport",
            transport_id = %self.transport_id,
            direction = %self.direction,
            "Sending connect_transport"
        );

        let key = PendingKey::TransportConnect {
            transport_id: self.transport_id.clone(),
            direction: self.direction,
        };
        let event = ClientEvent::ConnectTransport(ConnectTransport {
            transport_id: self.transport_id.clone(),
            dtls_parameters,
            direction: self.direction,
        });

        match self.round_trip(key, event).await {
            Ok(_) => Ok(()),
            Err(PendingError::TimedOut) => {
                warn!(
                    target: "client.transport",
                    transport_id = %self.transport_id,
                    direction = %self.direction,
                    timeout_ms = self.request_timeout.as_millis(),
                    "Timed out waiting for transport_connected"
                );
                Err(ClientError::TransportConnectTimeout(self.direction))
            }
            Err(PendingError::Rejected(reason)) => {
                warn!(
                    target: "client.transport",
                    transport_id = %self.transport_id,
                    direction = %self.direction,
                    reason = %reason,
                    "Server rejected transport connect"
                );
                Err(ClientError::TransportConnect {
                    direction: self.direction,
                    reason,
                })
            }
            Err(PendingError::Cancelled) => Err(ClientError::Cancelled),
        }
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, ClientError> {
        if self.direction != TransportDirection::Send {
            return Err(ClientError::Internal(format!(
                "produce requested on {} transport",
                self.direction
            )));
        }

        debug!(target: "client.producer", kind = %kind, "Sending start_producing");

        let event = ClientEvent::StartProducing(StartProducing {
            kind,
            rtp_parameters,
        });

        match self.round_trip(PendingKey::Produce(kind), event).await {
            Ok(PendingReply::Producer(producer_id)) => Ok(producer_id),
            Ok(other) => Err(ClientError::Internal(format!(
                "unexpected reply to start_producing: {other:?}"
            ))),
            Err(PendingError::TimedOut) => Err(ClientError::ProducerCreateTimeout(kind)),
            Err(PendingError::Rejected(reason)) => Err(ClientError::Producer { kind, reason }),
            Err(PendingError::Cancelled) => Err(ClientError::Cancelled),
        }
    }

    fn connection_state_changed(&self, state: TransportState) {
        info!(
            target: "client.transport",
            transport_id = %self.transport_id,
            direction = %self.direction,
            state = %state,
            "Engine reported transport state"
        );

        if !self.state.transition(state) {
            return;
        }
        metrics::record_transport_state(self.direction, state);

        // Receiver gone means the session is shutting down
        let _ = self.state_events.send(TransportStateEvent {
            transport_id: self.transport_id.clone(),
            direction: self.direction,
            state,
        });
    }
}

/// A transport owned by the session.
#[derive(Clone)]
pub struct ManagedTransport {
    id: TransportId,
    direction: TransportDirection,
    engine: Arc<dyn EngineTransport>,
    state: Arc<StateCell>,
}

impl ManagedTransport {
    #[must_use]
    pub fn id(&self) -> &TransportId {
        &self.id
    }

    #[must_use]
    pub fn direction(&self) -> TransportDirection {
        self.direction
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state.get()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn EngineTransport> {
        &self.engine
    }

    /// Run the connect handshake. Already-connected transports return at once.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` for a terminal transport, otherwise the handshake
    /// error. A failed handshake leaves the transport `Failed`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        match self.state() {
            TransportState::Connected => return Ok(()),
            state if state.is_terminal() => {
                return Err(ClientError::NotReady(format!(
                    "{} transport is {state}",
                    self.direction
                )));
            }
            _ => {}
        }

        self.state.transition(TransportState::Connecting);

        match self.engine.connect().await {
            Ok(()) => {
                self.state.transition(TransportState::Connected);
                info!(
                    target: "client.transport",
                    transport_id = %self.id,
                    direction = %self.direction,
                    "Transport connected"
                );
                Ok(())
            }
            Err(ClientError::Cancelled) => Err(ClientError::Cancelled),
            Err(e) => {
                self.state.transition(TransportState::Failed);
                Err(e)
            }
        }
    }

    /// Close the transport. Idempotent.
    pub fn close(&self) {
        if !self.engine.is_closed() {
            self.engine.close();
        }
        if self.state.transition(TransportState::Closed) {
            debug!(
                target: "client.transport",
                transport_id = %self.id,
                direction = %self.direction,
                "Transport closed"
            );
        }
    }
}

impl std::fmt::Debug for ManagedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTransport")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Owns the send and receive transports of a session.
pub struct TransportManager {
    sink: Arc<dyn SignalingSink>,
    request_timeout: Duration,
    state_events: mpsc::UnboundedSender<TransportStateEvent>,
    send: Option<ManagedTransport>,
    recv: Option<ManagedTransport>,
}

impl TransportManager {
    #[must_use]
    pub fn new(
        sink: Arc<dyn SignalingSink>,
        request_timeout: Duration,
        state_events: mpsc::UnboundedSender<TransportStateEvent>,
    ) -> Self {
        Self {
            sink,
            request_timeout,
            state_events,
            send: None,
            recv: None,
        }
    }

    /// Create the transport for one direction from server parameters,
    /// closing any previous transport of that direction.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` before capabilities are loaded, or the engine's
    /// error.
    pub fn create_transport(
        &mut self,
        negotiator: &CapabilityNegotiator,
        direction: TransportDirection,
        params: &TransportParams,
        pending: Arc<PendingRequests>,
    ) -> Result<ManagedTransport, ClientError> {
        if !negotiator.is_loaded() {
            return Err(ClientError::NotReady(
                "transports require loaded capabilities".to_string(),
            ));
        }

        if let Some(previous) = self.take(direction) {
            warn!(
                target: "client.transport",
                transport_id = %previous.id(),
                direction = %direction,
                "Replacing existing transport"
            );
            previous.close();
        }

        let state = Arc::new(StateCell::new());
        let handler = Arc::new(TransportSignaling {
            transport_id: params.id.clone(),
            direction,
            sink: Arc::clone(&self.sink),
            pending,
            request_timeout: self.request_timeout,
            state: Arc::clone(&state),
            state_events: self.state_events.clone(),
        });

        let device = negotiator.device();
        let engine = match direction {
            TransportDirection::Send => device.create_send_transport(params, handler)?,
            TransportDirection::Recv => device.create_recv_transport(params, handler)?,
        };

        let transport = ManagedTransport {
            id: params.id.clone(),
            direction,
            engine,
            state,
        };

        info!(
            target: "client.transport",
            transport_id = %transport.id,
            direction = %direction,
            "Transport created"
        );

        match direction {
            TransportDirection::Send => self.send = Some(transport.clone()),
            TransportDirection::Recv => self.recv = Some(transport.clone()),
        }
        Ok(transport)
    }

    #[must_use]
    pub fn get(&self, direction: TransportDirection) -> Option<&ManagedTransport> {
        match direction {
            TransportDirection::Send => self.send.as_ref(),
            TransportDirection::Recv => self.recv.as_ref(),
        }
    }

    /// Whether `transport_id` is the current transport of `direction`.
    #[must_use]
    pub fn is_current(&self, direction: TransportDirection, transport_id: &TransportId) -> bool {
        self.get(direction).is_some_and(|t| t.id() == transport_id)
    }

    fn take(&mut self, direction: TransportDirection) -> Option<ManagedTransport> {
        match direction {
            TransportDirection::Send => self.send.take(),
            TransportDirection::Recv => self.recv.take(),
        }
    }

    /// Close and forget the transport of one direction. Idempotent.
    pub fn close(&mut self, direction: TransportDirection) {
        if let Some(transport) = self.take(direction) {
            transport.close();
        }
    }

    /// Close both transports. Idempotent.
    pub fn close_all(&mut self) {
        self.close(TransportDirection::Send);
        self.close(TransportDirection::Recv);
    }
}

/// Connect both transports concurrently. Both must succeed; the first
/// failure is returned.
///
/// # Errors
///
/// Returns the first handshake error.
pub async fn connect_all(
    send: &ManagedTransport,
    recv: &ManagedTransport,
) -> Result<(), ClientError> {
    tokio::try_join!(send.connect(), recv.connect())?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{ConsumerOptions, EngineConsumer, EngineProducer, MediaTrack};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ClientEvent>>,
    }

    impl SignalingSink for RecordingSink {
        fn emit(&self, event: ClientEvent) -> Result<(), ClientError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    /// Engine transport that calls the handler's connect on `connect()`.
    struct LoopbackTransport {
        id: TransportId,
        direction: TransportDirection,
        handler: Arc<dyn TransportHandler>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl EngineTransport for LoopbackTransport {
        fn id(&self) -> TransportId {
            self.id.clone()
        }
        fn direction(&self) -> TransportDirection {
            self.direction
        }
        async fn connect(&self) -> Result<(), ClientError> {
            self.handler
                .connect(DtlsParameters::new(Map::new()))
                .await
        }
        async fn produce(
            &self,
            _track: Arc<dyn MediaTrack>,
        ) -> Result<Arc<dyn EngineProducer>, ClientError> {
            Err(ClientError::Engine("unused".to_string()))
        }
        async fn consume(
            &self,
            _options: ConsumerOptions,
        ) -> Result<Arc<dyn EngineConsumer>, ClientError> {
            Err(ClientError::Engine("unused".to_string()))
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn params(id: &str) -> TransportParams {
        serde_json::from_value(json!({
            "id": id,
            "iceParameters": {},
            "iceCandidates": [],
            "dtlsParameters": {}
        }))
        .unwrap()
    }

    struct Harness {
        sink: Arc<RecordingSink>,
        pending: Arc<PendingRequests>,
        transport: ManagedTransport,
        handler: Arc<TransportSignaling>,
        state_rx: mpsc::UnboundedReceiver<TransportStateEvent>,
    }

    fn harness(direction: TransportDirection, timeout: Duration) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let pending = Arc::new(PendingRequests::new());
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let state = Arc::new(StateCell::new());
        let handler = Arc::new(TransportSignaling {
            transport_id: "t-1".into(),
            direction,
            sink: Arc::clone(&sink) as Arc<dyn SignalingSink>,
            pending: Arc::clone(&pending),
            request_timeout: timeout,
            state: Arc::clone(&state),
            state_events: state_tx,
        });
        let engine = Arc::new(LoopbackTransport {
            id: "t-1".into(),
            direction,
            handler: Arc::clone(&handler) as Arc<dyn TransportHandler>,
            closed: AtomicBool::new(false),
        });
        let transport = ManagedTransport {
            id: "t-1".into(),
            direction,
            engine,
            state,
        };
        Harness {
            sink,
            pending,
            transport,
            handler,
            state_rx,
        }
    }

    fn connect_key(direction: TransportDirection) -> PendingKey {
        PendingKey::TransportConnect {
            transport_id: "t-1".into(),
            direction,
        }
    }

    #[tokio::test]
    async fn test_connect_round_trip_succeeds() {
        let h = harness(TransportDirection::Send, Duration::from_secs(15));
        let transport = h.transport.clone();
        let task = tokio::spawn(async move { transport.connect().await });

        while !h.pending.contains(&connect_key(TransportDirection::Send)) {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.transport.state(), TransportState::Connecting);
        assert!(matches!(
            h.sink.events.lock().unwrap().first(),
            Some(ClientEvent::ConnectTransport(c)) if c.direction == TransportDirection::Send
        ));

        h.pending.resolve(
            &connect_key(TransportDirection::Send),
            Ok(PendingReply::TransportConnected),
        );

        task.await.unwrap().unwrap();
        assert_eq!(h.transport.state(), TransportState::Connected);

        // Second connect is immediate and emits nothing
        h.transport.connect().await.unwrap();
        assert_eq!(h.sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fails_transport() {
        let h = harness(TransportDirection::Recv, Duration::from_secs(15));

        let err = h.transport.connect().await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::TransportConnectTimeout(TransportDirection::Recv)
        ));
        assert_eq!(h.transport.state(), TransportState::Failed);
        assert!(h.pending.is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejection_fails_transport() {
        let h = harness(TransportDirection::Send, Duration::from_secs(15));
        let transport = h.transport.clone();
        let task = tokio::spawn(async move { transport.connect().await });

        while !h.pending.contains(&connect_key(TransportDirection::Send)) {
            tokio::task::yield_now().await;
        }
        h.pending.resolve(
            &connect_key(TransportDirection::Send),
            Err("dtls handshake failed".to_string()),
        );

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::TransportConnect { .. }));
        assert_eq!(h.transport.state(), TransportState::Failed);

        // Failed is terminal
        h.transport.close();
        assert_eq!(h.transport.state(), TransportState::Failed);
        assert!(h.transport.engine().is_closed());
        assert!(matches!(
            h.transport.connect().await,
            Err(ClientError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_engine_state_changes_are_forwarded() {
        let mut h = harness(TransportDirection::Send, Duration::from_secs(15));

        h.handler
            .connection_state_changed(TransportState::Connected);
        h.handler
            .connection_state_changed(TransportState::Disconnected);
        // Duplicate is swallowed
        h.handler
            .connection_state_changed(TransportState::Disconnected);

        let first = h.state_rx.recv().await.unwrap();
        assert_eq!(first.state, TransportState::Connected);
        let second = h.state_rx.recv().await.unwrap();
        assert_eq!(second.state, TransportState::Disconnected);
        assert!(h.state_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_produce_on_recv_transport_is_rejected() {
        let h = harness(TransportDirection::Recv, Duration::from_secs(15));

        let err = h
            .handler
            .produce(MediaKind::Audio, RtpParameters::new(Map::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Internal(_)));
        assert!(h.sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_produce_timeout() {
        let h = harness(TransportDirection::Send, Duration::from_secs(15));

        let err = h
            .handler
            .produce(MediaKind::Video, RtpParameters::new(Map::new()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::ProducerCreateTimeout(MediaKind::Video)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_table_cancels_connect() {
        let h = harness(TransportDirection::Send, Duration::from_secs(15));
        h.pending.cancel_all();

        let err = h.transport.connect().await.unwrap_err();

        assert!(matches!(err, ClientError::Cancelled));
        assert!(h.sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let h = harness(TransportDirection::Send, Duration::from_secs(15));

        h.transport.close();
        h.transport.close();

        assert_eq!(h.transport.state(), TransportState::Closed);
        assert!(h.transport.engine().is_closed());
    }

    #[test]
    fn test_manager_requires_loaded_capabilities() {
        use crate::engine::{Device, MediaEngine};
        use crate::errors::MediaAccessError;
        use crate::media::MediaConstraints;
        use signaling_protocol::RtpCapabilities;

        struct UnloadedDevice;

        #[async_trait]
        impl Device for UnloadedDevice {
            fn is_loaded(&self) -> bool {
                false
            }
            async fn load(&self, _caps: &RtpCapabilities) -> Result<(), ClientError> {
                Ok(())
            }
            fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
                None
            }
            fn create_send_transport(
                &self,
                _params: &TransportParams,
                _handler: Arc<dyn TransportHandler>,
            ) -> Result<Arc<dyn EngineTransport>, ClientError> {
                Err(ClientError::Engine("not loaded".to_string()))
            }
            fn create_recv_transport(
                &self,
                _params: &TransportParams,
                _handler: Arc<dyn TransportHandler>,
            ) -> Result<Arc<dyn EngineTransport>, ClientError> {
                Err(ClientError::Engine("not loaded".to_string()))
            }
        }

        struct Engine;

        #[async_trait]
        impl MediaEngine for Engine {
            fn create_device(&self) -> Result<Arc<dyn Device>, ClientError> {
                Ok(Arc::new(UnloadedDevice))
            }
            async fn get_user_media(
                &self,
                _constraints: &MediaConstraints,
            ) -> Result<Vec<Arc<dyn MediaTrack>>, MediaAccessError> {
                Err(MediaAccessError::NotFound)
            }
        }

        let negotiator = CapabilityNegotiator::new(&Engine).unwrap();
        let (state_tx, _state_rx) = mpsc::unbounded_channel();
        let mut manager = TransportManager::new(
            Arc::new(RecordingSink::default()),
            Duration::from_secs(15),
            state_tx,
        );

        let err = manager
            .create_transport(
                &negotiator,
                TransportDirection::Send,
                &params("t-send"),
                Arc::new(PendingRequests::new()),
            )
            .unwrap_err();

        assert!(matches!(err, ClientError::NotReady(_)));
        assert!(manager.get(TransportDirection::Send).is_none());
        assert!(manager.get(TransportDirection::Recv).is_none());
    }
}
