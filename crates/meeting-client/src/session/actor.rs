//! `SessionActor` - owns one client's video call session.
//!
//! The actor is the only owner of session state. It is driven by three
//! inputs multiplexed in one loop:
//! - user commands from [`SessionActorHandle`]
//! - inbound signaling frames
//! - completions of background request tasks
//!
//! Request/response round-trips (transport connect, produce, consume) run in
//! spawned tasks because the engine calls back into the transport handler
//! while they are in flight. Each join opens a new *generation*: a child
//! cancellation token plus a fresh pending request table. Leaving cancels
//! both before releasing anything, and completions tagged with an older
//! generation are discarded (their resources are closed).

use super::messages::{
    CallState, SessionEvent, SessionMessage, SessionState, TaskOutcome, TaskResult,
};
use crate::config::Config;
use crate::consumer::{self, ConsumerRegistry};
use crate::engine::{EngineConsumer, EngineProducer, MediaEngine, MediaTrack};
use crate::errors::ClientError;
use crate::media::{acquire_local_media, MediaStream};
use crate::negotiator::CapabilityNegotiator;
use crate::observability::metrics;
use crate::peers::PeerViewModel;
use crate::pending::{PendingKey, PendingReply, PendingRequests, PendingResult};
use crate::producer::{produce_track, ProducerRegistry};
use crate::signaling::{SignalingConnection, SignalingSink};
use crate::transport::{connect_all, ManagedTransport, TransportManager, TransportStateEvent};

use chrono::{DateTime, Utc};
use common::types::{ClassId, MediaKind, ParticipantId, ProducerId, TransportDirection};
use signaling_protocol::{
    decode_server_event, ClientEvent, CodecError, JoinVideoCall, NewProducerAvailable,
    ResumeConsumer, ServerEvent, SetRtpCapabilities, TransportConnectResult, TransportsCreated,
    VideoCallReady,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Handle to a `SessionActor`.
#[derive(Clone)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    events: broadcast::Sender<SessionEvent>,
    cancel_token: CancellationToken,
}

impl SessionActorHandle {
    /// Join the video call of a class.
    ///
    /// Resolves once `join_video_call` has been sent, or with the media
    /// access error if the camera/microphone could not be opened. From the
    /// error state the failed call is released first.
    ///
    /// # Errors
    ///
    /// `AlreadyActive` while joining or in a call, `MediaAccess` if capture
    /// failed, `Cancelled` if the session was left meanwhile.
    pub async fn join(&self, class_id: impl Into<ClassId>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Join {
                class_id: class_id.into(),
                respond_to: tx,
            })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Leave the call. A no-op when idle.
    ///
    /// # Errors
    ///
    /// Returns an error only if the actor is gone.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Leave { respond_to: tx })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Enable or disable a local track; its producer is paused accordingly.
    ///
    /// # Errors
    ///
    /// `NotReady` if there is no local track of that kind.
    pub async fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::SetTrackEnabled {
                kind,
                enabled,
                respond_to: tx,
            })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Snapshot the session.
    ///
    /// # Errors
    ///
    /// Returns an error only if the actor is gone.
    pub async fn get_state(&self) -> Result<SessionState, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the actor. The session is left first.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Per-join state. Dropped as a whole on leave.
struct CallContext {
    generation: u64,
    class_id: ClassId,
    token: CancellationToken,
    pending: Arc<PendingRequests>,
    join_reply: Option<oneshot::Sender<Result<(), ClientError>>>,
    join_sent: bool,
    in_call_reached: bool,
    started: Instant,
    joined_at: DateTime<Utc>,
    local_media: Option<MediaStream>,
    negotiator: Option<CapabilityNegotiator>,
    transports: TransportManager,
    negotiation: u64,
    negotiation_token: Option<CancellationToken>,
    producers: ProducerRegistry,
    consumers: ConsumerRegistry,
    peers: PeerViewModel,
}

/// The session actor.
pub struct SessionActor {
    config: Config,
    engine: Arc<dyn MediaEngine>,
    sink: Arc<dyn SignalingSink>,
    inbound: mpsc::Receiver<String>,
    inbound_open: bool,
    participant_id: Option<ParticipantId>,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
    outcome_tx: mpsc::UnboundedSender<TaskOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<TaskOutcome>,
    transport_state_tx: mpsc::UnboundedSender<TransportStateEvent>,
    transport_state_rx: mpsc::UnboundedReceiver<TransportStateEvent>,
    state: CallState,
    generation: u64,
    call: Option<CallContext>,
    last_error: Option<String>,
}

impl SessionActor {
    /// Spawn a session actor.
    ///
    /// Returns a handle and the task join handle.
    ///
    /// # Arguments
    ///
    /// * `config` - Client configuration
    /// * `engine` - Media engine used for capture and SFU transports
    /// * `signaling` - Signaling channel to the server
    /// * `cancel_token` - Stops the actor (after leaving) when cancelled
    pub fn spawn(
        config: Config,
        engine: Arc<dyn MediaEngine>,
        signaling: SignalingConnection,
        cancel_token: CancellationToken,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.command_buffer.max(1));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (transport_state_tx, transport_state_rx) = mpsc::unbounded_channel();

        let SignalingConnection {
            sink,
            inbound,
            participant_id,
        } = signaling;

        let actor = Self {
            config,
            engine,
            sink,
            inbound,
            inbound_open: true,
            participant_id,
            receiver,
            cancel_token: cancel_token.clone(),
            events: events.clone(),
            outcome_tx,
            outcome_rx,
            transport_state_tx,
            transport_state_rx,
            state: CallState::Idle,
            generation: 0,
            call: None,
            last_error: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            events,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "client.session")]
    async fn run(mut self) {
        info!(target: "client.session", "SessionActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "client.session", "SessionActor received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(target: "client.session", "All session handles dropped, exiting");
                            break;
                        }
                    }
                }

                frame = self.inbound.recv(), if self.inbound_open => {
                    match frame {
                        Some(frame) => self.handle_frame(&frame).await,
                        None => self.handle_signaling_closed(),
                    }
                }

                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome);
                }

                Some(event) = self.transport_state_rx.recv() => {
                    self.handle_transport_state(&event);
                }
            }
        }

        if self.state != CallState::Idle {
            self.handle_leave();
        }

        info!(
            target: "client.session",
            generations = self.generation,
            "SessionActor stopped"
        );
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join {
                class_id,
                respond_to,
            } => {
                self.handle_join(class_id, respond_to);
            }

            SessionMessage::Leave { respond_to } => {
                self.handle_leave();
                let _ = respond_to.send(Ok(()));
            }

            SessionMessage::SetTrackEnabled {
                kind,
                enabled,
                respond_to,
            } => {
                let result = self.handle_set_track_enabled(kind, enabled);
                let _ = respond_to.send(result);
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn handle_join(
        &mut self,
        class_id: ClassId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    ) {
        if self.state == CallState::Error {
            info!(
                target: "client.session",
                "Rejoining after session failure, releasing failed call"
            );
            self.release_call(None);
        } else if self.state != CallState::Idle {
            warn!(
                target: "client.session",
                state = %self.state,
                "Join rejected, session already active"
            );
            let err = ClientError::AlreadyActive;
            metrics::record_error(err.error_type_label());
            let _ = respond_to.send(Err(err));
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let token = self.cancel_token.child_token();

        info!(
            target: "client.session",
            generation,
            class_id = %class_id,
            "Joining video call"
        );

        self.call = Some(CallContext {
            generation,
            class_id,
            token: token.clone(),
            pending: Arc::new(PendingRequests::new()),
            join_reply: Some(respond_to),
            join_sent: false,
            in_call_reached: false,
            started: Instant::now(),
            joined_at: Utc::now(),
            local_media: None,
            negotiator: None,
            transports: TransportManager::new(
                Arc::clone(&self.sink),
                self.config.request_timeout,
                self.transport_state_tx.clone(),
            ),
            negotiation: 0,
            negotiation_token: None,
            producers: ProducerRegistry::new(),
            consumers: ConsumerRegistry::new(),
            peers: PeerViewModel::new(),
        });
        self.last_error = None;
        self.set_state(CallState::Joining);

        let engine = Arc::clone(&self.engine);
        let ideal = self.config.ideal_resolution;
        let fallback = self.config.fallback_resolution;
        self.spawn_task(
            generation,
            token,
            async move {
                acquire_local_media(engine.as_ref(), ideal, fallback)
                    .await
                    .map_err(ClientError::from)
            },
            TaskResult::MediaAcquired,
        );
    }

    fn handle_leave(&mut self) {
        if self.state == CallState::Idle {
            debug!(target: "client.session", "Leave while idle, nothing to do");
            return;
        }

        info!(target: "client.session", state = %self.state, "Leaving video call");
        self.set_state(CallState::Leaving);
        self.release_call(None);
        self.last_error = None;
        self.set_state(CallState::Idle);
    }

    fn handle_set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<(), ClientError> {
        let Some(call) = self.call.as_ref() else {
            return Err(ClientError::NotReady("no active session".to_string()));
        };
        let Some(track) = call.local_media.as_ref().and_then(|m| m.track(kind)) else {
            return Err(ClientError::NotReady(format!("no local {kind} track")));
        };

        track.set_enabled(enabled);
        let paused = call.producers.set_paused(kind, !enabled);
        info!(
            target: "client.session",
            kind = %kind,
            enabled,
            producer_updated = paused,
            "Local track toggled"
        );
        Ok(())
    }

    fn snapshot(&self) -> SessionState {
        let call = self.call.as_ref();
        SessionState {
            class_id: call.map(|c| c.class_id.clone()),
            participant_id: self.participant_id.clone(),
            call_state: self.state,
            connection_state: self.state.into(),
            joined_at: call.map(|c| c.joined_at),
            local_stream: call.and_then(|c| c.local_media.as_ref().map(MediaStream::id)),
            producing: call
                .map(|c| c.producers.active_kinds())
                .unwrap_or_default(),
            consumer_count: call.map_or(0, |c| c.consumers.len()),
            peers: call.map(|c| c.peers.views()).unwrap_or_default(),
            last_error: self.last_error.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Signaling
    // ------------------------------------------------------------------------

    async fn handle_frame(&mut self, frame: &str) {
        let event = match decode_server_event(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    target: "client.signaling",
                    error = %e,
                    frame_len = frame.len(),
                    "Dropping invalid signaling frame"
                );
                metrics::record_frame_dropped(codec_drop_reason(&e));
                return;
            }
        };

        metrics::record_event_received(event.name());
        debug!(target: "client.signaling", event = event.name(), "Received signaling event");

        match event {
            ServerEvent::VideoCallReady(ready) => self.handle_video_call_ready(ready).await,
            ServerEvent::TransportsCreated(created) => self.handle_transports_created(&created),
            ServerEvent::TransportConnected(result) => {
                let key = connect_key(&result);
                let outcome = match result.success {
                    Some(false) => Err(result
                        .error
                        .unwrap_or_else(|| "server reported connect failure".to_string())),
                    _ => Ok(PendingReply::TransportConnected),
                };
                self.resolve(&key, outcome);
            }
            ServerEvent::TransportConnectError(result) => {
                let key = connect_key(&result);
                let reason = result
                    .error
                    .unwrap_or_else(|| "transport connect failed".to_string());
                self.resolve(&key, Err(reason));
            }
            ServerEvent::ProducerCreated(created) => {
                self.resolve(
                    &PendingKey::Produce(created.kind),
                    Ok(PendingReply::Producer(created.producer_id)),
                );
            }
            ServerEvent::ProducerError(failed) => {
                let reason = failed
                    .error
                    .unwrap_or_else(|| "producer rejected".to_string());
                self.resolve(&PendingKey::Produce(failed.kind), Err(reason));
            }
            ServerEvent::NewProducerAvailable(announcement) => {
                self.handle_new_producer(announcement);
            }
            ServerEvent::ConsumerCreated(created) => {
                let key = PendingKey::Consume(created.producer_id.clone());
                self.resolve(&key, Ok(PendingReply::Consumer(created)));
            }
            ServerEvent::ConsumerError(failed) => {
                let reason = failed
                    .error
                    .unwrap_or_else(|| "consumer rejected".to_string());
                self.resolve(&PendingKey::Consume(failed.producer_id), Err(reason));
            }
            ServerEvent::PeerDisconnected(disconnected) => {
                self.handle_peer_disconnected(&disconnected.peer_id);
            }
        }
    }

    fn resolve(&self, key: &PendingKey, result: PendingResult) {
        let matched = self
            .call
            .as_ref()
            .is_some_and(|call| call.pending.resolve(key, result));
        if !matched {
            debug!(
                target: "client.signaling",
                key = %key,
                "Discarding unmatched response"
            );
            metrics::record_frame_dropped("unmatched");
        }
    }

    fn handle_signaling_closed(&mut self) {
        self.inbound_open = false;
        warn!(target: "client.signaling", "Signaling channel closed");
        if self.is_failable() {
            self.fail_session(ClientError::Signaling(
                "signaling channel closed".to_string(),
            ));
        }
    }

    async fn handle_video_call_ready(&mut self, ready: VideoCallReady) {
        let join_sent = self.call.as_ref().is_some_and(|c| c.join_sent);
        if self.state != CallState::Joining || !join_sent {
            warn!(
                target: "client.session",
                state = %self.state,
                "Ignoring unexpected video_call_ready"
            );
            return;
        }

        self.set_state(CallState::AwaitingCapabilities);

        let negotiator = match CapabilityNegotiator::new(self.engine.as_ref()) {
            Ok(negotiator) => negotiator,
            Err(e) => {
                self.fail_session(e);
                return;
            }
        };
        if let Err(e) = negotiator.initialize(&ready.rtp_capabilities).await {
            self.fail_session(e);
            return;
        }
        let local = match negotiator.local_capabilities() {
            Ok(local) => local,
            Err(e) => {
                self.fail_session(e);
                return;
            }
        };

        // Left or failed while the device was loading
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if self.state != CallState::AwaitingCapabilities {
            return;
        }
        call.negotiator = Some(negotiator);

        if let Err(e) = self
            .sink
            .emit(ClientEvent::SetRtpCapabilities(SetRtpCapabilities {
                rtp_capabilities: local,
            }))
        {
            self.fail_session(e);
            return;
        }
        info!(target: "client.session", "Announced local RTP capabilities");
    }

    fn handle_transports_created(&mut self, created: &TransportsCreated) {
        let loaded = self
            .call
            .as_ref()
            .and_then(|c| c.negotiator.as_ref())
            .is_some_and(CapabilityNegotiator::is_loaded);
        if !loaded {
            let err = ClientError::NotReady(
                "transports_created received before capabilities were loaded".to_string(),
            );
            warn!(
                target: "client.session",
                state = %self.state,
                error = %err,
                "Rejecting transports_created"
            );
            metrics::record_error(err.error_type_label());
            if self.call.is_some() {
                self.publish(SessionEvent::Error {
                    message: err.user_message(),
                    fatal: false,
                });
            }
            return;
        }

        if !matches!(
            self.state,
            CallState::AwaitingCapabilities | CallState::NegotiatingTransports
        ) {
            warn!(
                target: "client.session",
                state = %self.state,
                "Ignoring unexpected transports_created"
            );
            return;
        }

        let Some(call) = self.call.as_mut() else {
            return;
        };
        if let Some(previous) = call.negotiation_token.take() {
            previous.cancel();
        }
        call.negotiation += 1;

        let created_pair = match call.negotiator.as_ref() {
            Some(negotiator) => {
                create_pair(&mut call.transports, negotiator, created, &call.pending)
            }
            None => Err(ClientError::Internal("negotiator missing".to_string())),
        };
        let (send, recv) = match created_pair {
            Ok(pair) => pair,
            Err(e) => {
                self.fail_session(e);
                return;
            }
        };

        let token = call.token.child_token();
        call.negotiation_token = Some(token.clone());
        let negotiation = call.negotiation;
        let generation = call.generation;

        self.set_state(CallState::NegotiatingTransports);
        self.spawn_task(
            generation,
            token,
            async move { connect_all(&send, &recv).await },
            move |result| TaskResult::TransportsConnected {
                negotiation,
                result,
            },
        );
    }

    fn handle_new_producer(&mut self, announcement: NewProducerAvailable) {
        if self.participant_id.as_ref() == Some(&announcement.producer_socket_id) {
            debug!(
                target: "client.consumer",
                producer_id = %announcement.producer_id,
                "Ignoring announcement of own producer"
            );
            return;
        }

        let state = self.state;
        let Some(call) = self.call.as_mut() else {
            debug!(
                target: "client.consumer",
                producer_id = %announcement.producer_id,
                "No active session, dropping producer announcement"
            );
            return;
        };
        if matches!(state, CallState::Leaving | CallState::Error) {
            debug!(
                target: "client.consumer",
                producer_id = %announcement.producer_id,
                state = %state,
                "Session not negotiating, dropping producer announcement"
            );
            return;
        }

        let Some(recv) = call.transports.get(TransportDirection::Recv).cloned() else {
            warn!(
                target: "client.consumer",
                producer_id = %announcement.producer_id,
                "No receive transport, dropping producer announcement"
            );
            return;
        };

        if !call.consumers.begin(&announcement) {
            return;
        }

        info!(
            target: "client.consumer",
            producer_id = %announcement.producer_id,
            participant_id = %announcement.producer_socket_id,
            kind = %announcement.kind,
            "Consuming new producer"
        );

        let sink = Arc::clone(&self.sink);
        let pending = Arc::clone(&call.pending);
        let timeout = self.config.request_timeout;
        let generation = call.generation;
        let token = call.token.clone();
        let producer_id = announcement.producer_id;
        let task_producer_id = producer_id.clone();

        self.spawn_task(
            generation,
            token,
            async move {
                consumer::request_consumer(
                    sink.as_ref(),
                    &pending,
                    timeout,
                    &recv,
                    task_producer_id,
                )
                .await
            },
            move |result| TaskResult::Consumed {
                producer_id,
                result,
            },
        );
    }

    fn handle_peer_disconnected(&mut self, participant_id: &ParticipantId) {
        let Some(call) = self.call.as_mut() else {
            debug!(
                target: "client.peers",
                participant_id = %participant_id,
                "No active session, ignoring peer_disconnected"
            );
            return;
        };

        let abandoned = call.consumers.remove_peer(participant_id);
        for producer_id in abandoned {
            call.pending.forget(&PendingKey::Consume(producer_id));
        }
        let removed = call.peers.remove(participant_id).is_some();
        let (peers, consumers) = (call.peers.len(), call.consumers.len());

        info!(
            target: "client.peers",
            participant_id = %participant_id,
            had_media = removed,
            "Peer disconnected"
        );
        if removed {
            self.publish(SessionEvent::PeerRemoved(participant_id.clone()));
        }
        metrics::set_peers_active(peers);
        metrics::set_consumers_active(consumers);
    }

    // ------------------------------------------------------------------------
    // Task completions
    // ------------------------------------------------------------------------

    fn handle_outcome(&mut self, outcome: TaskOutcome) {
        let current = self.call.as_ref().map(|c| c.generation);
        if current != Some(outcome.generation) {
            debug!(
                target: "client.session",
                generation = outcome.generation,
                task = outcome.result.name(),
                "Discarding stale task outcome"
            );
            release_stale(outcome.result);
            return;
        }

        match outcome.result {
            TaskResult::MediaAcquired(result) => self.on_media_acquired(result),
            TaskResult::TransportsConnected {
                negotiation,
                result,
            } => self.on_transports_connected(negotiation, result),
            TaskResult::Produced { kind, result } => self.on_produced(kind, result),
            TaskResult::Consumed {
                producer_id,
                result,
            } => self.on_consumed(&producer_id, result),
        }
    }

    fn on_media_acquired(&mut self, result: Result<MediaStream, ClientError>) {
        let stream = match result {
            Ok(stream) => stream,
            Err(ClientError::Cancelled) => return,
            Err(e) => {
                warn!(target: "client.session", error = %e, "Local media unavailable, join aborted");
                metrics::record_join("error");
                metrics::record_error(e.error_type_label());
                if let Some(reply) = self.call.as_mut().and_then(|c| c.join_reply.take()) {
                    let _ = reply.send(Err(e.clone()));
                }
                self.publish(SessionEvent::Error {
                    message: e.user_message(),
                    fatal: false,
                });
                self.release_call(None);
                self.set_state(CallState::Idle);
                return;
            }
        };

        if self.state != CallState::Joining {
            stream.stop_all();
            return;
        }
        let Some(call) = self.call.as_mut() else {
            stream.stop_all();
            return;
        };

        let stream_id = stream.id();
        let kinds = stream.live_kinds();
        let class_id = call.class_id.clone();
        call.local_media = Some(stream);

        let _ = self.events.send(SessionEvent::LocalMediaReady { stream_id, kinds });

        match self.sink.emit(ClientEvent::JoinVideoCall(JoinVideoCall {
            class_id: class_id.clone(),
        })) {
            Ok(()) => {
                call.join_sent = true;
                if let Some(reply) = call.join_reply.take() {
                    let _ = reply.send(Ok(()));
                }
                info!(target: "client.session", class_id = %class_id, "Sent join_video_call");
            }
            Err(e) => {
                error!(target: "client.session", error = %e, "Failed to send join_video_call");
                metrics::record_join("error");
                metrics::record_error(e.error_type_label());
                self.release_call(Some(e));
                self.set_state(CallState::Idle);
            }
        }
    }

    fn on_transports_connected(&mut self, negotiation: u64, result: Result<(), ClientError>) {
        let state = self.state;
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if negotiation != call.negotiation {
            debug!(
                target: "client.transport",
                negotiation,
                current = call.negotiation,
                "Discarding superseded transport negotiation"
            );
            return;
        }
        call.negotiation_token = None;

        match result {
            Ok(()) if state == CallState::NegotiatingTransports => {
                call.in_call_reached = true;
                metrics::record_join("success");
                metrics::record_join_duration(call.started.elapsed());
                info!(target: "client.session", "Both transports connected, call established");
                self.set_state(CallState::InCall);
                self.start_producing();
            }
            Ok(()) => {}
            Err(ClientError::Cancelled) => {
                debug!(target: "client.transport", "Transport negotiation cancelled");
            }
            Err(e) => {
                if self.is_failable() {
                    self.fail_session(e);
                }
            }
        }
    }

    fn start_producing(&mut self) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let Some(send) = call.transports.get(TransportDirection::Send).cloned() else {
            return;
        };
        let Some(media) = call.local_media.as_ref() else {
            warn!(target: "client.producer", "No local media to publish");
            return;
        };

        let tracks: Vec<Arc<dyn MediaTrack>> = MediaKind::ALL
            .iter()
            .filter_map(|kind| media.track(*kind))
            .filter(|track| !track.is_stopped())
            .cloned()
            .collect();

        let mut jobs = Vec::new();
        for track in tracks {
            if call.producers.begin(track.kind()) {
                jobs.push(track);
            }
        }
        let generation = call.generation;
        let token = call.token.clone();

        for track in jobs {
            let kind = track.kind();
            let transport = send.clone();
            info!(target: "client.producer", kind = %kind, "Publishing local track");
            self.spawn_task(
                generation,
                token.clone(),
                async move { produce_track(&transport, track).await },
                move |result| TaskResult::Produced { kind, result },
            );
        }
    }

    fn on_produced(
        &mut self,
        kind: MediaKind,
        result: Result<Arc<dyn EngineProducer>, ClientError>,
    ) {
        let Some(call) = self.call.as_mut() else {
            return;
        };

        match result {
            Ok(producer) => {
                let enabled = call
                    .local_media
                    .as_ref()
                    .and_then(|m| m.track(kind))
                    .map_or(true, |t| t.is_enabled());
                if call.producers.complete(Arc::clone(&producer)) && !enabled {
                    producer.pause();
                }
            }
            Err(ClientError::Cancelled) => {
                call.producers.fail(kind);
                debug!(target: "client.producer", kind = %kind, "Produce cancelled");
            }
            Err(e) => {
                call.producers.fail(kind);
                warn!(target: "client.producer", kind = %kind, error = %e, "Failed to publish local track");
                metrics::record_error(e.error_type_label());
                self.publish(SessionEvent::Error {
                    message: e.user_message(),
                    fatal: false,
                });
            }
        }
    }

    fn on_consumed(
        &mut self,
        producer_id: &ProducerId,
        result: Result<Arc<dyn EngineConsumer>, ClientError>,
    ) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let owner = call.consumers.take_pending(producer_id);

        match (result, owner) {
            (Ok(consumer), Some(owner)) => {
                let consumer_id = consumer.id();
                let track = consumer.track();
                // The peer's previous track of this kind goes with its consumer
                call.consumers.replace_for(&owner);
                call.consumers.insert(consumer, owner.clone());

                // Server-side consumers start paused
                if let Err(e) = self
                    .sink
                    .emit(ClientEvent::ResumeConsumer(ResumeConsumer {
                        consumer_id: consumer_id.clone(),
                    }))
                {
                    warn!(
                        target: "client.consumer",
                        consumer_id = %consumer_id,
                        error = %e,
                        "Failed to send resume_consumer"
                    );
                }

                let info = call
                    .peers
                    .attach(&owner.participant_id, &owner.display_name, track);
                let (peers, consumers) = (call.peers.len(), call.consumers.len());
                let _ = self.events.send(SessionEvent::PeerUpdated(info));
                metrics::set_peers_active(peers);
                metrics::set_consumers_active(consumers);
            }
            (Ok(consumer), None) => {
                debug!(
                    target: "client.consumer",
                    producer_id = %producer_id,
                    "Consumer for abandoned producer, closing"
                );
                consumer::close_tolerant(&consumer);
            }
            (Err(ClientError::Cancelled), _) => {
                debug!(target: "client.consumer", producer_id = %producer_id, "Consume cancelled");
            }
            (Err(e), _) => {
                warn!(
                    target: "client.consumer",
                    producer_id = %producer_id,
                    error = %e,
                    "Failed to consume remote producer"
                );
                metrics::record_error(e.error_type_label());
            }
        }
    }

    fn handle_transport_state(&mut self, event: &TransportStateEvent) {
        let current = self
            .call
            .as_ref()
            .is_some_and(|c| c.transports.is_current(event.direction, &event.transport_id));
        if !current {
            debug!(
                target: "client.transport",
                transport_id = %event.transport_id,
                state = %event.state,
                "Ignoring state of replaced transport"
            );
            return;
        }

        if event.state.is_lost() && self.is_failable() {
            self.fail_session(ClientError::TransportFailed(event.direction));
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn is_failable(&self) -> bool {
        self.state.is_negotiating() || self.state == CallState::InCall
    }

    /// Move to `Error`: stop in-flight negotiation but keep resources until
    /// the user leaves.
    fn fail_session(&mut self, error: ClientError) {
        error!(
            target: "client.session",
            state = %self.state,
            error = %error,
            "Session failed"
        );
        metrics::record_error(error.error_type_label());

        if let Some(call) = self.call.as_mut() {
            call.token.cancel();
            call.pending.cancel_all();
            call.negotiation_token = None;
            if !call.in_call_reached {
                metrics::record_join("error");
            }
            if let Some(reply) = call.join_reply.take() {
                let _ = reply.send(Err(error.clone()));
            }
        }

        let message = error.user_message();
        self.last_error = Some(message.clone());
        self.publish(SessionEvent::Error {
            message,
            fatal: true,
        });
        self.set_state(CallState::Error);
    }

    /// Release everything owned by the current call. The generation is
    /// cancelled first so no in-flight task can touch released resources.
    fn release_call(&mut self, join_error: Option<ClientError>) {
        let Some(mut call) = self.call.take() else {
            return;
        };

        call.token.cancel();
        let cancelled = call.pending.cancel_all();
        if let Some(reply) = call.join_reply.take() {
            let _ = reply.send(Err(join_error.unwrap_or(ClientError::Cancelled)));
        }

        let producers = call.producers.close_all();
        let consumers = call.consumers.close_all();
        call.transports.close_all();
        if let Some(media) = call.local_media.take() {
            media.stop_all();
        }
        for participant_id in call.peers.clear() {
            self.publish(SessionEvent::PeerRemoved(participant_id));
        }

        if call.join_sent {
            if let Err(e) = self.sink.emit(ClientEvent::LeaveVideoCall) {
                warn!(target: "client.session", error = %e, "Failed to send leave_video_call");
            }
        }

        metrics::set_peers_active(0);
        metrics::set_consumers_active(0);
        info!(
            target: "client.session",
            generation = call.generation,
            cancelled_requests = cancelled,
            producers,
            consumers,
            "Session resources released"
        );
    }

    fn set_state(&mut self, state: CallState) {
        if self.state == state {
            return;
        }
        info!(
            target: "client.session",
            from = %self.state,
            to = %state,
            "Call state changed"
        );
        self.state = state;
        self.publish(SessionEvent::StateChanged(state));
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn spawn_task<T, F, W>(&self, generation: u64, token: CancellationToken, future: F, wrap: W)
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ClientError>> + Send + 'static,
        W: FnOnce(Result<T, ClientError>) -> TaskResult + Send + 'static,
    {
        let outcomes = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                () = token.cancelled() => Err(ClientError::Cancelled),
                result = future => result,
            };
            // Actor gone means nobody is waiting
            let _ = outcomes.send(TaskOutcome {
                generation,
                result: wrap(result),
            });
        });
    }
}

fn connect_key(result: &TransportConnectResult) -> PendingKey {
    PendingKey::TransportConnect {
        transport_id: result.transport_id.clone(),
        direction: result.direction,
    }
}

fn create_pair(
    transports: &mut TransportManager,
    negotiator: &CapabilityNegotiator,
    created: &TransportsCreated,
    pending: &Arc<PendingRequests>,
) -> Result<(ManagedTransport, ManagedTransport), ClientError> {
    let send = transports.create_transport(
        negotiator,
        TransportDirection::Send,
        &created.send_transport,
        Arc::clone(pending),
    )?;
    let recv = transports.create_transport(
        negotiator,
        TransportDirection::Recv,
        &created.recv_transport,
        Arc::clone(pending),
    )?;
    Ok((send, recv))
}

/// Close whatever a superseded task produced.
fn release_stale(result: TaskResult) {
    match result {
        TaskResult::MediaAcquired(Ok(stream)) => stream.stop_all(),
        TaskResult::Produced {
            result: Ok(producer),
            ..
        } => {
            if let Err(e) = producer.close() {
                debug!(target: "client.producer", error = %e, "Failed to close stale producer");
            }
        }
        TaskResult::Consumed {
            result: Ok(consumer),
            ..
        } => consumer::close_tolerant(&consumer),
        _ => {}
    }
}

fn codec_drop_reason(error: &CodecError) -> &'static str {
    match error {
        CodecError::FrameTooLarge(_) => "too_large",
        CodecError::InvalidFrame(_) => "invalid_frame",
        CodecError::UnknownEvent(_) => "unknown_event",
        CodecError::InvalidPayload { .. } => "invalid_payload",
        CodecError::Encode(_) => "encode",
    }
}
