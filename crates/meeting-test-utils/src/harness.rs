//! Session harness: a spawned `SessionActor` wired to a [`FakeEngine`] and a
//! [`FakeSignalingServer`], with helpers that play the server's side of the
//! happy path.

use crate::fake_engine::FakeEngine;
use crate::fake_signaling::{FakeSignalingServer, RECV_TIMEOUT};
use crate::fixtures::{
    producer_created, test_config, transport_connected, transports_created, video_call_ready,
    CLASS_ID, LOCAL_PARTICIPANT,
};
use common::types::MediaKind;
use meeting_client::{CallState, Config, SessionActor, SessionActorHandle, SessionEvent, SessionState};
use signaling_protocol::ClientEvent;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Poll `check` until it holds.
///
/// # Panics
///
/// Panics with `what` if the condition is still false after 200 polls
/// 10ms apart.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met: {what}");
}

/// A running session plus its fakes.
pub struct TestSession {
    pub handle: SessionActorHandle,
    pub task: JoinHandle<()>,
    pub engine: FakeEngine,
    pub server: FakeSignalingServer,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl TestSession {
    /// Spawn a session with default configuration.
    #[must_use]
    pub fn start() -> Self {
        Self::start_with(test_config(), FakeEngine::new())
    }

    #[must_use]
    pub fn start_with(config: Config, engine: FakeEngine) -> Self {
        let (connection, server) = FakeSignalingServer::pair(LOCAL_PARTICIPANT, &config);
        let (handle, task) = SessionActor::spawn(
            config,
            engine.as_engine(),
            connection,
            CancellationToken::new(),
        );
        let events = handle.subscribe();
        Self {
            handle,
            task,
            engine,
            server,
            events,
        }
    }

    /// # Panics
    ///
    /// Panics if the actor is gone.
    pub async fn state(&self) -> SessionState {
        self.handle.get_state().await.expect("session actor is gone")
    }

    /// # Panics
    ///
    /// Panics if the session does not reach `expected`.
    pub async fn wait_for_state(&self, expected: CallState) {
        let handle = self.handle.clone();
        eventually(&format!("call state {expected}"), || {
            let handle = handle.clone();
            async move {
                handle
                    .get_state()
                    .await
                    .is_ok_and(|state| state.call_state == expected)
            }
        })
        .await;
    }

    /// Join and consume the `join_video_call` frame.
    ///
    /// # Panics
    ///
    /// Panics if the join fails.
    pub async fn join(&mut self) {
        self.handle.join(CLASS_ID).await.expect("join failed");
        self.server.expect("join_video_call").await;
    }

    /// Answer the negotiation up to `InCall`.
    ///
    /// # Panics
    ///
    /// Panics if any step does not happen.
    pub async fn negotiate(&mut self) {
        self.server.push(video_call_ready()).await;
        self.server.expect("set_rtp_capabilities").await;
        self.server.push(transports_created()).await;
        self.answer_connects().await;
        self.wait_for_state(CallState::InCall).await;
    }

    /// Answer both `connect_transport` requests with success.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive.
    pub async fn answer_connects(&mut self) {
        for _ in 0..2 {
            match self.server.wait_for("connect_transport").await {
                ClientEvent::ConnectTransport(request) => {
                    self.server
                        .push(transport_connected(
                            request.transport_id.as_str(),
                            request.direction,
                        ))
                        .await;
                }
                other => panic!("expected connect_transport, got {other:?}"),
            }
        }
    }

    /// Answer both `start_producing` requests. Producer ids are
    /// `local-audio` and `local-video`.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive.
    pub async fn answer_producers(&mut self) {
        for _ in 0..2 {
            match self.server.wait_for("start_producing").await {
                ClientEvent::StartProducing(request) => {
                    self.server
                        .push(producer_created(
                            request.kind,
                            &format!("local-{}", request.kind),
                        ))
                        .await;
                }
                other => panic!("expected start_producing, got {other:?}"),
            }
        }
    }

    /// Join, negotiate and publish both local tracks.
    ///
    /// # Panics
    ///
    /// Panics if the session does not end up in call with two producers.
    pub async fn join_to_in_call(&mut self) {
        self.join().await;
        self.negotiate().await;
        self.answer_producers().await;

        let handle = self.handle.clone();
        eventually("both kinds producing", || {
            let handle = handle.clone();
            async move {
                handle.get_state().await.is_ok_and(|state| {
                    state.producing == vec![MediaKind::Audio, MediaKind::Video]
                })
            }
        })
        .await;
    }

    /// Next session event matching `matches`, skipping others.
    ///
    /// # Panics
    ///
    /// Panics if none arrives in time.
    pub async fn next_event<F>(&mut self, mut matches: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(RECV_TIMEOUT, async move {
            loop {
                match events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("session event channel closed")
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for a session event")
    }
}
