//! Media flow tests: local producers, remote consumers and peer streams.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::MediaKind;
use meeting_client::engine::{EngineConsumer, EngineProducer, MediaTrack};
use meeting_client::{CallState, ClientError, SessionEvent};
use meeting_test_utils::*;
use signaling_protocol::ClientEvent;
use std::time::Duration;

/// Announce a remote producer and answer the consume round-trip.
async fn consume(
    session: &mut TestSession,
    producer_id: &str,
    consumer_id: &str,
    kind: MediaKind,
    participant: &str,
    name: &str,
) {
    session
        .server
        .push(new_producer(producer_id, kind, participant, name))
        .await;
    match session.server.expect("start_consuming").await {
        ClientEvent::StartConsuming(request) => {
            assert_eq!(request.producer_id.as_str(), producer_id);
        }
        other => panic!("expected start_consuming, got {other:?}"),
    }
    session
        .server
        .push(consumer_created(consumer_id, producer_id, kind))
        .await;
    match session.server.expect("resume_consumer").await {
        ClientEvent::ResumeConsumer(resume) => {
            assert_eq!(resume.consumer_id.as_str(), consumer_id);
        }
        other => panic!("expected resume_consumer, got {other:?}"),
    }
}

// ============================================================================
// Producers
// ============================================================================

#[tokio::test]
async fn test_both_local_kinds_are_published_after_connect() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    let audio = session.engine.producer(MediaKind::Audio).unwrap();
    let video = session.engine.producer(MediaKind::Video).unwrap();
    assert_eq!(audio.id().as_str(), "local-audio");
    assert_eq!(video.id().as_str(), "local-video");
    assert_eq!(session.server.count("start_producing"), 2);
}

#[tokio::test]
async fn test_each_kind_succeeds_or_fails_independently() {
    let mut session = TestSession::start();
    session.join().await;
    session.negotiate().await;

    for _ in 0..2 {
        match session.server.wait_for("start_producing").await {
            ClientEvent::StartProducing(request) if request.kind == MediaKind::Audio => {
                session
                    .server
                    .push(producer_error(MediaKind::Audio, "audio codec rejected"))
                    .await;
            }
            ClientEvent::StartProducing(request) => {
                session
                    .server
                    .push(producer_created(request.kind, "remote-video-id"))
                    .await;
            }
            other => panic!("expected start_producing, got {other:?}"),
        }
    }

    let event = session
        .next_event(|e| matches!(e, SessionEvent::Error { .. }))
        .await;
    assert!(matches!(event, SessionEvent::Error { fatal: false, .. }));

    let handle = session.handle.clone();
    eventually("video producing", || {
        let handle = handle.clone();
        async move {
            handle
                .get_state()
                .await
                .is_ok_and(|s| s.producing == vec![MediaKind::Video])
        }
    })
    .await;
    assert_eq!(session.state().await.call_state, CallState::InCall);
    assert!(session.engine.producer(MediaKind::Audio).is_none());
}

#[tokio::test]
async fn test_disabling_a_track_pauses_its_producer_without_signaling() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;
    let video = session.engine.producer(MediaKind::Video).unwrap();
    let audio = session.engine.producer(MediaKind::Audio).unwrap();

    session
        .handle
        .set_track_enabled(MediaKind::Video, false)
        .await
        .unwrap();

    assert!(video.is_paused());
    assert!(!audio.is_paused());
    let local_video = session
        .engine
        .local_tracks()
        .into_iter()
        .find(|t| t.kind() == MediaKind::Video)
        .unwrap();
    assert!(!local_video.is_enabled());

    session
        .handle
        .set_track_enabled(MediaKind::Video, true)
        .await
        .unwrap();
    assert!(!video.is_paused());
    assert!(local_video.is_enabled());
    assert!(session.server.drain().is_empty());
}

#[tokio::test]
async fn test_set_track_enabled_requires_local_media() {
    let session = TestSession::start();

    let err = session
        .handle
        .set_track_enabled(MediaKind::Audio, false)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::NotReady(_)));
}

#[tokio::test]
async fn test_track_disabled_before_publish_starts_paused() {
    let mut session = TestSession::start();
    session.join().await;
    session
        .handle
        .set_track_enabled(MediaKind::Audio, false)
        .await
        .unwrap();

    session.negotiate().await;
    session.answer_producers().await;

    let handle = session.handle.clone();
    eventually("audio producing", || {
        let handle = handle.clone();
        async move {
            handle
                .get_state()
                .await
                .is_ok_and(|s| s.producing.contains(&MediaKind::Audio))
        }
    })
    .await;
    assert!(session.engine.producer(MediaKind::Audio).unwrap().is_paused());
}

// ============================================================================
// Consumers
// ============================================================================

#[tokio::test]
async fn test_remote_producer_is_consumed_and_resumed() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    consume(&mut session, "p-alice-video", "c-1", MediaKind::Video, "alice", "Alice").await;

    let event = session
        .next_event(|e| matches!(e, SessionEvent::PeerUpdated(_)))
        .await;
    match event {
        SessionEvent::PeerUpdated(info) => {
            assert_eq!(info.participant_id.as_str(), "alice");
            assert_eq!(info.display_name, "Alice");
            assert_eq!(info.video_track.as_deref(), Some("remote-p-alice-video"));
            assert!(info.audio_track.is_none());
        }
        other => panic!("unexpected event {other:?}"),
    }

    let state = session.state().await;
    assert_eq!(state.consumer_count, 1);
    assert_eq!(state.peers.len(), 1);
}

#[tokio::test]
async fn test_own_producer_announcement_is_ignored() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    session
        .server
        .push(new_producer("p-self", MediaKind::Audio, LOCAL_PARTICIPANT, "Me"))
        .await;
    session
        .server
        .push(new_producer("p-bob", MediaKind::Audio, "bob", "Bob"))
        .await;

    match session.server.expect("start_consuming").await {
        ClientEvent::StartConsuming(request) => assert_eq!(request.producer_id.as_str(), "p-bob"),
        other => panic!("expected start_consuming, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_announcement_is_ignored() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    session
        .server
        .push(new_producer("p-1", MediaKind::Video, "alice", "Alice"))
        .await;
    session
        .server
        .push(new_producer("p-1", MediaKind::Video, "alice", "Alice"))
        .await;
    session
        .server
        .push(new_producer("p-2", MediaKind::Audio, "alice", "Alice"))
        .await;

    let first = session.server.expect("start_consuming").await;
    let second = session.server.expect("start_consuming").await;
    let ids: Vec<String> = [first, second]
        .into_iter()
        .map(|e| match e {
            ClientEvent::StartConsuming(request) => request.producer_id.as_str().to_string(),
            other => panic!("expected start_consuming, got {other:?}"),
        })
        .collect();
    assert_eq!(ids, vec!["p-1".to_string(), "p-2".to_string()]);
}

#[tokio::test]
async fn test_announcement_without_recv_transport_is_dropped() {
    let mut session = TestSession::start();
    session.join().await;

    session
        .server
        .push(new_producer("p-early", MediaKind::Video, "alice", "Alice"))
        .await;
    session.server.push(video_call_ready()).await;
    session.server.expect("set_rtp_capabilities").await;

    assert!(session.server.drain().is_empty(), "no start_consuming");
    assert_eq!(session.state().await.consumer_count, 0);
}

#[tokio::test]
async fn test_consumer_error_leaves_session_intact() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    session
        .server
        .push(new_producer("p-bad", MediaKind::Video, "alice", "Alice"))
        .await;
    session.server.expect("start_consuming").await;
    session.server.push(consumer_error("p-bad", "router gone")).await;

    // A later announcement is still served
    consume(&mut session, "p-good", "c-2", MediaKind::Audio, "bob", "Bob").await;

    let state = session.state().await;
    assert_eq!(state.call_state, CallState::InCall);
    assert_eq!(state.consumer_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_consumer_timeout_leaves_session_intact() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    // An established peer whose media must keep flowing
    consume(&mut session, "p-bob", "c-bob", MediaKind::Audio, "bob", "Bob").await;

    session
        .server
        .push(new_producer("p-silent", MediaKind::Video, "alice", "Alice"))
        .await;
    session.server.expect("start_consuming").await;

    // Past the 15s request timeout
    tokio::time::sleep(Duration::from_secs(16)).await;

    let state = session.state().await;
    assert_eq!(state.call_state, CallState::InCall);
    assert_eq!(state.consumer_count, 1);
    assert_eq!(state.peers.len(), 1);
    assert_eq!(state.peers[0].participant_id.as_str(), "bob");
    assert_eq!(state.peers[0].audio_track.as_deref(), Some("remote-p-bob"));
    let bob = session.engine.consumer_for("p-bob").unwrap();
    assert!(!bob.is_closed());
    assert!(!bob.fake_track().is_stopped());

    // The late answer is discarded
    session
        .server
        .push(consumer_created("c-late", "p-silent", MediaKind::Video))
        .await;

    // The producer can be announced again once the attempt is over
    session
        .server
        .push(new_producer("p-silent", MediaKind::Video, "alice", "Alice"))
        .await;
    match session.server.expect("start_consuming").await {
        ClientEvent::StartConsuming(request) => {
            assert_eq!(request.producer_id.as_str(), "p-silent");
        }
        other => panic!("expected start_consuming, got {other:?}"),
    }
}

#[tokio::test]
async fn test_peer_disconnect_during_pending_consume_discards_late_reply() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    session
        .server
        .push(new_producer("p-bob", MediaKind::Video, "bob", "Bob"))
        .await;
    session.server.expect("start_consuming").await;

    session.server.push(peer_disconnected("bob")).await;
    session
        .server
        .push(consumer_created("c-bob", "p-bob", MediaKind::Video))
        .await;

    // The next frame emitted is for carol, not a resume for bob
    session
        .server
        .push(new_producer("p-carol", MediaKind::Audio, "carol", "Carol"))
        .await;
    match session.server.recv().await {
        ClientEvent::StartConsuming(request) => {
            assert_eq!(request.producer_id.as_str(), "p-carol");
        }
        other => panic!("expected start_consuming for carol, got {other:?}"),
    }

    let state = session.state().await;
    assert!(state.peers.iter().all(|p| p.participant_id.as_str() != "bob"));
    assert!(session.engine.consumer_for("p-bob").is_none());
}

// ============================================================================
// Peers
// ============================================================================

#[tokio::test]
async fn test_audio_and_video_compose_one_peer_stream() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    consume(&mut session, "p-a", "c-a", MediaKind::Audio, "alice", "Alice").await;
    consume(&mut session, "p-v", "c-v", MediaKind::Video, "alice", "Alice").await;

    let handle = session.handle.clone();
    eventually("two consumers", || {
        let handle = handle.clone();
        async move { handle.get_state().await.is_ok_and(|s| s.consumer_count == 2) }
    })
    .await;

    let peers = session.state().await.peers;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].audio_track.as_deref(), Some("remote-p-a"));
    assert_eq!(peers[0].video_track.as_deref(), Some("remote-p-v"));
}

#[tokio::test]
async fn test_new_track_of_same_kind_replaces_and_stops_previous() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    consume(&mut session, "p-v1", "c-v1", MediaKind::Video, "alice", "Alice").await;
    let first = session
        .next_event(|e| matches!(e, SessionEvent::PeerUpdated(_)))
        .await;

    consume(&mut session, "p-v2", "c-v2", MediaKind::Video, "alice", "Alice").await;
    let second = session
        .next_event(|e| matches!(e, SessionEvent::PeerUpdated(_)))
        .await;

    let (SessionEvent::PeerUpdated(first), SessionEvent::PeerUpdated(second)) = (first, second)
    else {
        panic!("expected peer updates");
    };
    assert_eq!(first.stream_id, second.stream_id);
    assert_eq!(second.video_track.as_deref(), Some("remote-p-v2"));

    let old_track = session.engine.consumer_for("p-v1").unwrap().fake_track();
    let new_track = session.engine.consumer_for("p-v2").unwrap().fake_track();
    assert!(old_track.is_stopped());
    assert!(!new_track.is_stopped());

    // The replaced consumer is closed and no longer counted
    assert!(session.engine.consumer_for("p-v1").unwrap().is_closed());
    assert!(!session.engine.consumer_for("p-v2").unwrap().is_closed());
    assert_eq!(session.state().await.consumer_count, 1);
}

#[tokio::test]
async fn test_peer_disconnect_closes_consumers_and_removes_peer() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;
    consume(&mut session, "p-a", "c-a", MediaKind::Audio, "alice", "Alice").await;
    consume(&mut session, "p-b", "c-b", MediaKind::Audio, "bob", "Bob").await;

    session.server.push(peer_disconnected("alice")).await;

    let event = session
        .next_event(|e| matches!(e, SessionEvent::PeerRemoved(_)))
        .await;
    assert!(matches!(event, SessionEvent::PeerRemoved(id) if id.as_str() == "alice"));

    let alice = session.engine.consumer_for("p-a").unwrap();
    let bob = session.engine.consumer_for("p-b").unwrap();
    assert!(alice.is_closed());
    assert!(alice.fake_track().is_stopped());
    assert!(!bob.is_closed());

    let state = session.state().await;
    assert_eq!(state.consumer_count, 1);
    assert_eq!(state.peers.len(), 1);
    assert_eq!(state.peers[0].participant_id.as_str(), "bob");
}

#[tokio::test]
async fn test_disconnect_of_unknown_peer_is_harmless() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    session.server.push(peer_disconnected("nobody")).await;

    assert_eq!(session.state().await.call_state, CallState::InCall);
}
