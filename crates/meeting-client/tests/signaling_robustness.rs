//! Inbound signaling robustness: malformed, unknown and unmatched frames
//! never disturb the session.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::types::{MediaKind, TransportDirection};
use meeting_client::engine::EngineTransport;
use meeting_client::CallState;
use meeting_test_utils::*;
use signaling_protocol::ClientEvent;

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let mut session = TestSession::start();
    session.join().await;

    session.server.push_raw("not json at all").await;
    session.server.push_raw(r#"{"event":"teleport","data":{}}"#).await;
    session
        .server
        .push_raw(r#"{"event":"video_call_ready","data":{"rtpCapabilities":"opus"}}"#)
        .await;
    session.server.push_raw(r#"{"data":{}}"#).await;

    session.server.push(video_call_ready()).await;
    session.server.expect("set_rtp_capabilities").await;

    assert_eq!(
        session.state().await.call_state,
        CallState::AwaitingCapabilities
    );
}

#[tokio::test]
async fn test_unmatched_responses_are_discarded() {
    let mut session = TestSession::start();
    session.join_to_in_call().await;

    session
        .server
        .push(transport_connected("t-unknown", TransportDirection::Send))
        .await;
    session
        .server
        .push(producer_created(MediaKind::Audio, "p-duplicate"))
        .await;
    session
        .server
        .push(consumer_created("c-x", "p-never-requested", MediaKind::Video))
        .await;
    session.server.push(consumer_error("p-never-requested", "nope")).await;

    session
        .server
        .push(new_producer("p-real", MediaKind::Audio, "alice", "Alice"))
        .await;
    session.server.expect("start_consuming").await;

    let state = session.state().await;
    assert_eq!(state.call_state, CallState::InCall);
    assert_eq!(state.consumer_count, 0);
    assert_eq!(session.engine.producers().len(), 2);
}

#[tokio::test]
async fn test_events_while_idle_are_ignored() {
    let mut session = TestSession::start();

    session.server.push(video_call_ready()).await;
    session.server.push(transports_created()).await;
    session
        .server
        .push(new_producer("p-1", MediaKind::Video, "alice", "Alice"))
        .await;
    session.server.push(peer_disconnected("alice")).await;

    assert_eq!(session.state().await.call_state, CallState::Idle);
    assert!(session.server.drain().is_empty());

    // Joining afterwards behaves normally
    session.join().await;
    assert_eq!(session.engine.devices_created(), 0);
    session.negotiate().await;
}

#[tokio::test]
async fn test_repeated_video_call_ready_is_ignored() {
    let mut session = TestSession::start();
    session.join().await;
    session.server.push(video_call_ready()).await;
    session.server.expect("set_rtp_capabilities").await;

    session.server.push(video_call_ready()).await;
    session.server.push(transports_created()).await;
    session.answer_connects().await;
    session.wait_for_state(CallState::InCall).await;

    assert_eq!(session.server.count("set_rtp_capabilities"), 1);
    assert_eq!(session.engine.devices_created(), 1);
}

#[tokio::test]
async fn test_transports_recreated_during_negotiation_replace_old_ones() {
    let mut session = TestSession::start();
    session.join().await;
    session.server.push(video_call_ready()).await;
    session.server.expect("set_rtp_capabilities").await;

    session
        .server
        .push(transports_created_with("t-send-1", "t-recv-1"))
        .await;
    session.server.wait_for("connect_transport").await;
    session
        .server
        .push(transports_created_with("t-send-2", "t-recv-2"))
        .await;

    // Answer only the second pair
    let mut answered = 0;
    while answered < 2 {
        if let ClientEvent::ConnectTransport(request) =
            session.server.wait_for("connect_transport").await
        {
            if request.transport_id.as_str().ends_with("-2") {
                session
                    .server
                    .push(transport_connected(
                        request.transport_id.as_str(),
                        request.direction,
                    ))
                    .await;
                answered += 1;
            }
        }
    }

    session.wait_for_state(CallState::InCall).await;
    let transports = session.engine.transports();
    assert_eq!(transports.len(), 4);
    for transport in &transports {
        let replaced = transport.transport_id().as_str().ends_with("-1");
        assert_eq!(transport.is_closed(), replaced);
    }
}
