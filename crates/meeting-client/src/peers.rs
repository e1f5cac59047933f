//! Per-participant view model.
//!
//! Each remote participant gets one composed [`MediaStream`] holding at most
//! one audio and one video track. The view is what a renderer binds to.

use crate::engine::MediaTrack;
use crate::media::MediaStream;
use common::types::{MediaKind, ParticipantId, StreamId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A remote participant.
#[derive(Debug)]
pub struct Peer {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub stream: MediaStream,
}

impl Peer {
    #[must_use]
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            participant_id: self.participant_id.clone(),
            display_name: self.display_name.clone(),
            stream_id: self.stream.id(),
            audio_track: self.stream.track(MediaKind::Audio).map(|t| t.id()),
            video_track: self.stream.track(MediaKind::Video).map(|t| t.id()),
        }
    }
}

/// Rendering snapshot of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub stream_id: StreamId,
    pub audio_track: Option<String>,
    pub video_track: Option<String>,
}

/// All remote participants, ordered by id.
#[derive(Debug, Default)]
pub struct PeerViewModel {
    peers: BTreeMap<ParticipantId, Peer>,
}

impl PeerViewModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a remote track to a participant's stream, creating the peer
    /// if needed. An existing track of the same kind is removed and stopped
    /// first.
    pub fn attach(
        &mut self,
        participant_id: &ParticipantId,
        display_name: &str,
        track: Arc<dyn MediaTrack>,
    ) -> PeerInfo {
        let peer = self
            .peers
            .entry(participant_id.clone())
            .or_insert_with(|| Peer {
                participant_id: participant_id.clone(),
                display_name: display_name.to_string(),
                stream: MediaStream::new(),
            });

        if !display_name.is_empty() {
            display_name.clone_into(&mut peer.display_name);
        }

        let kind = track.kind();
        if let Some(previous) = peer.stream.add_track(track) {
            debug!(
                target: "client.peers",
                participant_id = %participant_id,
                kind = %kind,
                replaced = %previous.id(),
                "Replacing peer track"
            );
            previous.stop();
        }

        peer.info()
    }

    /// Remove a participant, stopping its tracks.
    pub fn remove(&mut self, participant_id: &ParticipantId) -> Option<Peer> {
        let peer = self.peers.remove(participant_id)?;
        peer.stream.stop_all();
        debug!(target: "client.peers", participant_id = %participant_id, "Peer removed");
        Some(peer)
    }

    /// Remove every participant, stopping their tracks. Returns the removed ids.
    pub fn clear(&mut self) -> Vec<ParticipantId> {
        let peers = std::mem::take(&mut self.peers);
        peers
            .into_values()
            .map(|peer| {
                peer.stream.stop_all();
                peer.participant_id
            })
            .collect()
    }

    #[must_use]
    pub fn get(&self, participant_id: &ParticipantId) -> Option<&Peer> {
        self.peers.get(participant_id)
    }

    #[must_use]
    pub fn views(&self) -> Vec<PeerInfo> {
        self.peers.values().map(Peer::info).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
