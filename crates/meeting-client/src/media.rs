//! Local media acquisition and composed media streams.

use crate::engine::{MediaEngine, MediaTrack};
use crate::errors::MediaAccessError;
use common::types::{MediaKind, StreamId};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoResolution {
    pub width: u32,
    pub height: u32,
}

impl VideoResolution {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for VideoResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    /// `None` disables video capture.
    pub video: Option<VideoResolution>,
}

impl MediaConstraints {
    /// Audio plus video at the given resolution.
    #[must_use]
    pub const fn audio_video(resolution: VideoResolution) -> Self {
        Self {
            audio: true,
            video: Some(resolution),
        }
    }
}

/// A set of tracks rendered together, holding at most one track per kind.
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    id: StreamId,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose a stream from captured tracks. Later tracks of a kind replace
    /// earlier ones.
    #[must_use]
    pub fn from_tracks(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        let mut stream = Self::new();
        for track in tracks {
            if let Some(previous) = stream.add_track(track) {
                previous.stop();
            }
        }
        stream
    }

    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Add a track, returning the track of the same kind it replaced.
    pub fn add_track(&mut self, track: Arc<dyn MediaTrack>) -> Option<Arc<dyn MediaTrack>> {
        let previous = self.remove_track(track.kind());
        self.tracks.push(track);
        previous
    }

    /// Detach the track of a kind without stopping it.
    pub fn remove_track(&mut self, kind: MediaKind) -> Option<Arc<dyn MediaTrack>> {
        let position = self.tracks.iter().position(|t| t.kind() == kind)?;
        Some(self.tracks.remove(position))
    }

    #[must_use]
    pub fn track(&self, kind: MediaKind) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Kinds with a track that has not been stopped.
    #[must_use]
    pub fn live_kinds(&self) -> Vec<MediaKind> {
        let mut kinds: Vec<MediaKind> = self
            .tracks
            .iter()
            .filter(|t| !t.is_stopped())
            .map(|t| t.kind())
            .collect();
        kinds.sort();
        kinds
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Open camera and microphone, retrying once at the fallback resolution.
///
/// Permission denial is not retried.
///
/// # Errors
///
/// Returns the error of the last attempt.
pub async fn acquire_local_media(
    engine: &dyn MediaEngine,
    ideal: VideoResolution,
    fallback: VideoResolution,
) -> Result<MediaStream, MediaAccessError> {
    match engine
        .get_user_media(&MediaConstraints::audio_video(ideal))
        .await
    {
        Ok(tracks) => {
            info!(
                target: "client.session",
                resolution = %ideal,
                tracks = tracks.len(),
                "Local media acquired"
            );
            Ok(MediaStream::from_tracks(tracks))
        }
        Err(e) if e.allows_fallback() && fallback != ideal => {
            warn!(
                target: "client.session",
                error = %e,
                ideal = %ideal,
                fallback = %fallback,
                "Media acquisition failed, retrying at fallback resolution"
            );
            let tracks = engine
                .get_user_media(&MediaConstraints::audio_video(fallback))
                .await?;
            info!(
                target: "client.session",
                resolution = %fallback,
                tracks = tracks.len(),
                "Local media acquired at fallback resolution"
            );
            Ok(MediaStream::from_tracks(tracks))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct StubTrack {
        id: String,
        kind: MediaKind,
        stopped: AtomicBool,
    }

    impl StubTrack {
        fn new(id: &str, kind: MediaKind) -> Arc<dyn MediaTrack> {
            Arc::new(Self {
                id: id.to_string(),
                kind,
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl MediaTrack for StubTrack {
        fn id(&self) -> String {
            self.id.clone()
        }
        fn kind(&self) -> MediaKind {
            self.kind
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn set_enabled(&self, _enabled: bool) {}
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    /// Engine whose capture results are scripted per call.
    struct ScriptedEngine {
        results: Mutex<VecDeque<Result<(), MediaAccessError>>>,
        requests: Mutex<Vec<MediaConstraints>>,
    }

    impl ScriptedEngine {
        fn new(results: Vec<Result<(), MediaAccessError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaEngine for ScriptedEngine {
        fn create_device(
            &self,
        ) -> Result<Arc<dyn crate::engine::Device>, crate::errors::ClientError> {
            Err(crate::errors::ClientError::Engine("no device".to_string()))
        }

        async fn get_user_media(
            &self,
            constraints: &MediaConstraints,
        ) -> Result<Vec<Arc<dyn MediaTrack>>, MediaAccessError> {
            self.requests.lock().unwrap().push(*constraints);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
                .map(|()| {
                    vec![
                        StubTrack::new("mic", MediaKind::Audio),
                        StubTrack::new("cam", MediaKind::Video),
                    ]
                })
        }
    }

    const IDEAL: VideoResolution = VideoResolution::new(1280, 720);
    const FALLBACK: VideoResolution = VideoResolution::new(640, 480);

    #[tokio::test]
    async fn test_acquire_at_ideal_resolution() {
        let engine = ScriptedEngine::new(vec![Ok(())]);

        let stream = acquire_local_media(&engine, IDEAL, FALLBACK).await.unwrap();

        assert_eq!(stream.live_kinds(), vec![MediaKind::Audio, MediaKind::Video]);
        let requests = engine.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].video, Some(IDEAL));
    }

    #[tokio::test]
    async fn test_acquire_falls_back_once() {
        let engine = ScriptedEngine::new(vec![Err(MediaAccessError::UnsupportedResolution), Ok(())]);

        let stream = acquire_local_media(&engine, IDEAL, FALLBACK).await.unwrap();

        assert!(!stream.is_empty());
        let requests = engine.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].video, Some(FALLBACK));
    }

    #[tokio::test]
    async fn test_permission_denied_is_not_retried() {
        let engine = ScriptedEngine::new(vec![Err(MediaAccessError::PermissionDenied)]);

        let err = acquire_local_media(&engine, IDEAL, FALLBACK).await.unwrap_err();

        assert_eq!(err, MediaAccessError::PermissionDenied);
        assert_eq!(engine.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_reported() {
        let engine = ScriptedEngine::new(vec![
            Err(MediaAccessError::InUse),
            Err(MediaAccessError::NotFound),
        ]);

        let err = acquire_local_media(&engine, IDEAL, FALLBACK).await.unwrap_err();

        assert_eq!(err, MediaAccessError::NotFound);
    }

    #[test]
    fn test_add_track_replaces_same_kind() {
        let mut stream = MediaStream::new();
        assert!(stream.add_track(StubTrack::new("a1", MediaKind::Audio)).is_none());
        assert!(stream.add_track(StubTrack::new("v1", MediaKind::Video)).is_none());

        let replaced = stream
            .add_track(StubTrack::new("a2", MediaKind::Audio))
            .expect("audio track should be replaced");

        assert_eq!(replaced.id(), "a1");
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(stream.track(MediaKind::Audio).unwrap().id(), "a2");
    }

    #[test]
    fn test_live_kinds_skip_stopped_tracks() {
        let stream = MediaStream::from_tracks(vec![
            StubTrack::new("a", MediaKind::Audio),
            StubTrack::new("v", MediaKind::Video),
        ]);
        stream.track(MediaKind::Video).unwrap().stop();

        assert_eq!(stream.live_kinds(), vec![MediaKind::Audio]);

        stream.stop_all();
        assert!(stream.live_kinds().is_empty());
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(IDEAL.to_string(), "1280x720");
        assert!(FALLBACK.pixels() < IDEAL.pixels());
    }
}
