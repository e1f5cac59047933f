//! Local producers, at most one per media kind.

use crate::engine::{EngineProducer, MediaTrack};
use crate::errors::ClientError;
use crate::transport::ManagedTransport;
use common::types::MediaKind;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

enum ProducerSlot {
    InFlight,
    Active(Arc<dyn EngineProducer>),
}

/// Registry of local published tracks.
#[derive(Default)]
pub struct ProducerRegistry {
    slots: BTreeMap<MediaKind, ProducerSlot>,
}

impl ProducerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot for `kind`. Returns `false` if that kind is already
    /// produced or in flight, in which case the caller does nothing.
    pub fn begin(&mut self, kind: MediaKind) -> bool {
        if self.slots.contains_key(&kind) {
            debug!(target: "client.producer", kind = %kind, "Producer exists or in flight, skipping");
            return false;
        }
        self.slots.insert(kind, ProducerSlot::InFlight);
        true
    }

    /// Store a finished producer. If the slot was released in the meantime
    /// (the registry was cleared), the producer is closed and `false` is
    /// returned.
    pub fn complete(&mut self, producer: Arc<dyn EngineProducer>) -> bool {
        let kind = producer.kind();
        match self.slots.get(&kind) {
            Some(ProducerSlot::InFlight) => {
                info!(
                    target: "client.producer",
                    kind = %kind,
                    producer_id = %producer.id(),
                    "Producer created"
                );
                self.slots.insert(kind, ProducerSlot::Active(producer));
                true
            }
            _ => {
                debug!(
                    target: "client.producer",
                    kind = %kind,
                    producer_id = %producer.id(),
                    "Discarding producer for released slot"
                );
                close_tolerant(&producer);
                false
            }
        }
    }

    /// Release an in-flight slot after a failure.
    pub fn fail(&mut self, kind: MediaKind) {
        if matches!(self.slots.get(&kind), Some(ProducerSlot::InFlight)) {
            self.slots.remove(&kind);
        }
    }

    #[must_use]
    pub fn get(&self, kind: MediaKind) -> Option<&Arc<dyn EngineProducer>> {
        match self.slots.get(&kind) {
            Some(ProducerSlot::Active(producer)) => Some(producer),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_in_flight(&self, kind: MediaKind) -> bool {
        matches!(self.slots.get(&kind), Some(ProducerSlot::InFlight))
    }

    /// Kinds with an active producer.
    #[must_use]
    pub fn active_kinds(&self) -> Vec<MediaKind> {
        self.slots
            .iter()
            .filter_map(|(kind, slot)| matches!(slot, ProducerSlot::Active(_)).then_some(*kind))
            .collect()
    }

    /// Pause or resume the producer of `kind`. Returns `false` if there is
    /// no active producer of that kind.
    pub fn set_paused(&self, kind: MediaKind, paused: bool) -> bool {
        let Some(producer) = self.get(kind) else {
            return false;
        };
        if paused {
            producer.pause();
        } else {
            producer.resume();
        }
        debug!(target: "client.producer", kind = %kind, paused, "Producer pause state changed");
        true
    }

    /// Close every producer, tolerating individual failures, and clear the
    /// registry. Returns the number of producers closed.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for (_, slot) in std::mem::take(&mut self.slots) {
            if let ProducerSlot::Active(producer) = slot {
                close_tolerant(&producer);
                closed += 1;
            }
        }
        closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active_kinds().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn close_tolerant(producer: &Arc<dyn EngineProducer>) {
    if producer.is_closed() {
        return;
    }
    if let Err(e) = producer.close() {
        warn!(
            target: "client.producer",
            kind = %producer.kind(),
            producer_id = %producer.id(),
            error = %e,
            "Failed to close producer"
        );
    }
}

/// Publish `track` on the send transport.
///
/// # Errors
///
/// Returns `NotReady` unless the transport is connected and the track is
/// live, otherwise the engine or signaling error.
pub async fn produce_track(
    transport: &ManagedTransport,
    track: Arc<dyn MediaTrack>,
) -> Result<Arc<dyn EngineProducer>, ClientError> {
    if !transport.is_connected() {
        return Err(ClientError::NotReady(format!(
            "send transport is {}",
            transport.state()
        )));
    }
    if track.is_stopped() {
        return Err(ClientError::NotReady(format!(
            "local {} track is stopped",
            track.kind()
        )));
    }

    let kind = track.kind();
    transport.engine().produce(track).await.map_err(|e| match e {
        ClientError::Engine(reason) => ClientError::Producer { kind, reason },
        other => other,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::ProducerId;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProducer {
        kind: MediaKind,
        paused: AtomicBool,
        closed: AtomicBool,
        fail_close: bool,
    }

    impl StubProducer {
        fn new(kind: MediaKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                paused: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                fail_close: false,
            })
        }
    }

    impl EngineProducer for StubProducer {
        fn id(&self) -> ProducerId {
            ProducerId::from(format!("p-{}", self.kind))
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
            if self.fail_close {
                return Err(ClientError::Engine("already gone".to_string()));
            }
            Ok(())
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_one_producer_per_kind() {
        let mut registry = ProducerRegistry::new();

        assert!(registry.begin(MediaKind::Audio));
        assert!(!registry.begin(MediaKind::Audio), "in-flight kind is skipped");
        assert!(registry.complete(StubProducer::new(MediaKind::Audio)));
        assert!(!registry.begin(MediaKind::Audio), "produced kind is skipped");

        assert!(registry.begin(MediaKind::Video));
        assert_eq!(registry.active_kinds(), vec![MediaKind::Audio]);
        assert!(registry.is_in_flight(MediaKind::Video));
    }

    #[test]
    fn test_failure_releases_slot() {
        let mut registry = ProducerRegistry::new();
        registry.begin(MediaKind::Video);

        registry.fail(MediaKind::Video);

        assert!(!registry.is_in_flight(MediaKind::Video));
        assert!(registry.begin(MediaKind::Video));
    }

    #[test]
    fn test_late_completion_after_clear_is_closed() {
        let mut registry = ProducerRegistry::new();
        registry.begin(MediaKind::Audio);
        registry.close_all();

        let producer = StubProducer::new(MediaKind::Audio);
        assert!(!registry.complete(Arc::clone(&producer) as Arc<dyn EngineProducer>));

        assert!(producer.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pause_and_resume() {
        let mut registry = ProducerRegistry::new();
        let producer = StubProducer::new(MediaKind::Video);
        registry.begin(MediaKind::Video);
        registry.complete(Arc::clone(&producer) as Arc<dyn EngineProducer>);

        assert!(registry.set_paused(MediaKind::Video, true));
        assert!(producer.is_paused());
        assert!(registry.set_paused(MediaKind::Video, false));
        assert!(!producer.is_paused());

        assert!(!registry.set_paused(MediaKind::Audio, true));
    }

    #[test]
    fn test_close_all_tolerates_failures() {
        let mut registry = ProducerRegistry::new();
        let failing = Arc::new(StubProducer {
            kind: MediaKind::Audio,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_close: true,
        });
        let video = StubProducer::new(MediaKind::Video);
        registry.begin(MediaKind::Audio);
        registry.begin(MediaKind::Video);
        registry.complete(Arc::clone(&failing) as Arc<dyn EngineProducer>);
        registry.complete(Arc::clone(&video) as Arc<dyn EngineProducer>);

        assert_eq!(registry.close_all(), 2);

        assert!(video.is_closed());
        assert!(registry.is_empty());
        assert_eq!(registry.close_all(), 0);
    }
}
