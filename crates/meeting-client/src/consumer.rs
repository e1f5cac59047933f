//! Remote consumers.
//!
//! Consumption is reactive: every `new_producer_available` for a producer
//! that is not already known starts one `start_consuming` round-trip. The
//! registry tracks those in-flight requests by producer id and the finished
//! consumers by server consumer id, each tagged with the owning participant
//! so a disconnect can tear them down together.

use crate::engine::{ConsumerOptions, EngineConsumer};
use crate::errors::ClientError;
use crate::observability::metrics;
use crate::pending::{PendingError, PendingKey, PendingReply, PendingRequests};
use crate::signaling::SignalingSink;
use crate::transport::{pending_status, ManagedTransport};
use common::types::{ConsumerId, MediaKind, ParticipantId, ProducerId};
use signaling_protocol::{ClientEvent, ConsumerCreated, NewProducerAvailable, StartConsuming};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Who a consumption belongs to, captured from the announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOwner {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub kind: MediaKind,
}

/// A consumer together with its owner.
pub struct ConsumerEntry {
    pub consumer: Arc<dyn EngineConsumer>,
    pub owner: ConsumerOwner,
}

/// Registry of remote subscriptions.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<ConsumerId, ConsumerEntry>,
    pending: HashMap<ProducerId, ConsumerOwner>,
}

impl ConsumerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announced producer. Returns `false` for a producer that is
    /// already consumed or pending.
    pub fn begin(&mut self, announcement: &NewProducerAvailable) -> bool {
        if self.is_known(&announcement.producer_id) {
            debug!(
                target: "client.consumer",
                producer_id = %announcement.producer_id,
                "Duplicate producer announcement ignored"
            );
            return false;
        }

        self.pending.insert(
            announcement.producer_id.clone(),
            ConsumerOwner {
                participant_id: announcement.producer_socket_id.clone(),
                display_name: announcement.producer_name.clone(),
                kind: announcement.kind,
            },
        );
        true
    }

    /// Whether a producer is consumed or has a consumption in flight.
    #[must_use]
    pub fn is_known(&self, producer_id: &ProducerId) -> bool {
        self.pending.contains_key(producer_id)
            || self
                .consumers
                .values()
                .any(|entry| &entry.consumer.producer_id() == producer_id)
    }

    /// Claim the pending consumption of a producer. `None` means it was
    /// abandoned.
    pub fn take_pending(&mut self, producer_id: &ProducerId) -> Option<ConsumerOwner> {
        self.pending.remove(producer_id)
    }

    /// Store a finished consumer.
    pub fn insert(&mut self, consumer: Arc<dyn EngineConsumer>, owner: ConsumerOwner) {
        info!(
            target: "client.consumer",
            consumer_id = %consumer.id(),
            producer_id = %consumer.producer_id(),
            participant_id = %owner.participant_id,
            kind = %owner.kind,
            "Consumer created"
        );
        self.consumers
            .insert(consumer.id(), ConsumerEntry { consumer, owner });
    }

    /// Close and drop the consumers that `owner` supersedes: same
    /// participant, same kind. Returns their ids.
    pub fn replace_for(&mut self, owner: &ConsumerOwner) -> Vec<ConsumerId> {
        let replaced: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|(_, entry)| {
                entry.owner.participant_id == owner.participant_id && entry.owner.kind == owner.kind
            })
            .map(|(id, _)| id.clone())
            .collect();
        for consumer_id in &replaced {
            if let Some(entry) = self.consumers.remove(consumer_id) {
                debug!(
                    target: "client.consumer",
                    consumer_id = %consumer_id,
                    participant_id = %owner.participant_id,
                    kind = %owner.kind,
                    "Closing replaced consumer"
                );
                close_tolerant(&entry.consumer);
            }
        }
        replaced
    }

    /// Close every consumer of a participant and abandon its pending
    /// consumptions. Returns the abandoned producer ids so their pending
    /// requests can be forgotten.
    pub fn remove_peer(&mut self, participant_id: &ParticipantId) -> Vec<ProducerId> {
        let owned: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|(_, entry)| &entry.owner.participant_id == participant_id)
            .map(|(id, _)| id.clone())
            .collect();
        for consumer_id in &owned {
            if let Some(entry) = self.consumers.remove(consumer_id) {
                close_tolerant(&entry.consumer);
            }
        }

        let abandoned: Vec<ProducerId> = self
            .pending
            .iter()
            .filter(|(_, owner)| &owner.participant_id == participant_id)
            .map(|(producer_id, _)| producer_id.clone())
            .collect();
        for producer_id in &abandoned {
            self.pending.remove(producer_id);
        }

        debug!(
            target: "client.consumer",
            participant_id = %participant_id,
            closed = owned.len(),
            abandoned = abandoned.len(),
            "Removed consumers of participant"
        );
        abandoned
    }

    /// Close every consumer, tolerating individual failures, and forget all
    /// pending consumptions. Returns the number of consumers closed.
    pub fn close_all(&mut self) -> usize {
        let closed = self.consumers.len();
        for (_, entry) in self.consumers.drain() {
            close_tolerant(&entry.consumer);
        }
        self.pending.clear();
        closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub(crate) fn close_tolerant(consumer: &Arc<dyn EngineConsumer>) {
    if consumer.is_closed() {
        return;
    }
    if let Err(e) = consumer.close() {
        warn!(
            target: "client.consumer",
            consumer_id = %consumer.id(),
            error = %e,
            "Failed to close consumer"
        );
    }
}

/// Request a consumer for `producer_id` and build it on the receive
/// transport.
///
/// # Errors
///
/// `ConsumerCreateTimeout` if the server does not answer in time,
/// `Consumer` if it or the engine rejects the request, `Cancelled` if the
/// request was abandoned.
pub async fn request_consumer(
    sink: &dyn SignalingSink,
    pending: &PendingRequests,
    request_timeout: Duration,
    transport: &ManagedTransport,
    producer_id: ProducerId,
) -> Result<Arc<dyn EngineConsumer>, ClientError> {
    let key = PendingKey::Consume(producer_id.clone());
    let request = pending.register(key.clone())?;

    if let Err(e) = sink.emit(ClientEvent::StartConsuming(StartConsuming {
        producer_id: producer_id.clone(),
    })) {
        pending.forget(&key);
        return Err(e);
    }

    let start = Instant::now();
    let result = pending.wait(request, request_timeout).await;
    metrics::record_signaling_request(key.operation(), pending_status(&result), start.elapsed());

    let created: ConsumerCreated = match result {
        Ok(PendingReply::Consumer(created)) => created,
        Ok(other) => {
            return Err(ClientError::Internal(format!(
                "unexpected reply to start_consuming: {other:?}"
            )))
        }
        Err(PendingError::TimedOut) => {
            warn!(
                target: "client.consumer",
                producer_id = %producer_id,
                timeout_ms = request_timeout.as_millis(),
                "Timed out waiting for consumer_created"
            );
            return Err(ClientError::ConsumerCreateTimeout(producer_id));
        }
        Err(PendingError::Rejected(reason)) => {
            return Err(ClientError::Consumer {
                producer_id,
                reason,
            })
        }
        Err(PendingError::Cancelled) => return Err(ClientError::Cancelled),
    };

    transport
        .engine()
        .consume(ConsumerOptions {
            id: created.consumer_id,
            producer_id: created.producer_id,
            kind: created.kind,
            rtp_parameters: created.rtp_parameters,
        })
        .await
        .map_err(|e| match e {
            ClientError::Cancelled => ClientError::Cancelled,
            other => ClientError::Consumer {
                producer_id,
                reason: other.to_string(),
            },
        })
}
