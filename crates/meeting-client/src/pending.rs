//! Pending request table.
//!
//! Every signaling request that expects a response registers a correlation
//! key here *before* the request is emitted. Inbound responses resolve the
//! matching entry; responses with no entry are discarded by the caller.
//! One table exists per session generation and is cancelled in bulk when
//! the session is left.

use crate::errors::ClientError;
use common::types::{MediaKind, ProducerId, TransportDirection, TransportId};
use signaling_protocol::ConsumerCreated;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Correlation key of a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingKey {
    /// `connect_transport`, answered by `transport_connected` or
    /// `transport_connect_error`.
    TransportConnect {
        transport_id: TransportId,
        direction: TransportDirection,
    },
    /// `start_producing`, answered by `producer_created` or `producer_error`.
    Produce(MediaKind),
    /// `start_consuming`, answered by `consumer_created` or `consumer_error`.
    Consume(ProducerId),
}

impl PendingKey {
    /// Returns the request name for logs and metric labels.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            PendingKey::TransportConnect { .. } => "connect_transport",
            PendingKey::Produce(_) => "start_producing",
            PendingKey::Consume(_) => "start_consuming",
        }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingKey::TransportConnect {
                transport_id,
                direction,
            } => write!(f, "connect_transport({direction}:{transport_id})"),
            PendingKey::Produce(kind) => write!(f, "start_producing({kind})"),
            PendingKey::Consume(producer_id) => write!(f, "start_consuming({producer_id})"),
        }
    }
}

/// Successful response to a pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingReply {
    TransportConnected,
    Producer(ProducerId),
    Consumer(ConsumerCreated),
}

/// Outcome delivered to a waiter: the reply, or the server's error text.
pub type PendingResult = Result<PendingReply, String>;

/// Why waiting on a pending request ended without a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingError {
    /// No response within the timeout. The entry has been removed.
    TimedOut,
    /// The server answered with an error.
    Rejected(String),
    /// The entry was forgotten or the table was cancelled.
    Cancelled,
}

/// Receiving side of a registered request.
#[derive(Debug)]
pub struct PendingRequest {
    key: PendingKey,
    receiver: oneshot::Receiver<PendingResult>,
}

impl PendingRequest {
    #[must_use]
    pub fn key(&self) -> &PendingKey {
        &self.key
    }
}

#[derive(Default)]
struct TableState {
    entries: HashMap<PendingKey, oneshot::Sender<PendingResult>>,
    cancelled: bool,
}

/// Correlation table shared by the session actor and its request tasks.
#[derive(Default)]
pub struct PendingRequests {
    state: Mutex<TableState>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        // Entries stay consistent across a panicking holder; keep serving them
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a key before emitting its request.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Cancelled` once the table has been cancelled,
    /// and `ClientError::Internal` if the key is already pending.
    pub fn register(&self, key: PendingKey) -> Result<PendingRequest, ClientError> {
        let mut state = self.lock();
        if state.cancelled {
            return Err(ClientError::Cancelled);
        }
        if state.entries.contains_key(&key) {
            return Err(ClientError::Internal(format!("{key} is already pending")));
        }

        let (sender, receiver) = oneshot::channel();
        state.entries.insert(key.clone(), sender);
        Ok(PendingRequest { key, receiver })
    }

    /// Deliver a response. Returns `false` when nothing was waiting for it.
    pub fn resolve(&self, key: &PendingKey, result: PendingResult) -> bool {
        let sender = self.lock().entries.remove(key);
        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    /// Drop an entry without answering it. Its waiter sees `Cancelled`.
    pub fn forget(&self, key: &PendingKey) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Cancel every entry and refuse new registrations.
    ///
    /// Returns the number of entries that were pending.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock();
        state.cancelled = true;
        let count = state.entries.len();
        state.entries.clear();
        count
    }

    #[must_use]
    pub fn contains(&self, key: &PendingKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Wait for the response to a registered request.
    ///
    /// # Errors
    ///
    /// See [`PendingError`].
    pub async fn wait(
        &self,
        request: PendingRequest,
        timeout: Duration,
    ) -> Result<PendingReply, PendingError> {
        let PendingRequest { key, receiver } = request;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(reason))) => Err(PendingError::Rejected(reason)),
            Ok(Err(_)) => Err(PendingError::Cancelled),
            Err(_) => {
                self.forget(&key);
                Err(PendingError::TimedOut)
            }
        }
    }
}

impl fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("PendingRequests")
            .field("entries", &state.entries.len())
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn connect_key() -> PendingKey {
        PendingKey::TransportConnect {
            transport_id: "t-1".into(),
            direction: TransportDirection::Send,
        }
    }

    #[tokio::test]
    async fn test_resolve_delivers_reply() {
        let table = Arc::new(PendingRequests::new());
        let request = table.register(PendingKey::Produce(MediaKind::Audio)).unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.wait(request, Duration::from_secs(15)).await })
        };
        tokio::task::yield_now().await;

        assert!(table.resolve(
            &PendingKey::Produce(MediaKind::Audio),
            Ok(PendingReply::Producer("p-1".into()))
        ));

        assert_eq!(
            waiter.await.unwrap(),
            Ok(PendingReply::Producer("p-1".into()))
        );
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_rejection_is_reported() {
        let table = PendingRequests::new();
        let request = table.register(connect_key()).unwrap();

        table.resolve(&connect_key(), Err("dtls failed".to_string()));

        assert_eq!(
            table.wait(request, Duration::from_secs(15)).await,
            Err(PendingError::Rejected("dtls failed".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let table = PendingRequests::new();
        let request = table.register(PendingKey::Consume("p-9".into())).unwrap();

        let result = table.wait(request, Duration::from_secs(15)).await;

        assert_eq!(result, Err(PendingError::TimedOut));
        assert!(!table.contains(&PendingKey::Consume("p-9".into())));
        // A late response is now unmatched
        assert!(!table.resolve(
            &PendingKey::Consume("p-9".into()),
            Ok(PendingReply::TransportConnected)
        ));
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let table = PendingRequests::new();
        let _first = table.register(PendingKey::Produce(MediaKind::Video)).unwrap();

        let err = table.register(PendingKey::Produce(MediaKind::Video)).unwrap_err();
        assert!(matches!(err, ClientError::Internal(_)));
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_waiters_and_closes_table() {
        let table = PendingRequests::new();
        let request = table.register(connect_key()).unwrap();
        let _other = table.register(PendingKey::Produce(MediaKind::Audio)).unwrap();

        assert_eq!(table.cancel_all(), 2);

        assert_eq!(
            table.wait(request, Duration::from_secs(15)).await,
            Err(PendingError::Cancelled)
        );
        assert!(table.is_cancelled());
        assert!(matches!(
            table.register(PendingKey::Produce(MediaKind::Video)),
            Err(ClientError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_forget_cancels_single_entry() {
        let table = PendingRequests::new();
        let abandoned = table.register(PendingKey::Consume("p-1".into())).unwrap();
        let _kept = table.register(PendingKey::Consume("p-2".into())).unwrap();

        assert!(table.forget(&PendingKey::Consume("p-1".into())));

        assert_eq!(
            table.wait(abandoned, Duration::from_secs(15)).await,
            Err(PendingError::Cancelled)
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(
            connect_key().to_string(),
            "connect_transport(send:t-1)"
        );
        assert_eq!(PendingKey::Consume("p-3".into()).operation(), "start_consuming");
    }
}
