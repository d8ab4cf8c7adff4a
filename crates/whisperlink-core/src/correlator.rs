//! Pending-operation table correlating asynchronous replies to requests
//!
//! Components that send a request and must await the matching reply register
//! the correlation id here, send, then await the returned handle. The reply
//! path calls [`ResponseCorrelator::resolve`] when a response arrives. Each
//! entry's slot is write-once: the first resolution wins, later ones are
//! logged and discarded, and a deadline bounds every wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{LinkError, LinkResult};

struct PendingEntry<T> {
    token: u64,
    deadline: Instant,
    slot: oneshot::Sender<T>,
}

/// Table of in-flight operations keyed by correlation id
pub struct ResponseCorrelator<T> {
    pending: Arc<Mutex<HashMap<String, PendingEntry<T>>>>,
    next_token: Arc<AtomicU64>,
}

impl<T> Clone for ResponseCorrelator<T> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            next_token: self.next_token.clone(),
        }
    }
}

impl<T> Default for ResponseCorrelator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T: Send + 'static> ResponseCorrelator<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending operation and get the handle to await
    ///
    /// Registering an id that is already pending replaces the old entry;
    /// the superseded awaiter observes a closed slot.
    pub fn register(&self, correlation_id: impl Into<String>, timeout: Duration) -> PendingReply<T> {
        let correlation_id = correlation_id.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        let replaced = self.pending.lock().insert(
            correlation_id.clone(),
            PendingEntry {
                token,
                deadline,
                slot: tx,
            },
        );
        if replaced.is_some() {
            warn!(%correlation_id, "replaced pending operation with the same correlation id");
        }
        PendingReply {
            correlation_id,
            token,
            deadline,
            rx,
            correlator: self.clone(),
        }
    }

    /// Deliver a value to the pending operation with this id
    ///
    /// Returns true if a pending entry was found and the awaiter notified.
    /// Resolutions arriving after the entry was purged (timeout, sweep, or
    /// an earlier resolution) are discarded with a log line; the sender is
    /// not told, it already got its answer or gave up.
    pub fn resolve(&self, correlation_id: &str, value: T) -> bool {
        let entry = self.pending.lock().remove(correlation_id);
        match entry {
            Some(entry) => {
                if entry.slot.send(value).is_ok() {
                    true
                } else {
                    debug!(correlation_id, "awaiter gone before resolution");
                    false
                }
            }
            None => {
                warn!(correlation_id, "discarding resolution with no pending operation");
                false
            }
        }
    }

    /// Drop entries that are past their deadline or whose awaiter is gone
    ///
    /// Awaiters normally purge their own entry when their timeout fires;
    /// this catches handles that were dropped without being awaited.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|id, entry| {
            let keep = entry.deadline > now && !entry.slot.is_closed();
            if !keep {
                debug!(correlation_id = %id, "sweeping stale pending operation");
            }
            keep
        });
        before - pending.len()
    }

    /// Number of in-flight operations
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Remove the entry for this handle, but only if it still belongs to it
    fn purge(&self, correlation_id: &str, token: u64) {
        let mut pending = self.pending.lock();
        if pending.get(correlation_id).is_some_and(|e| e.token == token) {
            pending.remove(correlation_id);
        }
    }
}

/// Handle to one registered operation; await it to get the reply
pub struct PendingReply<T> {
    correlation_id: String,
    token: u64,
    deadline: Instant,
    rx: oneshot::Receiver<T>,
    correlator: ResponseCorrelator<T>,
}

impl<T: Send + 'static> PendingReply<T> {
    /// The correlation id this handle is registered under
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Withdraw the registration without waiting
    ///
    /// Used when the request never made it out: nothing can resolve the
    /// entry, so leaving it for the sweep only delays cleanup.
    pub fn cancel(self) {
        self.correlator.purge(&self.correlation_id, self.token);
    }

    /// Wait for the reply, failing with a timeout error at the deadline
    pub async fn wait(self) -> LinkResult<T> {
        match tokio::time::timeout_at(self.deadline, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                // The slot closes under us when the entry is replaced, or
                // when the sweep wins the race to our own deadline.
                if Instant::now() >= self.deadline {
                    self.correlator.purge(&self.correlation_id, self.token);
                    Err(LinkError::Timeout(self.correlation_id))
                } else {
                    Err(LinkError::Correlation(format!(
                        "pending operation {} was superseded",
                        self.correlation_id
                    )))
                }
            }
            Err(_) => {
                self.correlator.purge(&self.correlation_id, self.token);
                Err(LinkError::Timeout(self.correlation_id))
            }
        }
    }
}
