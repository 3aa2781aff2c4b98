//! Generic at-least-once dispatch queue.
//!
//! Items move `pending -> in flight` on dequeue and back on sweep if
//! unacknowledged past the retry timeout. One mutex guards both sides,
//! so no item is ever counted as pending and in flight at once, and an
//! acknowledge that lands before a sweep observes the item always wins.
//! Observation hooks run after the lock is released.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Processing state of a retry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Queued,
    InFlight,
}

/// A payload tracked until acknowledged or re-queued after timeout.
#[derive(Debug, Clone)]
pub struct RetryRecord<T> {
    /// Unique record id (uuid v4).
    pub id: String,
    /// Identifier of the producer that enqueued the payload.
    pub owner: String,
    pub payload: T,
    /// Number of re-queues; zero until the first sweep reclaims it.
    pub attempts: u32,
    pub state: RecordState,
    /// Set on each handoff; a sweep compares against it.
    handed_off_at: Option<Instant>,
}

/// Counts for observability. `acknowledged` is a lifetime counter,
/// not a retained set; settled records are dropped outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub in_flight: usize,
    pub acknowledged: usize,
}

/// Observer interface, fixed at construction time. One method per
/// queue event; default implementations are no-ops.
pub trait QueueObserver<T>: Send + Sync {
    fn on_enqueued(&self, _record: &RetryRecord<T>) {}
    fn on_retry(&self, _record: &RetryRecord<T>) {}
    fn on_acknowledged(&self, _record: &RetryRecord<T>) {}
}

struct QueueInner<T> {
    pending: VecDeque<RetryRecord<T>>,
    in_flight: HashMap<String, RetryRecord<T>>,
    acknowledged: usize,
}

impl<T> Default for QueueInner<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            acknowledged: 0,
        }
    }
}

/// At-least-once delivery queue, generic over the payload.
pub struct RetryQueue<T> {
    inner: Mutex<QueueInner<T>>,
    retry_timeout: Duration,
    observer: Option<Arc<dyn QueueObserver<T>>>,
}

impl<T: Clone> RetryQueue<T> {
    pub fn new(retry_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            retry_timeout,
            observer: None,
        }
    }

    pub fn with_observer(retry_timeout: Duration, observer: Arc<dyn QueueObserver<T>>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            retry_timeout,
            observer: Some(observer),
        }
    }

    /// Append a payload to the pending sequence; returns the record id.
    pub async fn enqueue(&self, owner: impl Into<String>, payload: T) -> String {
        let record = RetryRecord {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            payload,
            attempts: 0,
            state: RecordState::Queued,
            handed_off_at: None,
        };
        let id = record.id.clone();

        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.pending.push_back(record.clone());
            record
        };

        if let Some(observer) = &self.observer {
            observer.on_enqueued(&snapshot);
        }
        id
    }

    /// Pop the oldest pending record and mark it in flight with a fresh
    /// handoff timestamp. `None` when nothing is pending.
    pub async fn dequeue(&self) -> Option<RetryRecord<T>> {
        let mut inner = self.inner.lock().await;
        let mut record = inner.pending.pop_front()?;
        record.state = RecordState::InFlight;
        record.handed_off_at = Some(Instant::now());
        inner.in_flight.insert(record.id.clone(), record.clone());
        Some(record)
    }

    /// Mark an in-flight record as permanently acknowledged.
    ///
    /// Returns `false` for unknown or already-acknowledged ids; a
    /// duplicate acknowledgment is a harmless no-op, not an error.
    pub async fn acknowledge(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().await;
            match inner.in_flight.remove(id) {
                Some(record) => {
                    inner.acknowledged += 1;
                    Some(record)
                }
                None => None,
            }
        };

        match removed {
            Some(record) => {
                debug!(id, owner = %record.owner, "retry record acknowledged");
                if let Some(observer) = &self.observer {
                    observer.on_acknowledged(&record);
                }
                true
            }
            None => false,
        }
    }

    /// Re-queue every in-flight record whose handoff is older than the
    /// retry timeout, incrementing its attempt counter once. Returns
    /// the reclaimed batch. Hooks fire after the lock is released.
    pub async fn sweep_expired(&self, now: Instant) -> Vec<RetryRecord<T>> {
        let requeued = {
            let mut inner = self.inner.lock().await;
            let expired: Vec<String> = inner
                .in_flight
                .iter()
                .filter(|(_, record)| {
                    record
                        .handed_off_at
                        .is_some_and(|at| now.saturating_duration_since(at) > self.retry_timeout)
                })
                .map(|(id, _)| id.clone())
                .collect();

            let mut batch = Vec::with_capacity(expired.len());
            for id in expired {
                if let Some(mut record) = inner.in_flight.remove(&id) {
                    record.attempts += 1;
                    record.state = RecordState::Queued;
                    record.handed_off_at = Some(now);
                    inner.pending.push_back(record.clone());
                    batch.push(record);
                }
            }
            batch
        };

        if let Some(observer) = &self.observer {
            for record in &requeued {
                observer.on_retry(record);
            }
        }
        requeued
    }

    /// Current queue counters.
    pub async fn status(&self) -> QueueStatus {
        let inner = self.inner.lock().await;
        QueueStatus {
            queued: inner.pending.len(),
            in_flight: inner.in_flight.len(),
            acknowledged: inner.acknowledged,
        }
    }

    pub fn retry_timeout(&self) -> Duration {
        self.retry_timeout
    }
}
