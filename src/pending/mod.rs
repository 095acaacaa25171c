//! Keyed registry of operations awaiting an out-of-band resolution.
//!
//! Each operation is settled exactly once by whichever comes first: an
//! external `resolve`/`reject`, its TTL timer, or `cancel_all`. Settlement
//! removes the entry immediately, so a later `create_or_await` with the same
//! key starts a fresh operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// How a pending operation settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome<T> {
    Resolved(T),
    Rejected(String),
    TimedOut,
    Canceled(String),
}

type Slot<T> = Option<PendingOutcome<T>>;

struct Entry<T> {
    tx: watch::Sender<Slot<T>>,
    created_at: Instant,
    ttl: Duration,
    generation: u64,
    timer: Option<AbortHandle>,
}

struct Inner<T> {
    entries: HashMap<String, Entry<T>>,
    next_generation: u64,
}

/// Handle to one waiter on a pending operation.
#[derive(Debug)]
pub struct PendingHandle<T> {
    key: String,
    created: bool,
    ttl: Duration,
    rx: watch::Receiver<Slot<T>>,
}

impl<T: Clone> PendingHandle<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True for the call that created the operation, false for joiners.
    pub fn is_new(&self) -> bool {
        self.created
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Suspend until the operation settles.
    pub async fn wait(mut self) -> PendingOutcome<T> {
        let settled = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|slot| slot.clone())
            .ok()
            .flatten();
        match settled {
            Some(outcome) => outcome,
            // Sender dropped without a value: the registry itself went away.
            None => self
                .rx
                .borrow()
                .clone()
                .unwrap_or_else(|| PendingOutcome::Canceled("registry dropped".into())),
        }
    }
}

/// Registry of in-flight operations keyed by correlation id.
///
/// Cloning yields another handle to the same registry.
pub struct PendingOperationRegistry<T> {
    name: &'static str,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for PendingOperationRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for PendingOperationRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperationRegistry")
            .field("name", &self.name)
            .finish()
    }
}

impl<T> PendingOperationRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// `name` only labels log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        lock_inner(&self.inner)
    }

    /// Join the live operation for `key`, or create one that times out after
    /// `ttl`. Must be called from within a tokio runtime.
    pub fn create_or_await(&self, key: &str, ttl: Duration) -> PendingHandle<T> {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get(key) {
            tracing::debug!(registry = self.name, key, "joining pending operation");
            return PendingHandle {
                key: key.to_string(),
                created: false,
                ttl: entry.ttl,
                rx: entry.tx.subscribe(),
            };
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let (tx, rx) = watch::channel(None);

        let weak = Arc::downgrade(&self.inner);
        let timer_key = key.to_string();
        let name = self.name;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if settle_weak(&weak, &timer_key, Some(generation), PendingOutcome::TimedOut) {
                tracing::warn!(
                    registry = name,
                    key = %timer_key,
                    ttl_ms = ttl.as_millis() as u64,
                    "pending operation timed out"
                );
            }
        });

        inner.entries.insert(
            key.to_string(),
            Entry {
                tx,
                created_at: Instant::now(),
                ttl,
                generation,
                timer: Some(timer.abort_handle()),
            },
        );
        tracing::debug!(registry = self.name, key, generation, "pending operation created");

        PendingHandle {
            key: key.to_string(),
            created: true,
            ttl,
            rx,
        }
    }

    /// Settle `key` with a value. Returns false when nothing was pending.
    pub fn resolve(&self, key: &str, value: T) -> bool {
        self.settle(key, PendingOutcome::Resolved(value))
    }

    /// Settle `key` as rejected. Returns false when nothing was pending.
    pub fn reject(&self, key: &str, reason: impl Into<String>) -> bool {
        self.settle(key, PendingOutcome::Rejected(reason.into()))
    }

    fn settle(&self, key: &str, outcome: PendingOutcome<T>) -> bool {
        let settled = settle_locked(&mut self.lock(), key, None, outcome);
        if settled {
            tracing::debug!(registry = self.name, key, "pending operation settled");
        } else {
            tracing::debug!(registry = self.name, key, "settle ignored: nothing pending");
        }
        settled
    }

    /// Settle every live operation as canceled. Returns how many were live.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, Entry<T>)> = self.lock().entries.drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            entry
                .tx
                .send_replace(Some(PendingOutcome::Canceled(reason.to_string())));
        }
        if count > 0 {
            tracing::debug!(registry = self.name, count, reason, "pending operations canceled");
        }
        count
    }

    /// How long the live operation for `key` has been pending.
    pub fn age(&self, key: &str) -> Option<Duration> {
        self.lock()
            .entries
            .get(key)
            .map(|entry| entry.created_at.elapsed())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Live keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.lock();
        let mut keys: Vec<(&String, u64)> = inner
            .entries
            .iter()
            .map(|(key, entry)| (key, entry.generation))
            .collect();
        keys.sort_by_key(|(_, generation)| *generation);
        keys.into_iter().map(|(key, _)| key.clone()).collect()
    }
}

fn lock_inner<T>(inner: &Mutex<Inner<T>>) -> MutexGuard<'_, Inner<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn settle_weak<T>(
    inner: &Weak<Mutex<Inner<T>>>,
    key: &str,
    generation: Option<u64>,
    outcome: PendingOutcome<T>,
) -> bool {
    match inner.upgrade() {
        Some(inner) => settle_locked(&mut lock_inner(&inner), key, generation, outcome),
        None => false,
    }
}

/// Remove and settle `key`. With `generation` set, only the operation of that
/// generation may be settled (stale timers never touch a reused key).
fn settle_locked<T>(
    inner: &mut Inner<T>,
    key: &str,
    generation: Option<u64>,
    outcome: PendingOutcome<T>,
) -> bool {
    let matches = inner
        .entries
        .get(key)
        .is_some_and(|entry| generation.map_or(true, |g| g == entry.generation));
    if !matches {
        return false;
    }
    let Some(entry) = inner.entries.remove(key) else {
        return false;
    };
    if generation.is_none() {
        if let Some(timer) = entry.timer {
            timer.abort();
        }
    }
    entry.tx.send_replace(Some(outcome));
    true
}
