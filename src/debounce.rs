use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::ApiResult;

/// Outbound side of a [`Debouncer`]: receives the last value set for a key
/// once that key has been quiet for the configured delay.
#[async_trait]
pub trait DebounceSender<K, V>: Send + Sync + 'static {
    async fn send(&self, key: K, value: V) -> ApiResult<()>;
}

struct Pending<V> {
    value: V,
    generation: u64,
    timer: JoinHandle<()>,
}

struct Slots<K, V> {
    next_generation: u64,
    pending: HashMap<K, Pending<V>>,
}

struct Inner<K, V> {
    name: &'static str,
    delay: Duration,
    sender: Arc<dyn DebounceSender<K, V>>,
    runtime: Handle,
    slots: Mutex<Slots<K, V>>,
}

/// Per-key coalescing timer.
///
/// At most one timer exists per key. Every [`set`](Self::set) replaces the
/// stored value and restarts that key's timer; when it elapses the sender is
/// called once with the latest value. Send failures are logged and dropped.
///
/// Timers run on the runtime the debouncer was created in, so `set` may be
/// called from any thread.
pub struct Debouncer<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Debouncer<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Must be called from within a tokio runtime.
    pub fn new(
        name: &'static str,
        delay: Duration,
        sender: Arc<dyn DebounceSender<K, V>>,
    ) -> ApiResult<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                delay,
                sender,
                runtime: Handle::try_current()?,
                slots: Mutex::new(Slots {
                    next_generation: 0,
                    pending: HashMap::new(),
                }),
            }),
        })
    }

    fn slots(&self) -> MutexGuard<'_, Slots<K, V>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` for `key` and (re)start its timer. Never sends directly.
    pub fn set(&self, key: K, value: V) {
        let mut slots = self.slots();
        slots.next_generation += 1;
        let generation = slots.next_generation;

        if let Some(old) = slots.pending.remove(&key) {
            old.timer.abort();
        }

        // the timer cannot observe the map before this insert: it needs the
        // lock we are holding
        let timer = self
            .inner
            .runtime
            .spawn(Self::fire(self.inner.clone(), key.clone(), generation));
        slots.pending.insert(
            key,
            Pending {
                value,
                generation,
                timer,
            },
        );
    }

    /// Forget a pending value without sending it. Returns true if one existed.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self.slots().pending.remove(key);
        removed.map(|old| old.timer.abort()).is_some()
    }

    pub fn cancel_all(&self) {
        let mut slots = self.slots();
        for (_, old) in slots.pending.drain() {
            old.timer.abort();
        }
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.slots().pending.contains_key(key)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots().pending.len()
    }

    async fn fire(inner: Arc<Inner<K, V>>, key: K, generation: u64) {
        tokio::time::sleep(inner.delay).await;

        let value = {
            let mut slots = inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.pending.get(&key) {
                Some(pending) if pending.generation == generation => {}
                // superseded between wakeup and lock
                _ => return,
            }
            match slots.pending.remove(&key) {
                Some(pending) => pending.value,
                None => return,
            }
        };

        log::trace!("[{}] Sending debounced value for {key:?}", inner.name);
        if let Err(err) = inner.sender.send(key.clone(), value).await {
            log::warn!("[{}] Debounced send for {key:?} failed: {err}", inner.name);
        }
    }
}
