//! Keyed mutual exclusion: one async mutex per poll id, created on demand and
//! dropped again once nobody holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::warn;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::error::PollError;

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

pub struct PollLocks {
    table: LockTable,
    timeout: Duration,
}

/// Held for the whole of one poll mutation. Releases on drop.
pub struct PollGuard {
    poll_id: String,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PollLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Waits up to the configured timeout for exclusive access to `poll_id`.
    pub async fn acquire(&self, poll_id: &str) -> Result<PollGuard, PollError> {
        // Evicts on every way out of here, including the caller dropping this future.
        let (_waiter, slot) = SlotRef::take(&self.table, poll_id);

        let acquired = timeout(self.timeout, slot.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(PollGuard {
                poll_id: poll_id.to_string(),
                table: Arc::clone(&self.table),
                guard: Some(guard),
            }),
            Err(_) => {
                warn!("Timed out after {:?} waiting for poll {}", self.timeout, poll_id);
                Err(PollError::Busy)
            }
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        lock_table(&self.table).len()
    }
}

/// Stands for a waiter's claim on a slot; dropping it gives the slot back.
struct SlotRef<'a> {
    table: &'a LockTable,
    poll_id: &'a str,
}

impl<'a> SlotRef<'a> {
    fn take(table: &'a LockTable, poll_id: &'a str) -> (Self, Arc<AsyncMutex<()>>) {
        // Slots are only cloned while the table is locked, which keeps eviction exact.
        let slot = Arc::clone(lock_table(table).entry(poll_id.to_string()).or_default());
        (Self { table, poll_id }, slot)
    }
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        evict_if_idle(self.table, self.poll_id);
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        // Release first, then see whether anyone else still references the slot.
        self.guard.take();
        evict_if_idle(&self.table, &self.poll_id);
    }
}

fn lock_table(table: &LockTable) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    // The map holds no invariants a panicking holder could break.
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn evict_if_idle(table: &LockTable, poll_id: &str) {
    let mut table = lock_table(table);
    if table.get(poll_id).is_some_and(|slot| Arc::strong_count(slot) == 1) {
        table.remove(poll_id);
    }
}
