//! # Product Locks
//!
//! In-process, per-product exclusive locks with a bounded wait.
//!
//! ## Lock Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  process_sale(["p-9", "p-2", "p-9"])                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  sort + dedup ──► ["p-2", "p-9"]                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  lock p-2 ──► lock p-9        (both within one deadline)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ProductLockSet held ──► pool.begin() ... commit                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  drop(ProductLockSet) releases every lock, prunes idle entries         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every caller acquires in ascending product id order, so two requests
//! touching overlapping products can never wait on each other in a cycle.
//! Unrelated products never contend.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Registry of per-product locks.
///
/// Cloning shares the registry. The map itself is only locked long enough
/// to look up, insert or prune an entry; waiting happens on the product's
/// own async mutex. An entry lives only while some task holds or awaits it.
#[derive(Debug, Clone, Default)]
pub struct ProductLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Guards for a set of products. Dropping it releases all of them.
#[derive(Debug)]
pub struct ProductLockSet {
    registry: ProductLocks,
    product_ids: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl ProductLockSet {
    /// Locked product ids, ascending.
    pub fn product_ids(&self) -> &[String] {
        &self.product_ids
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.product_ids
            .binary_search_by(|id| id.as_str().cmp(product_id))
            .is_ok()
    }
}

impl Drop for ProductLockSet {
    fn drop(&mut self) {
        self.guards.clear();
        self.registry.prune(&self.product_ids);
    }
}

impl ProductLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, product_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(product_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Removes entries nobody holds or waits on.
    ///
    /// Handing out a clone happens under the same map lock, so a count of
    /// one means the map owns the only reference.
    fn prune(&self, product_ids: &[String]) {
        let mut locks = self.locks.lock();
        for product_id in product_ids {
            if locks
                .get(product_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(product_id);
            }
        }
    }

    /// Acquires the locks of `product_ids` in ascending order, each once.
    ///
    /// The whole acquisition shares one deadline, `timeout` from the call.
    /// On expiry the locks taken so far are released and
    /// `DbError::LockTimeout` names the product that could not be locked.
    pub async fn acquire<I, S>(&self, product_ids: I, timeout: Duration) -> DbResult<ProductLockSet>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ordered: BTreeSet<String> = product_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();

        // Built up front so an early return or a cancelled wait prunes too.
        let mut set = ProductLockSet {
            registry: self.clone(),
            guards: Vec::with_capacity(ordered.len()),
            product_ids: ordered.into_iter().collect(),
        };

        let started = Instant::now();
        let deadline = tokio::time::Instant::from_std(started) + timeout;

        for product_id in &set.product_ids {
            let lock = self.lock_for(product_id);

            match tokio::time::timeout_at(deadline, lock.lock_owned()).await {
                Ok(guard) => {
                    debug!(
                        product_id = %product_id,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Product lock acquired"
                    );
                    set.guards.push(guard);
                }
                Err(_) => {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    warn!(product_id = %product_id, waited_ms, "Product lock wait timed out");
                    return Err(DbError::LockTimeout {
                        product_id: product_id.clone(),
                        waited_ms,
                    });
                }
            }
        }

        Ok(set)
    }

    /// Number of products currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
