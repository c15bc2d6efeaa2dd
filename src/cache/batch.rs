//! Request coalescing in front of `getMultipleAccounts`.
//!
//! Keys requested within one debounce window share a single round trip. The
//! batch is swapped for an empty one the moment it is dispatched, so requests
//! arriving while the network call is in flight open a new batch instead of
//! waiting behind it.

use std::collections::{hash_map::Entry, HashMap};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use futures::future::try_join_all;
use log::{debug, trace, warn};
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};
use tokio::sync::oneshot;

use crate::error::{CacheError, CacheResult};
use crate::source::AccountSource;

pub type FetchOutcome = CacheResult<Option<Account>>;

/// Issues one multi-key read, split into `chunk_size` pieces.
pub struct BatchedFetcher<S> {
    source: Arc<S>,
    chunk_size: usize,
    commitment: CommitmentConfig,
    timeout: Option<Duration>,
}

impl<S: AccountSource> BatchedFetcher<S> {
    pub fn new(
        source: Arc<S>,
        chunk_size: usize,
        commitment: CommitmentConfig,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            commitment,
            timeout,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Results are parallel to `keys`.
    pub async fn fetch(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let calls = keys
            .chunks(self.chunk_size)
            .map(|chunk| self.source.fetch_many(chunk, self.commitment));
        let joined = try_join_all(calls);
        let chunks = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, joined)
                .await
                .map_err(|_| anyhow!("getMultipleAccounts timed out after {limit:?}"))??,
            None => joined.await?,
        };

        let results: Vec<Option<Account>> = chunks.into_iter().flatten().collect();
        ensure!(
            results.len() == keys.len(),
            "source returned {} results for {} keys",
            results.len(),
            keys.len()
        );
        Ok(results)
    }
}

#[derive(Default)]
struct BatchState {
    keys: Vec<Pubkey>,
    waiters: HashMap<Pubkey, Vec<oneshot::Sender<FetchOutcome>>>,
    /// Bumped on every arm and every dispatch; a timer only fires for the
    /// generation it was armed with.
    generation: u64,
}

struct Batch {
    keys: Vec<Pubkey>,
    waiters: HashMap<Pubkey, Vec<oneshot::Sender<FetchOutcome>>>,
}

impl BatchState {
    fn take(&mut self) -> Batch {
        self.generation += 1;
        Batch {
            keys: mem::take(&mut self.keys),
            waiters: mem::take(&mut self.waiters),
        }
    }
}

pub struct RequestCoalescer<S> {
    fetcher: BatchedFetcher<S>,
    delay: Duration,
    state: Mutex<BatchState>,
}

impl<S: AccountSource> RequestCoalescer<S> {
    pub fn new(fetcher: BatchedFetcher<S>, delay: Duration) -> Self {
        Self {
            fetcher,
            delay,
            state: Mutex::new(BatchState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of distinct keys waiting in the open batch.
    pub fn pending_len(&self) -> usize {
        self.lock().keys.len()
    }

    /// Joins `key` to the open batch. The batch is dispatched right away once
    /// it holds `chunk_size` keys, otherwise the debounce timer is re-armed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_to_batch(self: &Arc<Self>, key: Pubkey) -> oneshot::Receiver<FetchOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.lock();
        let state = &mut *guard;
        match state.waiters.entry(key) {
            Entry::Occupied(mut waiting) => waiting.get_mut().push(tx),
            Entry::Vacant(slot) => {
                slot.insert(vec![tx]);
                state.keys.push(key);
            }
        }

        if state.keys.len() >= self.fetcher.chunk_size() {
            let batch = state.take();
            drop(guard);
            trace!("[BATCH] chunk full ({} keys), dispatching now", batch.keys.len());
            let this = self.clone();
            tokio::spawn(async move { this.run(batch).await });
        } else {
            state.generation += 1;
            let generation = state.generation;
            drop(guard);
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(this.delay).await;
                this.fire(generation).await;
            });
        }
        rx
    }

    async fn fire(&self, generation: u64) {
        let batch = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.take()
        };
        self.run(batch).await;
    }

    /// Swaps out the open batch and services it with one fetch.
    pub async fn fetch_batch(&self) {
        let batch = self.lock().take();
        self.run(batch).await;
    }

    /// Cancels the debounce timer and fetches the open batch immediately.
    pub async fn flush(&self) {
        self.fetch_batch().await;
    }

    /// Drops the open batch; its waiters observe a cancelled fetch.
    pub fn cancel(&self) -> usize {
        let batch = self.lock().take();
        batch.keys.len()
    }

    async fn run(&self, mut batch: Batch) {
        if batch.keys.is_empty() {
            return;
        }
        debug!("📦 [BATCH] fetching {} accounts", batch.keys.len());

        match self.fetcher.fetch(&batch.keys).await {
            Ok(results) => {
                for (key, result) in batch.keys.iter().zip(results) {
                    for waiter in batch.waiters.remove(key).unwrap_or_default() {
                        let _ = waiter.send(Ok(result.clone()));
                    }
                }
            }
            Err(e) => {
                warn!("⚠️ [BATCH] fetch of {} accounts failed: {:#}", batch.keys.len(), e);
                let err = CacheError::batch_fetch(e);
                for waiter in batch.waiters.into_values().flatten() {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }
}
