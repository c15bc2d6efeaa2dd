//! Read-through account cache with request coalescing and live updates.
//!
//! Every consumer funnels its account reads through one [`AccountFetchCache`]
//! per application root. A miss joins the open batch of the
//! [`RequestCoalescer`]; once the batch resolves the account is either
//! watched through a push subscription (it exists) or parked in the missing
//! set and re-polled (it does not exist yet).
//!
//! Updates from polls, pushes and explicit [`AccountFetchCache::add`] calls
//! are applied in arrival order: the last one to land wins, there is no slot
//! comparison between them.

pub mod batch;
pub mod events;
pub mod parser;
mod poller;
pub mod store;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, OnceLock, PoisonError, Weak,
};
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use futures::{
    future::{join_all, BoxFuture, Shared},
    FutureExt,
};
use log::{debug, info, trace, warn};
use solana_sdk::{account::Account, pubkey::Pubkey};
use tokio::task::JoinHandle;

pub use batch::{BatchedFetcher, RequestCoalescer};
pub use events::{CacheEvent, EventEmitter, ListenerId};
pub use parser::{ParsedAccount, Parser, Undecoded};
pub use store::CacheStore;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::source::{AccountCallback, AccountSource, CloseCallback, SubscriptionHandle};

type Resolved<T> = CacheResult<Option<Arc<ParsedAccount<T>>>>;
type SharedFetch<T> = Shared<BoxFuture<'static, Resolved<T>>>;

struct PendingFetch<T> {
    id: u64,
    fetch: SharedFetch<T>,
}

struct Inner<T, S: AccountSource> {
    config: CacheConfig,
    source: Arc<S>,
    store: CacheStore<T>,
    coalescer: Arc<RequestCoalescer<S>>,
    /// key -> the one fetch currently in flight for it
    pending: DashMap<Pubkey, PendingFetch<T>>,
    subscriptions: DashMap<Pubkey, SubscriptionHandle>,
    /// keys confirmed absent, with the parser to use once they appear
    missing: DashMap<Pubkey, Option<Parser<T>>>,
    statics: DashSet<Pubkey>,
    next_fetch_id: AtomicU64,
    closed: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
    raw_parser: OnceLock<Parser<T>>,
}

impl<T, S: AccountSource> Inner<T, S> {
    fn teardown(&self) -> usize {
        if let Some(poller) = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take() {
            poller.abort();
        }
        let handles: Vec<SubscriptionHandle> = self.subscriptions.iter().map(|e| *e.value()).collect();
        self.subscriptions.clear();
        for handle in &handles {
            self.source.unsubscribe(*handle);
        }
        handles.len()
    }
}

impl<T, S: AccountSource> Drop for Inner<T, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Cheap to clone; all clones share the same cache.
pub struct AccountFetchCache<T, S: AccountSource> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S: AccountSource> Clone for AccountFetchCache<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Non-owning handle, for callbacks that must not keep the cache alive.
pub struct WeakCache<T, S: AccountSource>(Weak<Inner<T, S>>);

impl<T, S: AccountSource> Clone for WeakCache<T, S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T, S: AccountSource> WeakCache<T, S> {
    pub fn upgrade(&self) -> Option<AccountFetchCache<T, S>> {
        self.0.upgrade().map(|inner| AccountFetchCache { inner })
    }
}

impl<T, S> AccountFetchCache<T, S>
where
    T: Send + Sync + 'static,
    S: AccountSource,
{
    /// Builds the cache and starts the missing-account poller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(source: Arc<S>, config: CacheConfig) -> Self {
        let fetcher = BatchedFetcher::new(
            source.clone(),
            config.chunk_size,
            config.commitment(),
            config.fetch_timeout(),
        );
        let coalescer = Arc::new(RequestCoalescer::new(fetcher, config.delay()));
        let period = config.missing_refetch_delay().max(Duration::from_millis(1));

        let inner = Arc::new(Inner {
            config,
            source,
            store: CacheStore::new(),
            coalescer,
            pending: DashMap::new(),
            subscriptions: DashMap::new(),
            missing: DashMap::new(),
            statics: DashSet::new(),
            next_fetch_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            poller: Mutex::new(None),
            raw_parser: OnceLock::new(),
        });

        let poller = poller::spawn_missing_poller(WeakCache(Arc::downgrade(&inner)), period);
        *inner.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(poller);

        debug!(
            "[CACHE] created: chunk_size={}, delay={:?}, missing poll every {:?}",
            inner.config.chunk_size,
            inner.config.delay(),
            period
        );
        Self { inner }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn source(&self) -> &Arc<S> {
        &self.inner.source
    }

    pub fn emitter(&self) -> &EventEmitter<T> {
        self.inner.store.emitter()
    }

    pub fn downgrade(&self) -> WeakCache<T, S> {
        WeakCache(Arc::downgrade(&self.inner))
    }

    // ---------------------------------------------------------------
    // store access
    // ---------------------------------------------------------------

    /// Cached entry, without touching the network.
    pub fn get(&self, key: &Pubkey) -> Option<Arc<ParsedAccount<T>>> {
        self.inner.store.get(key)
    }

    /// Decodes and stores `account`; see [`CacheStore::add`].
    pub fn add(
        &self,
        key: Pubkey,
        account: Account,
        parser: Option<Parser<T>>,
    ) -> CacheResult<Option<Arc<ParsedAccount<T>>>> {
        self.inner.store.add(key, account, parser, None)
    }

    /// Like [`add`](Self::add); `is_active` decides the `is_active` flag of
    /// the emitted update.
    pub fn add_with_predicate<F>(
        &self,
        key: Pubkey,
        account: Account,
        parser: Option<Parser<T>>,
        is_active: F,
    ) -> CacheResult<Option<Arc<ParsedAccount<T>>>>
    where
        F: Fn(&ParsedAccount<T>) -> bool,
    {
        self.inner.store.add(key, account, parser, Some(&is_active))
    }

    /// Tears down the key's subscription, then drops the entry. Returns
    /// whether a decoded entry was removed.
    pub fn delete(&self, key: &Pubkey) -> bool {
        if let Some((_, handle)) = self.inner.subscriptions.remove(key) {
            self.inner.source.unsubscribe(handle);
            debug!("[WATCH] {} unsubscribed {}", handle, key);
        }
        self.inner.missing.remove(key);
        // an in-flight fetch for the key resolves as stale
        self.inner.pending.remove(key);
        self.inner.store.remove(key)
    }

    pub fn by_parser(&self, parser: &Parser<T>) -> Vec<Pubkey> {
        self.inner.store.by_parser(parser)
    }

    // ---------------------------------------------------------------
    // read path
    // ---------------------------------------------------------------

    /// Cached entry, or one coalesced fetch for it.
    ///
    /// Never fails: fetch or decode errors are logged and reported as `None`,
    /// just like an account that does not exist. Absent accounts are cached
    /// as such and re-polled in the background rather than re-fetched here.
    pub async fn search(
        &self,
        key: Pubkey,
        parser: Option<Parser<T>>,
        is_static: bool,
    ) -> Option<Arc<ParsedAccount<T>>> {
        if is_static {
            self.inner.statics.insert(key);
        }
        if let Some(cached) = self.inner.store.lookup(&key) {
            if let (None, Some(parser)) = (&cached, &parser) {
                self.adopt_missing_parser(key, parser);
            }
            return cached;
        }
        if self.is_closed() {
            return None;
        }

        match self.fetch(key, parser).await {
            Ok(found) => found,
            Err(CacheError::Cancelled(_)) => None,
            Err(e) => {
                warn!("⚠️ [CACHE] search {} failed: {}", key, e);
                None
            }
        }
    }

    /// [`search`](Self::search) giving up after `deadline`. Other callers
    /// sharing the same fetch are unaffected.
    pub async fn search_with_deadline(
        &self,
        key: Pubkey,
        parser: Option<Parser<T>>,
        is_static: bool,
        deadline: Duration,
    ) -> Option<Arc<ParsedAccount<T>>> {
        match tokio::time::timeout(deadline, self.search(key, parser, is_static)).await {
            Ok(found) => found,
            Err(_) => {
                debug!("[CACHE] search {} gave up after {:?}", key, deadline);
                None
            }
        }
    }

    /// Strict variant of [`search`](Self::search): an absent account is a
    /// [`CacheError::NotFound`], fetch and decode errors are returned.
    pub async fn query(&self, key: Pubkey, parser: Option<Parser<T>>) -> CacheResult<Arc<ParsedAccount<T>>> {
        match self.inner.store.lookup(&key) {
            Some(Some(found)) => return Ok(found),
            Some(None) => {
                if let Some(parser) = &parser {
                    self.adopt_missing_parser(key, parser);
                }
                return Err(CacheError::NotFound(key));
            }
            None => {}
        }
        if self.is_closed() {
            return Err(CacheError::Cancelled(key));
        }
        self.fetch(key, parser).await?.ok_or(CacheError::NotFound(key))
    }

    /// A key parked as missing without a parser takes the first one offered,
    /// so the poller can decode it once it appears.
    fn adopt_missing_parser(&self, key: Pubkey, parser: &Parser<T>) {
        if let Some(mut slot) = self.inner.missing.get_mut(&key) {
            if slot.is_none() {
                *slot = Some(parser.clone());
            }
        }
    }

    /// Fetches immediately whatever is waiting in the open batch.
    pub async fn flush(&self) {
        self.inner.coalescer.flush().await;
    }

    /// Joins the fetch in flight for `key`, or starts one. A started fetch is
    /// applied even if every caller stops waiting for it.
    fn fetch(&self, key: Pubkey, parser: Option<Parser<T>>) -> SharedFetch<T> {
        let fetch = match self.inner.pending.entry(key) {
            Entry::Occupied(pending) => {
                trace!("[CACHE] joining in-flight fetch of {}", key);
                return pending.get().fetch.clone();
            }
            Entry::Vacant(slot) => {
                let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let outcome = self.inner.coalescer.add_to_batch(key);
                let cache = self.downgrade();
                let fetch = async move {
                    let outcome = outcome.await;
                    let Some(this) = cache.upgrade() else {
                        return Err(CacheError::Cancelled(key));
                    };
                    let resolved = match outcome {
                        Ok(Ok(payload)) => this.resolve(key, id, payload, parser).await,
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(CacheError::Cancelled(key)),
                    };
                    this.inner.pending.remove_if(&key, |_, p| p.id == id);
                    resolved
                }
                .boxed()
                .shared();
                slot.insert(PendingFetch {
                    id,
                    fetch: fetch.clone(),
                });
                fetch
            }
        };
        tokio::spawn(fetch.clone().map(drop));
        fetch
    }

    /// Whether fetch `id` still owns `key`: not deleted, refetched or closed
    /// since it started.
    fn is_current(&self, key: &Pubkey, id: u64) -> bool {
        !self.is_closed() && self.inner.pending.get(key).map(|p| p.id) == Some(id)
    }

    /// Applies a fetch result, unless the key was deleted (or the cache
    /// closed) while the fetch was in flight.
    async fn resolve(
        &self,
        key: Pubkey,
        id: u64,
        payload: Option<Account>,
        parser: Option<Parser<T>>,
    ) -> Resolved<T> {
        if !self.is_current(&key, id) {
            debug!("[CACHE] dropping stale fetch result for {}", key);
            return Err(CacheError::Cancelled(key));
        }

        let parser = parser
            .or_else(|| self.inner.store.parser_for(&key))
            .or_else(|| self.inner.missing.get(&key).and_then(|p| p.clone()));

        let Some(account) = payload else {
            self.park_missing(key, parser);
            self.inner.store.mark_missing(key);
            return Ok(None);
        };
        let parser = parser.ok_or(CacheError::MissingParser(key))?;
        self.inner.store.register_parser(key, parser.clone());
        self.inner.missing.remove(&key);

        if !self.watch(key, id).await? {
            // nothing would keep a cached copy fresh
            return Ok(parser.parse(&key, account).map(Arc::new));
        }
        self.inner.store.add(key, account, Some(parser), None)
    }

    // ---------------------------------------------------------------
    // watch / poll state machine
    // ---------------------------------------------------------------

    /// Parks an absent key in the missing set, dropping any subscription.
    /// A key never sits in both.
    fn park_missing(&self, key: Pubkey, parser: Option<Parser<T>>) {
        if let Some((_, handle)) = self.inner.subscriptions.remove(&key) {
            self.inner.source.unsubscribe(handle);
        }
        self.inner.missing.insert(key, parser);
        trace!("[WATCH] {} missing, polling", key);
    }

    /// Makes sure an existing key is kept fresh by a live subscription.
    /// Returns `false` when it cannot be watched; static keys never are and
    /// count as fresh.
    async fn watch(&self, key: Pubkey, id: u64) -> CacheResult<bool> {
        if self.inner.statics.contains(&key) || self.inner.subscriptions.contains_key(&key) {
            return Ok(true);
        }

        let on_change: AccountCallback = {
            let cache = self.downgrade();
            Arc::new(move |account| {
                if let Some(cache) = cache.upgrade() {
                    cache.on_account_change(key, account);
                }
            })
        };
        let on_close: CloseCallback = {
            let cache = self.downgrade();
            Arc::new(move |handle| {
                if let Some(cache) = cache.upgrade() {
                    cache.on_subscription_closed(key, handle);
                }
            })
        };
        let subscribed = self
            .inner
            .source
            .subscribe(key, self.inner.config.commitment(), on_change, on_close)
            .await;
        let handle = match subscribed {
            Ok(handle) => handle,
            Err(e) => {
                warn!("⚠️ [WATCH] subscribe {} failed, not caching it: {:#}", key, e);
                return Ok(false);
            }
        };

        if !self.is_current(&key, id) {
            self.inner.source.unsubscribe(handle);
            return Err(CacheError::Cancelled(key));
        }
        match self.inner.subscriptions.entry(key) {
            Entry::Occupied(_) => self.inner.source.unsubscribe(handle),
            Entry::Vacant(slot) => {
                debug!("👀 [WATCH] {} watching {}", handle, key);
                slot.insert(handle);
            }
        }
        Ok(true)
    }

    /// A subscription died on its own. The entry it kept fresh is dropped
    /// so the next search fetches and watches the key again.
    fn on_subscription_closed(&self, key: Pubkey, handle: SubscriptionHandle) {
        if self.inner.subscriptions.remove_if(&key, |_, h| *h == handle).is_none() {
            return;
        }
        self.inner.store.evict(&key);
        warn!("⚠️ [WATCH] {} for {} ended, entry dropped until the next search", handle, key);
    }

    fn on_account_change(&self, key: Pubkey, account: Account) {
        if self.is_closed() || !self.inner.subscriptions.contains_key(&key) {
            return;
        }
        if let Err(e) = self.inner.store.add(key, account, None, None) {
            warn!("⚠️ [WATCH] push for {} not applied: {}", key, e);
        }
    }

    /// Re-fetches those of `keys` currently in the missing set, promoting
    /// the ones that now exist. Returns how many exist. Errors are logged.
    pub async fn requery_missing(&self, keys: &[Pubkey]) -> usize {
        let targets: Vec<(Pubkey, Option<Parser<T>>)> = keys
            .iter()
            .filter_map(|key| self.inner.missing.get(key).map(|parser| (*key, parser.clone())))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let fetches = targets
            .into_iter()
            .map(|(key, parser)| self.fetch(key, parser).map(move |res| (key, res)));
        let mut found = 0;
        for (key, res) in join_all(fetches).await {
            match res {
                Ok(Some(_)) => found += 1,
                Ok(None) | Err(CacheError::Cancelled(_)) => {}
                Err(e) => warn!("⚠️ [POLL] re-fetch of {} failed: {}", key, e),
            }
        }
        found
    }

    pub fn is_watched(&self, key: &Pubkey) -> bool {
        self.inner.subscriptions.contains_key(key)
    }

    pub fn is_missing(&self, key: &Pubkey) -> bool {
        self.inner.missing.contains_key(key)
    }

    pub fn is_static(&self, key: &Pubkey) -> bool {
        self.inner.statics.contains(key)
    }

    pub fn is_pending(&self, key: &Pubkey) -> bool {
        self.inner.pending.contains_key(key)
    }

    pub fn missing_keys(&self) -> Vec<Pubkey> {
        self.inner.missing.iter().map(|e| *e.key()).collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops the missing-account poller, drops the open batch and tears down
    /// every subscription. Entries stay readable through [`get`](Self::get).
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.inner.coalescer.cancel();
        let unsubscribed = self.inner.teardown();
        self.inner.missing.clear();
        info!(
            "🛑 [CACHE] closed: {} subscriptions removed, {} queued fetches cancelled",
            unsubscribed, cancelled
        );
    }
}

impl<T, S> AccountFetchCache<T, S>
where
    T: Undecoded + Send + Sync + 'static,
    S: AccountSource,
{
    /// Raw account through the cache. Keys without a registered parser are
    /// decoded with a pass-through parser shared by the whole cache.
    pub async fn get_account_info(&self, key: Pubkey) -> Option<Account> {
        let parser = match self.inner.store.parser_for(&key) {
            Some(_) => None,
            None => Some(self.inner.raw_parser.get_or_init(Parser::raw).clone()),
        };
        self.search(key, parser, false).await.map(|entry| entry.account.clone())
    }
}
