//! Cache change notifications.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use solana_sdk::pubkey::Pubkey;

use super::parser::Parser;

#[derive(Debug, Clone)]
pub enum CacheEvent<T> {
    Update {
        key: Pubkey,
        /// No decoded entry existed for the key before this update.
        is_new: bool,
        parser: Parser<T>,
        is_active: bool,
    },
    Delete {
        key: Pubkey,
    },
}

impl<T> CacheEvent<T> {
    pub fn key(&self) -> &Pubkey {
        match self {
            Self::Update { key, .. } | Self::Delete { key } => key,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&CacheEvent<T>) + Send + Sync>;

pub struct EventEmitter<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for every cache event; listeners run in
    /// registration order.
    pub fn on_cache<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CacheEvent<T>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn raise_cache_updated(&self, key: Pubkey, is_new: bool, parser: Parser<T>, is_active: bool) {
        self.emit(&CacheEvent::Update {
            key,
            is_new,
            parser,
            is_active,
        });
    }

    pub fn raise_cache_deleted(&self, key: Pubkey) {
        self.emit(&CacheEvent::Delete { key });
    }

    fn emit(&self, event: &CacheEvent<T>) {
        // snapshot so a listener may register or remove listeners
        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}
