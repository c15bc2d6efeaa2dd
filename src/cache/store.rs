//! Authoritative key -> entry map plus the sticky parser registry.

use std::sync::Arc;

use dashmap::DashMap;
use log::trace;
use solana_sdk::{account::Account, pubkey::Pubkey};

use super::events::EventEmitter;
use super::parser::{ParsedAccount, Parser};
use crate::error::{CacheError, CacheResult};

pub(crate) enum Slot<T> {
    Present(Arc<ParsedAccount<T>>),
    /// Confirmed absent on the last fetch.
    Missing,
}

pub type ActivePredicate<'a, T> = &'a dyn Fn(&ParsedAccount<T>) -> bool;

pub struct CacheStore<T> {
    entries: DashMap<Pubkey, Slot<T>>,
    parsers: DashMap<Pubkey, Parser<T>>,
    emitter: EventEmitter<T>,
}

impl<T> Default for CacheStore<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            parsers: DashMap::new(),
            emitter: EventEmitter::new(),
        }
    }
}

impl<T> CacheStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitter(&self) -> &EventEmitter<T> {
        &self.emitter
    }

    pub fn get(&self, key: &Pubkey) -> Option<Arc<ParsedAccount<T>>> {
        match self.entries.get(key).as_deref() {
            Some(Slot::Present(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// `None` when the key was never resolved, `Some(None)` when it is known
    /// to be absent.
    pub(crate) fn lookup(&self, key: &Pubkey) -> Option<Option<Arc<ParsedAccount<T>>>> {
        self.entries.get(key).map(|slot| match &*slot {
            Slot::Present(entry) => Some(entry.clone()),
            Slot::Missing => None,
        })
    }

    pub fn is_marked_missing(&self, key: &Pubkey) -> bool {
        matches!(self.entries.get(key).as_deref(), Some(Slot::Missing))
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Present(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parser_for(&self, key: &Pubkey) -> Option<Parser<T>> {
        self.parsers.get(key).map(|p| p.clone())
    }

    pub fn register_parser(&self, key: Pubkey, parser: Parser<T>) {
        self.parsers.insert(key, parser);
    }

    /// Keys whose registered parser is `parser` (by identity).
    pub fn by_parser(&self, parser: &Parser<T>) -> Vec<Pubkey> {
        self.parsers
            .iter()
            .filter(|entry| entry.value().same_as(parser))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Decodes `account` and stores the result, announcing it on the emitter.
    ///
    /// Falls back to the registered parser when `parser` is `None`. A decoder
    /// rejecting the payload leaves the store untouched and yields `Ok(None)`.
    pub fn add(
        &self,
        key: Pubkey,
        account: Account,
        parser: Option<Parser<T>>,
        is_active: Option<ActivePredicate<'_, T>>,
    ) -> CacheResult<Option<Arc<ParsedAccount<T>>>> {
        let parser = match parser {
            Some(parser) => parser,
            None => self.parser_for(&key).ok_or(CacheError::MissingParser(key))?,
        };
        self.register_parser(key, parser.clone());

        let Some(parsed) = parser.parse(&key, account) else {
            trace!("[CACHE] {} rejected payload of {}", parser.name(), key);
            return Ok(None);
        };
        let parsed = Arc::new(parsed);
        let is_active = is_active.map_or(true, |active| active(&parsed));

        let previous = self.entries.insert(key, Slot::Present(parsed.clone()));
        let is_new = !matches!(previous, Some(Slot::Present(_)));
        self.emitter.raise_cache_updated(key, is_new, parser, is_active);
        Ok(Some(parsed))
    }

    /// Records `key` as confirmed absent. A present entry is dropped and its
    /// removal announced.
    pub(crate) fn mark_missing(&self, key: Pubkey) {
        if let Some(Slot::Present(_)) = self.entries.insert(key, Slot::Missing) {
            self.emitter.raise_cache_deleted(key);
        }
    }

    /// Removes the entry (present or missing marker). Only a present entry
    /// counts as a removal and is announced.
    pub fn remove(&self, key: &Pubkey) -> bool {
        match self.entries.remove(key) {
            Some((_, Slot::Present(_))) => {
                self.emitter.raise_cache_deleted(*key);
                true
            }
            _ => false,
        }
    }

    /// Forgets the entry without announcing it; the account still exists,
    /// the copy held here just can no longer be trusted.
    pub(crate) fn evict(&self, key: &Pubkey) -> bool {
        self.entries.remove(key).is_some()
    }
}
