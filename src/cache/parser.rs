//! Typed account decoders and the entries they produce.

use std::fmt;
use std::sync::Arc;

use solana_sdk::{account::Account, pubkey::Pubkey};

/// A decoded account as held by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAccount<T> {
    pub pubkey: Pubkey,
    pub account: Account,
    pub info: T,
}

type DecodeFn<T> = dyn Fn(&Pubkey, &Account) -> Option<T> + Send + Sync;

/// Decoder registered per key. Two parsers are the same parser only when
/// they share the same allocation, so clones keep their identity.
pub struct Parser<T> {
    name: &'static str,
    decode: Arc<DecodeFn<T>>,
}

impl<T> Parser<T> {
    pub fn new<F>(name: &'static str, decode: F) -> Self
    where
        F: Fn(&Pubkey, &Account) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            name,
            decode: Arc::new(decode),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the decoder and wraps its output. `None` means the payload is
    /// not an account of this kind and must not be cached.
    pub fn parse(&self, pubkey: &Pubkey, account: Account) -> Option<ParsedAccount<T>> {
        let info = (self.decode)(pubkey, &account)?;
        Some(ParsedAccount {
            pubkey: *pubkey,
            account,
            info,
        })
    }

    pub fn same_as(&self, other: &Parser<T>) -> bool {
        Arc::ptr_eq(&self.decode, &other.decode)
    }
}

impl<T> Clone for Parser<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            decode: self.decode.clone(),
        }
    }
}

impl<T> PartialEq for Parser<T> {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl<T> fmt::Debug for Parser<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Decoded types able to represent an account whose layout is not known,
/// used by the raw `get_account_info` read-through.
pub trait Undecoded: Sized {
    fn undecoded(pubkey: &Pubkey, account: &Account) -> Self;
}

impl<T: Undecoded + 'static> Parser<T> {
    /// Pass-through parser that accepts every payload.
    pub fn raw() -> Self {
        Self::new("raw", |pubkey, account| Some(T::undecoded(pubkey, account)))
    }
}
