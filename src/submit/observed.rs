//! Submitter decorator feeding confirmed transactions back into the cache.
//!
//! Accounts a transaction writes to may have just been created. Once the
//! transaction confirms, those of its writable keys the cache holds as
//! missing are re-fetched right away instead of waiting for the next poll.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use solana_sdk::{
    instruction::Instruction, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction,
};

use super::iface::Submitter;
use crate::cache::AccountFetchCache;
use crate::source::AccountSource;

pub struct ObservedSubmitter<S, A: AccountSource, T> {
    inner: Arc<S>,
    cache: AccountFetchCache<T, A>,
}

impl<S, A, T> ObservedSubmitter<S, A, T>
where
    S: Submitter,
    A: AccountSource,
    T: Send + Sync + 'static,
{
    pub fn new(inner: Arc<S>, cache: AccountFetchCache<T, A>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Waits for confirmation in the background, then re-queries `keys`.
    fn observe(&self, signature: Signature, keys: Vec<Pubkey>) {
        if keys.is_empty() {
            return;
        }
        let inner = self.inner.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.confirm(&signature).await {
                warn!("⚠️ [TX] {} not confirmed, skipping account refresh: {:#}", signature, e);
                return;
            }
            let found = cache.requery_missing(&keys).await;
            debug!(
                "[TX] {} confirmed: {} of {} writable accounts newly exist",
                signature,
                found,
                keys.len()
            );
        });
    }
}

/// Writable keys among the static keys of the message. Keys loaded from
/// lookup tables are not resolved.
pub fn writable_keys_of_transaction(tx: &VersionedTransaction) -> Vec<Pubkey> {
    tx.message
        .static_account_keys()
        .iter()
        .enumerate()
        .filter(|(i, _)| tx.message.is_maybe_writable(*i))
        .map(|(_, key)| *key)
        .collect()
}

pub fn writable_keys_of_instructions(instructions: &[Instruction]) -> Vec<Pubkey> {
    let mut keys: Vec<Pubkey> = Vec::new();
    for meta in instructions.iter().flat_map(|ix| ix.accounts.iter()) {
        if meta.is_writable && !keys.contains(&meta.pubkey) {
            keys.push(meta.pubkey);
        }
    }
    keys
}

#[async_trait]
impl<S, A, T> Submitter for ObservedSubmitter<S, A, T>
where
    S: Submitter,
    A: AccountSource,
    T: Send + Sync + 'static,
{
    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature> {
        let signature = self.inner.send_transaction(tx).await?;
        self.observe(signature, writable_keys_of_transaction(tx));
        Ok(signature)
    }

    async fn send_instructions(&self, instructions: &[Instruction]) -> Result<Signature> {
        let signature = self.inner.send_instructions(instructions).await?;
        self.observe(signature, writable_keys_of_instructions(instructions));
        Ok(signature)
    }

    async fn confirm(&self, signature: &Signature) -> Result<()> {
        self.inner.confirm(signature).await
    }
}
