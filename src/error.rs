//! Error taxonomy of the account fetch cache.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the strict entry points (`query`, `add`).
///
/// Cloneable so one batch failure can be handed to every waiter of that batch.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The batched `getMultipleAccounts` round trip failed or timed out.
    #[error("batched account fetch failed: {0}")]
    BatchFetch(Arc<anyhow::Error>),

    #[error("no parser registered or supplied for account {0}")]
    MissingParser(Pubkey),

    #[error("account {0} not found")]
    NotFound(Pubkey),

    /// The batch owning this request was dropped before it resolved.
    #[error("fetch for account {0} was cancelled")]
    Cancelled(Pubkey),
}

impl CacheError {
    pub fn batch_fetch(err: anyhow::Error) -> Self {
        Self::BatchFetch(Arc::new(err))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
