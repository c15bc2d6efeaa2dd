//! Remote account store seam: batched reads plus push subscriptions.

pub mod rpc;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};

pub use rpc::RpcAccountSource;

/// Invoked with the latest account state every time a subscription pushes.
pub type AccountCallback = Arc<dyn Fn(Account) + Send + Sync>;

/// Invoked once when a subscription dies on its own (stream ended or
/// failed). Not invoked after [`AccountSource::unsubscribe`].
pub type CloseCallback = Arc<dyn Fn(SubscriptionHandle) + Send + Sync>;

/// Opaque id of one live push subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[async_trait]
pub trait AccountSource: Send + Sync + 'static {
    /// Batched read. The result is parallel to `keys`; `None` means the
    /// account does not exist at the given commitment.
    async fn fetch_many(
        &self,
        keys: &[Pubkey],
        commitment: CommitmentConfig,
    ) -> Result<Vec<Option<Account>>>;

    /// Opens a push subscription for `key` and resolves once it is live.
    /// Callbacks may run on any task.
    async fn subscribe(
        &self,
        key: Pubkey,
        commitment: CommitmentConfig,
        on_change: AccountCallback,
        on_close: CloseCallback,
    ) -> Result<SubscriptionHandle>;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}
