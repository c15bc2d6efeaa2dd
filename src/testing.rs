//! In-memory collaborators for unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Mutex,
};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, instruction::Instruction, pubkey::Pubkey,
    signature::Signature, transaction::VersionedTransaction,
};

use crate::source::{AccountCallback, AccountSource, CloseCallback, SubscriptionHandle};
use crate::submit::Submitter;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn account_with_lamports(lamports: u64) -> Account {
    Account {
        lamports,
        data: lamports.to_le_bytes().to_vec(),
        owner: Pubkey::default(),
        executable: false,
        rent_epoch: 0,
    }
}

/// Account store that records every batched read and lets tests push
/// updates to open subscriptions.
#[derive(Default)]
pub struct MockAccountSource {
    accounts: DashMap<Pubkey, Account>,
    batches: Mutex<Vec<Vec<Pubkey>>>,
    fail_next: AtomicBool,
    fail_next_subscribe: AtomicBool,
    latency_ms: AtomicU64,
    next_handle: AtomicU64,
    subscriptions: DashMap<u64, (Pubkey, AccountCallback, CloseCallback)>,
}

impl MockAccountSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&self, key: Pubkey, account: Account) {
        self.accounts.insert(key, account);
    }

    /// Keys of every `fetch_many` call, in call order.
    pub fn batches(&self) -> Vec<Vec<Pubkey>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn fail_next_fetch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn set_fetch_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_next_subscribe(&self) {
        self.fail_next_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_subscribed(&self, key: &Pubkey) -> bool {
        self.subscriptions.iter().any(|s| s.value().0 == *key)
    }

    /// Ends every subscription of `key` as if the stream had dropped.
    pub fn close_streams(&self, key: &Pubkey) -> usize {
        let ids: Vec<u64> = self
            .subscriptions
            .iter()
            .filter(|s| s.value().0 == *key)
            .map(|s| *s.key())
            .collect();
        let closed: Vec<(u64, CloseCallback)> = ids
            .into_iter()
            .filter_map(|id| self.subscriptions.remove(&id).map(|(id, (_, _, on_close))| (id, on_close)))
            .collect();
        for (id, on_close) in &closed {
            on_close(SubscriptionHandle(*id));
        }
        closed.len()
    }

    /// Stores `account` and delivers it to every subscriber of `key`.
    /// Returns the number of callbacks invoked.
    pub fn push(&self, key: Pubkey, account: Account) -> usize {
        self.set_account(key, account.clone());
        let callbacks: Vec<AccountCallback> = self
            .subscriptions
            .iter()
            .filter(|s| s.value().0 == key)
            .map(|s| s.value().1.clone())
            .collect();
        for callback in &callbacks {
            callback(account.clone());
        }
        callbacks.len()
    }
}

#[async_trait]
impl AccountSource for MockAccountSource {
    async fn fetch_many(
        &self,
        keys: &[Pubkey],
        _commitment: CommitmentConfig,
    ) -> Result<Vec<Option<Account>>> {
        self.batches.lock().unwrap().push(keys.to_vec());
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("mock getMultipleAccounts failure"));
        }
        Ok(keys
            .iter()
            .map(|key| self.accounts.get(key).map(|a| a.clone()))
            .collect())
    }

    async fn subscribe(
        &self,
        key: Pubkey,
        _commitment: CommitmentConfig,
        on_change: AccountCallback,
        on_close: CloseCallback,
    ) -> Result<SubscriptionHandle> {
        if self.fail_next_subscribe.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("mock accountSubscribe failure for {key}"));
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(id, (key, on_change, on_close));
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions.remove(&handle.0);
    }
}

#[derive(Default)]
pub struct MockSubmitter {
    sent: AtomicUsize,
    fail_confirm: AtomicBool,
}

impl MockSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn fail_confirmations(&self) {
        self.fail_confirm.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Submitter for MockSubmitter {
    async fn send_transaction(&self, _tx: &VersionedTransaction) -> Result<Signature> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(Signature::new_unique())
    }

    async fn send_instructions(&self, _instructions: &[Instruction]) -> Result<Signature> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(Signature::new_unique())
    }

    async fn confirm(&self, signature: &Signature) -> Result<()> {
        if self.fail_confirm.load(Ordering::SeqCst) {
            return Err(anyhow!("mock: {signature} dropped"));
        }
        Ok(())
    }
}
