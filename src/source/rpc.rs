//! `AccountSource` backed by a Solana JSON-RPC endpoint and its websocket.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use log::{debug, info, warn};
use solana_account_decoder::UiAccountEncoding;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcAccountInfoConfig};
use solana_pubsub_client::nonblocking::pubsub_client::PubsubClient;
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};
use tokio::sync::oneshot;

use super::{AccountCallback, AccountSource, CloseCallback, SubscriptionHandle};

/// Hard ceiling of `getMultipleAccounts`.
pub const MAX_MULTIPLE_ACCOUNTS: usize = 100;

pub struct RpcAccountSource {
    rpc: Arc<RpcClient>,
    pubsub: Arc<PubsubClient>,
    next_handle: AtomicU64,
    /// handle -> stop signal of the task driving that subscription
    active: Arc<DashMap<u64, oneshot::Sender<()>>>,
}

impl RpcAccountSource {
    /// Connects the websocket side; the HTTP client is lazy.
    pub async fn connect(rpc_url: &str, ws_url: &str) -> Result<Self> {
        let pubsub = PubsubClient::new(ws_url)
            .await
            .with_context(|| format!("connecting pubsub websocket {ws_url}"))?;
        info!("🔌 [SOURCE] RPC {} / WS {}", rpc_url, ws_url);
        Ok(Self::new(Arc::new(RpcClient::new(rpc_url.to_string())), Arc::new(pubsub)))
    }

    pub fn new(rpc: Arc<RpcClient>, pubsub: Arc<PubsubClient>) -> Self {
        Self {
            rpc,
            pubsub,
            next_handle: AtomicU64::new(1),
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn rpc_client(&self) -> Arc<RpcClient> {
        self.rpc.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.active.len()
    }
}

#[async_trait]
impl AccountSource for RpcAccountSource {
    async fn fetch_many(
        &self,
        keys: &[Pubkey],
        commitment: CommitmentConfig,
    ) -> Result<Vec<Option<Account>>> {
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_MULTIPLE_ACCOUNTS) {
            let resp = self
                .rpc
                .get_multiple_accounts_with_commitment(chunk, commitment)
                .await
                .with_context(|| format!("getMultipleAccounts for {} keys", chunk.len()))?;
            out.extend(resp.value);
        }
        Ok(out)
    }

    async fn subscribe(
        &self,
        key: Pubkey,
        commitment: CommitmentConfig,
        on_change: AccountCallback,
        on_close: CloseCallback,
    ) -> Result<SubscriptionHandle> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        self.active.insert(handle.0, stop_tx);

        let pubsub = self.pubsub.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            let config = RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(commitment),
                ..RpcAccountInfoConfig::default()
            };
            let (mut stream, unsubscribe) = match pubsub.account_subscribe(&key, Some(config)).await {
                Ok(sub) => sub,
                Err(e) => {
                    active.remove(&handle.0);
                    let _ = ready_tx.send(Err(anyhow!("accountSubscribe {key}: {e}")));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                unsubscribe().await;
                active.remove(&handle.0);
                return;
            }
            debug!("[SOURCE] {} opened for {}", handle, key);

            let stopped = loop {
                tokio::select! {
                    _ = &mut stop_rx => break true,
                    update = stream.next() => match update {
                        Some(resp) => match resp.value.decode::<Account>() {
                            Some(account) => on_change(account),
                            None => warn!("⚠️ [SOURCE] undecodable push for {}", key),
                        },
                        None => {
                            warn!("⚠️ [SOURCE] subscription stream for {} closed", key);
                            break false;
                        }
                    },
                }
            };

            unsubscribe().await;
            active.remove(&handle.0);
            debug!("[SOURCE] {} closed for {}", handle, key);
            if !stopped {
                on_close(handle);
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.active.remove(&handle.0);
                Err(anyhow!("subscription task for {key} exited before it was ready"))
            }
        }
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some((_, stop)) = self.active.remove(&handle.0) {
            let _ = stop.send(());
        }
    }
}
