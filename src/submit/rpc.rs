//! Plain JSON-RPC submitter paying with one keypair.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::Instruction,
    message::{Message, VersionedMessage},
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};

use super::iface::Submitter;

pub struct RpcSubmitter {
    rpc: Arc<RpcClient>,
    payer: Arc<Keypair>,
    commitment: CommitmentConfig,
}

impl RpcSubmitter {
    pub fn new(rpc: Arc<RpcClient>, payer: Keypair, commitment: CommitmentConfig) -> Self {
        Self {
            rpc,
            payer: Arc::new(payer),
            commitment,
        }
    }

    pub fn payer(&self) -> &Keypair {
        &self.payer
    }
}

#[async_trait]
impl Submitter for RpcSubmitter {
    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature> {
        let signature = self
            .rpc
            .send_transaction(tx)
            .await
            .context("sendTransaction")?;
        debug!("📤 [TX] sent {}", signature);
        Ok(signature)
    }

    async fn send_instructions(&self, instructions: &[Instruction]) -> Result<Signature> {
        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .context("getLatestBlockhash")?;
        let message = Message::new_with_blockhash(instructions, Some(&self.payer.pubkey()), &blockhash);
        let tx = VersionedTransaction::try_new(VersionedMessage::Legacy(message), &[self.payer.as_ref()])
            .context("signing transaction")?;
        self.send_transaction(&tx).await
    }

    async fn confirm(&self, signature: &Signature) -> Result<()> {
        self.rpc
            .poll_for_signature_with_commitment(signature, self.commitment)
            .await
            .with_context(|| format!("confirming {signature}"))?;
        debug!("✅ [TX] confirmed {}", signature);
        Ok(())
    }
}
