use async_trait::async_trait;
use solana_sdk::{instruction::Instruction, signature::Signature, transaction::VersionedTransaction};

#[async_trait]
pub trait Submitter: Send + Sync + 'static {
    /// Sends an already signed transaction.
    async fn send_transaction(&self, tx: &VersionedTransaction) -> anyhow::Result<Signature>;

    /// Builds, signs and sends a transaction from bare instructions.
    async fn send_instructions(&self, instructions: &[Instruction]) -> anyhow::Result<Signature>;

    /// Resolves once `signature` reached the submitter's commitment.
    async fn confirm(&self, _signature: &Signature) -> anyhow::Result<()> {
        Ok(())
    }
}
