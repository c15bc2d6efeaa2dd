pub mod iface;
pub mod observed;
pub mod rpc;

use std::sync::Arc;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{commitment_config::CommitmentConfig, signature::Keypair};

use crate::cache::AccountFetchCache;
use crate::source::AccountSource;
pub use iface::Submitter;
pub use observed::ObservedSubmitter;
pub use rpc::RpcSubmitter;

/// Plain RPC submitter paying with `payer`.
pub fn rpc_only(rpc_client: Arc<RpcClient>, payer: Keypair, commitment: CommitmentConfig) -> Arc<dyn Submitter> {
    Arc::new(RpcSubmitter::new(rpc_client, payer, commitment))
}

/// RPC submitter whose confirmed transactions refresh missing accounts of `cache`.
pub fn observed_rpc<A, T>(
    rpc_client: Arc<RpcClient>,
    payer: Keypair,
    commitment: CommitmentConfig,
    cache: AccountFetchCache<T, A>,
) -> Arc<dyn Submitter>
where
    A: AccountSource,
    T: Send + Sync + 'static,
{
    let inner = Arc::new(RpcSubmitter::new(rpc_client, payer, commitment));
    Arc::new(ObservedSubmitter::new(inner, cache))
}
