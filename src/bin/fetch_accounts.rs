//! One-shot batched read of a set of accounts through the cache.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use futures::future::join_all;
use solana_sdk::pubkey::Pubkey;

use account_fetch_cache::parsers::{any_account_parser, TokenData};
use account_fetch_cache::{AccountFetchCache, RpcAccountSource, Settings};

#[derive(ClapParser, Debug)]
#[command(name = "fetch-accounts")]
struct Args {
    /// Settings file
    #[arg(long, default_value = "config/settings.json")]
    config: PathBuf,

    /// Override the RPC endpoint from the settings file
    #[arg(long)]
    rpc_url: Option<String>,

    /// Accounts to read (base58)
    #[arg(required = true)]
    keys: Vec<Pubkey>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut settings = Settings::load_from_file(&args.config)?;
    if let Some(rpc_url) = args.rpc_url {
        settings.ws_url = account_fetch_cache::config::settings::ws_url_for(&rpc_url);
        settings.rpc_url = rpc_url;
    }

    let source = RpcAccountSource::connect(&settings.rpc_url, &settings.ws_url)
        .await
        .context("connecting account source")?;
    let cache: AccountFetchCache<TokenData, _> = AccountFetchCache::new(Arc::new(source), settings.cache.clone());
    let parser = any_account_parser();

    println!("🔎 Fetching {} accounts from {}", args.keys.len(), settings.rpc_url);
    let found = join_all(args.keys.iter().map(|key| cache.search(*key, Some(parser.clone()), true))).await;

    for (key, entry) in args.keys.iter().zip(found) {
        match entry {
            Some(entry) => match &entry.info {
                TokenData::Mint(mint) => {
                    println!("   {key}: mint supply={} decimals={}", mint.supply, mint.decimals)
                }
                TokenData::TokenAccount(token) => {
                    println!("   {key}: token account mint={} amount={}", token.mint, token.amount)
                }
                TokenData::Raw => println!(
                    "   {key}: {} lamports, {} bytes, owner {}",
                    entry.account.lamports,
                    entry.account.data.len(),
                    entry.account.owner
                ),
            },
            None => println!("   {key}: not found"),
        }
    }

    cache.close();
    Ok(())
}
