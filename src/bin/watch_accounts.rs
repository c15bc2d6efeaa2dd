//! Watches accounts through the cache and logs every change until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use log::info;
use solana_sdk::pubkey::Pubkey;

use account_fetch_cache::parsers::{any_account_parser, TokenData};
use account_fetch_cache::{AccountFetchCache, CacheEvent, RpcAccountSource, Settings};

#[derive(ClapParser, Debug)]
#[command(name = "watch-accounts")]
struct Args {
    /// Settings file
    #[arg(long, default_value = "config/settings.json")]
    config: PathBuf,

    /// Accounts to watch (base58); absent ones are polled until created
    #[arg(required = true)]
    keys: Vec<Pubkey>,
}

fn describe(info: &TokenData) -> String {
    match info {
        TokenData::Mint(mint) => format!("mint supply={}", mint.supply),
        TokenData::TokenAccount(token) => format!("token amount={}", token.amount),
        TokenData::Raw => "raw".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let settings = Settings::load_from_file(&args.config)?;
    info!("⚙️ {:?}", settings);

    let source = RpcAccountSource::connect(&settings.rpc_url, &settings.ws_url)
        .await
        .context("connecting account source")?;
    let cache: AccountFetchCache<TokenData, _> = AccountFetchCache::new(Arc::new(source), settings.cache.clone());

    let listener = {
        let reader = cache.downgrade();
        cache.emitter().on_cache(move |event| match event {
            CacheEvent::Update { key, is_new, .. } => {
                let detail = reader
                    .upgrade()
                    .and_then(|cache| cache.get(key))
                    .map(|e| describe(&e.info))
                    .unwrap_or_default();
                println!("📥 {key} {} {detail}", if *is_new { "created" } else { "updated" });
            }
            CacheEvent::Delete { key } => println!("🗑️ {key} removed"),
        })
    };

    let parser = any_account_parser();
    for key in &args.keys {
        match cache.search(*key, Some(parser.clone()), false).await {
            Some(entry) => println!("👀 {key} {}", describe(&entry.info)),
            None => println!("⏳ {key} does not exist yet, polling"),
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    cache.emitter().remove_listener(listener);
    cache.close();
    println!("🛑 Stopped watching {} accounts", args.keys.len());
    Ok(())
}
