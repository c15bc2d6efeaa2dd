//! Runtime configuration loader and common helpers.

use std::{fmt, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    signature::Keypair,
};

pub const DEFAULT_CHUNK_SIZE: usize = 99;
pub const DEFAULT_DELAY_MS: u64 = 50;
pub const DEFAULT_MISSING_REFETCH_DELAY_MS: u64 = 10_000;

/// ------------------------------------------------------------------
/// Account cache tuning
/// ------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Max keys per `getMultipleAccounts` batch; the RPC caps it at 100.
    pub chunk_size: usize,
    /// Debounce window collecting keys into one batch.
    pub delay_ms: u64,
    pub commitment: CommitmentLevel,
    /// Re-poll period for accounts confirmed absent.
    pub missing_refetch_delay_ms: u64,
    /// Deadline for one batch round trip; unbounded when unset.
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            delay_ms: DEFAULT_DELAY_MS,
            commitment: CommitmentLevel::Confirmed,
            missing_refetch_delay_ms: DEFAULT_MISSING_REFETCH_DELAY_MS,
            fetch_timeout_ms: None,
        }
    }
}

impl CacheConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn missing_refetch_delay(&self) -> Duration {
        Duration::from_millis(self.missing_refetch_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    pub fn commitment(&self) -> CommitmentConfig {
        CommitmentConfig {
            commitment: self.commitment,
        }
    }
}

/// ------------------------------------------------------------------
/// Main Settings object
/// ------------------------------------------------------------------
#[derive(Clone)]
pub struct Settings {
    /* -------- infrastructure ------------------------ */
    pub rpc_url: String,
    pub ws_url: String,

    /* -------- transaction payer (optional) ---------- */
    pub payer_private_key: Option<String>,

    /* -------- account cache ------------------------- */
    pub cache: CacheConfig,
}

impl Settings {
    /// --------------------------------------------------------------
    /// Read `settings.json` from disk.
    /// --------------------------------------------------------------
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading settings file {:?}", path.as_ref()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("parsing settings file {:?}", path.as_ref()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(raw)?;

        /* -------- plain strings ---------------------------------- */
        let rpc_url = json["rpc_url"]
            .as_str()
            .unwrap_or("http://127.0.0.1:8899")
            .to_string();
        let ws_url = json["ws_url"]
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| ws_url_for(&rpc_url));
        let payer_private_key = json["payer_private_key"].as_str().map(|s| s.to_string());

        /* -------- cache section ---------------------------------- */
        let cache = match json.get("cache") {
            Some(section) => serde_json::from_value(section.clone()).context("parsing `cache` section")?,
            None => CacheConfig::default(),
        };

        Ok(Self {
            rpc_url,
            ws_url,
            payer_private_key,
            cache,
        })
    }

    /// --------------------------------------------------------------
    /// Load settings from default config/settings.json file.
    /// --------------------------------------------------------------
    pub fn load() -> Result<Self> {
        Self::load_from_file("config/settings.json")
    }

    /// --------------------------------------------------------------
    /// Decode the base58 payer key, if one is configured.
    /// --------------------------------------------------------------
    pub fn payer(&self) -> Result<Option<Keypair>> {
        let Some(encoded) = &self.payer_private_key else {
            return Ok(None);
        };
        let bytes = bs58::decode(encoded).into_vec().context("decoding base58 key")?;
        let keypair = Keypair::from_bytes(&bytes).context("invalid payer keypair bytes")?;
        Ok(Some(keypair))
    }
}

/// Websocket endpoint paired with an HTTP RPC endpoint, e.g.
/// `https://host` -> `wss://host`, `http://127.0.0.1:8899` -> `ws://127.0.0.1:8900`.
pub fn ws_url_for(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        return format!("wss://{rest}");
    }
    let Some(rest) = rpc_url.strip_prefix("http://") else {
        return rpc_url.to_string();
    };
    // a plain-http validator serves pubsub on the next port
    match rest.trim_end_matches('/').rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => format!("ws://{host}:{}", port.saturating_add(1)),
            Err(_) => format!("ws://{rest}"),
        },
        None => format!("ws://{rest}"),
    }
}

/* ------------------------------------------------------------------ */
/*  Manual Debug (keeps the payer key out of logs)                      */
/* ------------------------------------------------------------------ */
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("rpc_url", &self.rpc_url)
            .field("ws_url", &self.ws_url)
            .field("has_payer", &self.payer_private_key.is_some())
            .field("cache", &self.cache)
            .finish()
    }
}
