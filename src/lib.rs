// Library modules
pub mod cache;
pub mod config;
pub mod error;
pub mod parsers;
pub mod source;
pub mod submit;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{AccountFetchCache, CacheEvent, ParsedAccount, Parser};
pub use config::{CacheConfig, Settings};
pub use error::{CacheError, CacheResult};
pub use source::{AccountSource, RpcAccountSource};
