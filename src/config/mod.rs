pub mod settings;

pub use settings::{CacheConfig, Settings};
