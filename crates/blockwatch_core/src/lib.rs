//! Shared configuration and logging for the blockwatch crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    NetworkConfig, ObserveStrategy, ObserverConfig, WatchConfig, expand_env, process_env,
};
pub use error::ConfigError;
