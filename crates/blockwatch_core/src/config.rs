use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BLOCKS: u32 = 3;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

// ---------------------------------------------------------------------------
// Observer settings
// ---------------------------------------------------------------------------

/// How a block-time session learns about new heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserveStrategy {
    /// Query `eth_blockNumber` on a fixed timer.
    #[default]
    Poll,
    /// Subscribe to `newHeads` over WebSocket.
    Push,
}

impl FromStr for ObserveStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "push" | "subscribe" => Ok(Self::Push),
            other => Err(ConfigError::Invalid(format!(
                "unknown strategy '{other}', expected 'poll' or 'push'"
            ))),
        }
    }
}

impl fmt::Display for ObserveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => f.write_str("poll"),
            Self::Push => f.write_str("push"),
        }
    }
}

/// Defaults for `block-time` sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Number of block transitions to observe before stopping.
    pub blocks: u32,
    pub poll_interval_ms: u64,
    pub strategy: ObserveStrategy,
    /// Consecutive failed polls tolerated before giving up. `0` halts on the
    /// first failure.
    pub max_consecutive_failures: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            blocks: DEFAULT_BLOCKS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            strategy: ObserveStrategy::Poll,
            max_consecutive_failures: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// One named network entry, as written in the config file.
///
/// URLs may reference environment variables with `${NAME}`; they are
/// resolved with [`expand_env`] when the network is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl NetworkConfig {
    fn new(url: &str, ws_url: Option<&str>, chain_id: u64) -> Self {
        Self {
            url: url.into(),
            ws_url: ws_url.map(Into::into),
            chain_id: Some(chain_id),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn default_networks() -> BTreeMap<String, NetworkConfig> {
    let mut networks = BTreeMap::new();
    networks.insert(
        "mainnet".into(),
        NetworkConfig::new(
            "${INFURA_MAINNET_API_URL}${INFURA_KEY}",
            Some("wss://mainnet.infura.io/ws/v3/${INFURA_KEY}"),
            1,
        ),
    );
    networks.insert(
        "goerli".into(),
        NetworkConfig::new(
            "${INFURA_GOERLI_API_URL}${INFURA_KEY}",
            Some("wss://goerli.infura.io/ws/v3/${INFURA_KEY}"),
            5,
        ),
    );
    networks.insert(
        "sepolia".into(),
        NetworkConfig::new(
            "${INFURA_SEPOLIA_API_URL}${INFURA_KEY}",
            Some("wss://sepolia.infura.io/ws/v3/${INFURA_KEY}"),
            11_155_111,
        ),
    );
    networks.insert(
        "localhost".into(),
        NetworkConfig::new("http://127.0.0.1:8545", Some("ws://127.0.0.1:8545"), 31_337),
    );
    networks
}

// ---------------------------------------------------------------------------
// WatchConfig
// ---------------------------------------------------------------------------

/// Top-level configuration, stored as TOML at `~/.blockwatch/config.toml`.
///
/// A `[networks]` table in the file replaces the built-in network list
/// entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub default_network: String,
    pub log_level: String,
    pub observer: ObserverConfig,
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            default_network: "mainnet".into(),
            log_level: "info".into(),
            observer: ObserverConfig::default(),
            networks: default_networks(),
        }
    }
}

impl WatchConfig {
    /// Returns the base config directory: `~/.blockwatch/`
    pub fn base_dir() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".blockwatch"))
    }

    /// Returns the config file path: `~/.blockwatch/config.toml`
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::base_dir()?.join("config.toml"))
    }

    /// Returns the logs directory: `~/.blockwatch/logs/`
    pub fn logs_dir() -> Result<PathBuf, ConfigError> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Loads the config from the default location, falling back to the
    /// built-in defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific file path, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the invariants the rest of the workspace relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.observer.blocks == 0 {
            return Err(ConfigError::Invalid(
                "observer.blocks must be at least 1".into(),
            ));
        }
        if self.observer.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "observer.poll_interval_ms must be greater than 0".into(),
            ));
        }
        for (name, network) in &self.networks {
            if network.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("network {name} has an empty url")));
            }
            if network.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "network {name} has a zero timeout"
                )));
            }
        }
        self.network(&self.default_network)?;
        Ok(())
    }

    /// Look up a network by name, ignoring ASCII case. Returns the canonical
    /// name as written in the config alongside the entry.
    pub fn network(&self, name: &str) -> Result<(&str, &NetworkConfig), ConfigError> {
        self.networks
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(key, network)| (key.as_str(), network))
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))
    }

    /// Names of all configured networks, sorted.
    pub fn network_names(&self) -> Vec<&str> {
        self.networks.keys().map(String::as_str).collect()
    }
}

// ---------------------------------------------------------------------------
// Environment placeholders
// ---------------------------------------------------------------------------

/// Replace every `${NAME}` in `raw` with the value returned by `lookup`.
///
/// `network` is only used to make the error message useful. An unterminated
/// `${` is rejected rather than passed through.
pub fn expand_env<F>(raw: &str, network: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ConfigError::Invalid(format!("unterminated placeholder in url of network {network}"))
        })?;
        let var = &after[..end];
        if var.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "empty placeholder in url of network {network}"
            )));
        }
        let value = lookup(var).ok_or_else(|| ConfigError::MissingEnv {
            var: var.to_string(),
            network: network.to_string(),
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Placeholder lookup backed by the process environment (and `.env`, once
/// loaded).
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}
