use std::collections::HashMap;
use std::time::Duration;

use blockwatch_core::{WatchConfig, expand_env, process_env};
use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// Fully resolved endpoint configuration for a single network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    pub network: String,
    pub url: String,
    /// May still contain `${VAR}` placeholders; see [`RpcConfig::ws_endpoint`].
    pub ws_url: Option<String>,
    pub chain_id: Option<u64>,
    pub is_custom: bool,
    pub timeout_secs: u64,
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Expand and validate the WebSocket endpoint against the process
    /// environment. `Ok(None)` when the network has no `ws_url`.
    pub fn ws_endpoint(&self) -> Result<Option<String>, ChainError> {
        self.ws_endpoint_with(process_env)
    }

    /// [`ws_endpoint`](Self::ws_endpoint) with an explicit variable lookup.
    ///
    /// Only push observation needs the socket, so its placeholders are not
    /// expanded until then.
    pub fn ws_endpoint_with<F>(&self, lookup: F) -> Result<Option<String>, ChainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw) = &self.ws_url else {
            return Ok(None);
        };
        let ws = expand_env(raw, &self.network, lookup)?;
        if !validate_ws_url(&ws) {
            return Err(ChainError::InvalidUrl(format!("{}: {ws}", self.network)));
        }
        Ok(Some(ws))
    }
}

/// Per-network RPC endpoints with custom override support.
///
/// Entries are resolved lazily so that a network whose URL template needs an
/// unset variable only fails when it is actually selected.
#[derive(Debug, Clone)]
pub struct RpcConfigStore {
    config: WatchConfig,
    overrides: HashMap<String, String>,
}

impl RpcConfigStore {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            overrides: HashMap::new(),
        }
    }

    /// Name of the network used when none is given.
    pub fn default_network(&self) -> &str {
        &self.config.default_network
    }

    /// Resolve a network against the process environment.
    pub fn get_rpc(&self, network: &str) -> Result<RpcConfig, ChainError> {
        self.resolve_with(network, process_env)
    }

    /// Resolve a network, expanding `${VAR}` placeholders through `lookup`.
    pub fn resolve_with<F>(&self, network: &str, lookup: F) -> Result<RpcConfig, ChainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (name, entry) = self
            .config
            .network(network)
            .map_err(|_| ChainError::UnknownNetwork(network.to_string()))?;

        let (url, is_custom) = match self.overrides.get(name) {
            Some(custom) => (custom.clone(), true),
            None => (expand_env(&entry.url, name, &lookup)?, false),
        };
        if !validate_url(&url) {
            return Err(ChainError::InvalidUrl(format!("{name}: {url}")));
        }

        Ok(RpcConfig {
            network: name.to_string(),
            url,
            ws_url: entry.ws_url.clone(),
            chain_id: entry.chain_id,
            is_custom,
            timeout_secs: entry.timeout_secs,
        })
    }

    /// Override the HTTP RPC URL for a network with a custom endpoint.
    pub fn set_custom_rpc(&mut self, network: &str, url: String) -> Result<(), ChainError> {
        if !validate_url(&url) {
            return Err(ChainError::InvalidUrl(url));
        }
        let (name, _) = self
            .config
            .network(network)
            .map_err(|_| ChainError::UnknownNetwork(network.to_string()))?;
        self.overrides.insert(name.to_string(), url);
        Ok(())
    }

    /// Drop a custom override, going back to the configured URL.
    pub fn reset_to_default(&mut self, network: &str) {
        if let Ok((name, _)) = self.config.network(network) {
            let name = name.to_string();
            self.overrides.remove(&name);
        }
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    has_scheme(url, &["http", "https"])
}

/// Validate that a URL is well-formed and uses WS or WSS.
pub fn validate_ws_url(url: &str) -> bool {
    has_scheme(url, &["ws", "wss"])
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => schemes.contains(&parsed.scheme()) && parsed.host().is_some(),
        Err(_) => false,
    }
}
