use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating, reading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Environment variable {var} is not set (referenced by network {network})")]
    MissingEnv { var: String, network: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Short hint for the user on how to fix the problem.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::MissingEnv { var, .. } => {
                Some(format!("export {var} or add it to a .env file in the working directory"))
            }
            Self::UnknownNetwork(_) => {
                Some("add a [networks.<name>] table to the config file".into())
            }
            Self::NoHomeDir => Some("pass --config with an explicit path".into()),
            _ => None,
        }
    }
}
