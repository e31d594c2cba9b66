//! Engine configuration and per-call options.

use serde::{Deserialize, Serialize};
use std::env;

/// Options for [`Engine::mutate`](crate::Engine::mutate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MutateOptions {
    /// Apply once to server and computed state without queueing
    pub direct: bool,
    /// Queue the mutation but never hand it to the transport
    pub local: bool,
}

impl MutateOptions {
    pub fn direct() -> Self {
        Self {
            direct: true,
            ..Self::default()
        }
    }

    pub fn local() -> Self {
        Self {
            local: true,
            ..Self::default()
        }
    }
}

/// Options for [`Engine::rebase`](crate::Engine::rebase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RebaseOptions {
    /// Accept synced and reference fields
    pub allow_server_fields: bool,
    /// Accept local-only fields
    pub allow_local_fields: bool,
    /// Patch computed state directly instead of replaying the queue
    pub direct: bool,
}

impl Default for RebaseOptions {
    fn default() -> Self {
        Self {
            allow_server_fields: true,
            allow_local_fields: false,
            direct: false,
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Options used by [`Engine::rebase_default`](crate::Engine::rebase_default)
    pub rebase_defaults: RebaseOptions,
    /// Reject snapshots written under a different schema version
    pub verify_schema_version: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rebase_defaults: RebaseOptions::default(),
            verify_schema_version: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            rebase_defaults: RebaseOptions {
                allow_server_fields: env_bool(
                    "REPLICA_ALLOW_SERVER_FIELDS",
                    defaults.rebase_defaults.allow_server_fields,
                )?,
                allow_local_fields: env_bool(
                    "REPLICA_ALLOW_LOCAL_FIELDS",
                    defaults.rebase_defaults.allow_local_fields,
                )?,
                direct: env_bool("REPLICA_DIRECT_REBASE", defaults.rebase_defaults.direct)?,
            },
            verify_schema_version: env_bool(
                "REPLICA_VERIFY_SCHEMA_VERSION",
                defaults.verify_schema_version,
            )?,
        })
    }
}

fn env_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var) {
        Ok(value) => parse_bool(&value).ok_or(ConfigError::InvalidBool { var, value }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid boolean for {var}: {value}")]
    InvalidBool { var: &'static str, value: String },
}
