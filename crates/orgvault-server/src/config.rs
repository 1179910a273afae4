//! Server configuration for `OrgVault`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `ORGVAULT_*` environment variables.

use std::net::SocketAddr;

use chrono::Duration;
use orgvault_core::Secret;
use orgvault_core::token::DEFAULT_TOKEN_TTL_SECS;
use uuid::Uuid;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{name} must be set (or enable ORGVAULT_DEV_MODE for a throwaway key)")]
    Missing { name: &'static str },

    /// A variable is set but cannot be parsed.
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// HS256 key for session tokens.
    pub signing_key: Secret,
    /// Whether the signing key was generated for this process only.
    pub ephemeral_signing_key: bool,
    /// Optional server-side key mixed into every secret hash.
    pub hash_pepper: Option<Secret>,
    /// Session token lifetime.
    pub token_ttl: Duration,
    /// JSON seed document applied at startup.
    pub seed_file: Option<String>,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// Redb persistent storage.
    Redb { path: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on (binds to `0.0.0.0`)
    /// - `ORGVAULT_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `ORGVAULT_STORAGE`: `memory` or `redb` (default: `memory`)
    /// - `ORGVAULT_STORAGE_PATH`: redb file path (default: `./data/orgvault.redb`)
    /// - `ORGVAULT_LOG_LEVEL`: log filter (default: `info`)
    /// - `ORGVAULT_SIGNING_KEY`: token signing key (required unless dev mode)
    /// - `ORGVAULT_DEV_MODE`: generate a per-process signing key (default: `false`)
    /// - `ORGVAULT_HASH_PEPPER`: optional hashing pepper
    /// - `ORGVAULT_TOKEN_TTL_SECS`: token lifetime in seconds (default: `3600`)
    /// - `ORGVAULT_SEED_FILE`: seed document path (optional)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the signing key is missing outside dev mode
    /// or a value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Priority: ORGVAULT_BIND_ADDR > PORT > default 127.0.0.1:8300
        let bind_addr = if let Some(addr) = var("ORGVAULT_BIND_ADDR") {
            addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "ORGVAULT_BIND_ADDR",
                reason: e.to_string(),
            })?
        } else if let Some(port) = var("PORT") {
            let port: u16 = port.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?;
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8300))
        };

        let storage_path =
            var("ORGVAULT_STORAGE_PATH").unwrap_or_else(|| "./data/orgvault.redb".to_owned());

        let storage_backend = match var("ORGVAULT_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackendType::Memory,
            "redb" => StorageBackendType::Redb { path: storage_path },
            other => {
                return Err(ConfigError::Invalid {
                    name: "ORGVAULT_STORAGE",
                    reason: format!("unknown backend '{other}', expected memory or redb"),
                });
            }
        };

        let log_level = var("ORGVAULT_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let dev_mode = var("ORGVAULT_DEV_MODE").is_some_and(|v| v == "true" || v == "1");
        let (signing_key, ephemeral_signing_key) =
            match var("ORGVAULT_SIGNING_KEY").filter(|k| !k.is_empty()) {
                Some(key) => (Secret::from(key), false),
                None if dev_mode => (
                    Secret::from(format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())),
                    true,
                ),
                None => {
                    return Err(ConfigError::Missing {
                        name: "ORGVAULT_SIGNING_KEY",
                    });
                }
            };

        let hash_pepper = var("ORGVAULT_HASH_PEPPER")
            .filter(|p| !p.is_empty())
            .map(Secret::from);

        let token_ttl_secs = match var("ORGVAULT_TOKEN_TTL_SECS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    name: "ORGVAULT_TOKEN_TTL_SECS",
                    reason: format!("'{raw}' is not a positive number of seconds"),
                })?,
            None => DEFAULT_TOKEN_TTL_SECS,
        };
        let token_ttl =
            Duration::try_seconds(token_ttl_secs).ok_or_else(|| ConfigError::Invalid {
                name: "ORGVAULT_TOKEN_TTL_SECS",
                reason: format!("{token_ttl_secs} seconds is out of range"),
            })?;

        Ok(Self {
            bind_addr,
            storage_backend,
            log_level,
            signing_key,
            ephemeral_signing_key,
            hash_pepper,
            token_ttl,
            seed_file: var("ORGVAULT_SEED_FILE"),
        })
    }
}
