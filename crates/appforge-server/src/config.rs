//! Server configuration for appforge.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `APPFORGE_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Default request body limit (4 MiB), enough for large templates.
pub const DEFAULT_BODY_LIMIT: usize = 4 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Bearer token protecting the admin API. Unset means open.
    pub admin_token: Option<String>,
    /// Base URL deployed apps are published under.
    pub public_url: String,
    /// Overrides the default `api_key` format.
    pub credential_pattern: Option<String>,
    /// Directory of template JSON files stored at startup.
    pub templates_dir: Option<PathBuf>,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// Redb persistent storage.
    Redb { path: String },
}

impl StorageBackendType {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redb { .. } => "redb",
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on, binds to `0.0.0.0`
    /// - `APPFORGE_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `APPFORGE_STORAGE`: `memory` or `redb` (default: `memory`)
    /// - `APPFORGE_STORAGE_PATH`: database file for `redb` (default: `./data/appforge.redb`)
    /// - `APPFORGE_LOG_LEVEL`: log filter (default: `info`)
    /// - `APPFORGE_ADMIN_TOKEN`: bearer token for the admin API (optional)
    /// - `APPFORGE_PUBLIC_URL`: base of public app URLs (default: `http://{bind_addr}`)
    /// - `APPFORGE_CREDENTIAL_PATTERN`: regex every `api_key` must match (optional)
    /// - `APPFORGE_TEMPLATES_DIR`: directory of `*.json` templates to seed (optional)
    /// - `APPFORGE_BODY_LIMIT`: request body limit in bytes (default: 4 MiB)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Priority: APPFORGE_BIND_ADDR > PORT > default 127.0.0.1:8300
        let bind_addr = if let Some(addr) = lookup("APPFORGE_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8300)))
        } else if let Some(port_str) = lookup("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8300);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8300))
        };

        let storage_backend = match lookup("APPFORGE_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "redb" => StorageBackendType::Redb {
                path: lookup("APPFORGE_STORAGE_PATH")
                    .unwrap_or_else(|| "./data/appforge.redb".to_owned()),
            },
            _ => StorageBackendType::Memory,
        };

        let log_level = lookup("APPFORGE_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let public_url = lookup("APPFORGE_PUBLIC_URL")
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| format!("http://{bind_addr}"));

        let body_limit = lookup("APPFORGE_BODY_LIMIT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BODY_LIMIT);

        Self {
            bind_addr,
            storage_backend,
            log_level,
            admin_token: lookup("APPFORGE_ADMIN_TOKEN").filter(|t| !t.trim().is_empty()),
            public_url,
            credential_pattern: lookup("APPFORGE_CREDENTIAL_PATTERN").filter(|p| !p.trim().is_empty()),
            templates_dir: lookup("APPFORGE_TEMPLATES_DIR").map(PathBuf::from),
            body_limit,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert_eq!(config.bind_addr, "127.0.0.1:8300".parse().unwrap());
        assert_eq!(config.storage_backend, StorageBackendType::Memory);
        assert_eq!(config.public_url, "http://127.0.0.1:8300");
        assert_eq!(config.body_limit, DEFAULT_BODY_LIMIT);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn port_binds_all_interfaces_unless_overridden() {
        assert_eq!(config(&[("PORT", "9000")]).bind_addr, "0.0.0.0:9000".parse().unwrap());
        let both = config(&[("PORT", "9000"), ("APPFORGE_BIND_ADDR", "127.0.0.1:7000")]);
        assert_eq!(both.bind_addr, "127.0.0.1:7000".parse().unwrap());
    }

    #[test]
    fn redb_storage_and_blank_values() {
        let config = config(&[
            ("APPFORGE_STORAGE", "REDB"),
            ("APPFORGE_STORAGE_PATH", "/tmp/a.redb"),
            ("APPFORGE_ADMIN_TOKEN", "  "),
            ("APPFORGE_PUBLIC_URL", "https://apps.example.com"),
        ]);
        assert_eq!(
            config.storage_backend,
            StorageBackendType::Redb {
                path: "/tmp/a.redb".into()
            }
        );
        assert!(config.admin_token.is_none());
        assert_eq!(config.public_url, "https://apps.example.com");
    }
}
