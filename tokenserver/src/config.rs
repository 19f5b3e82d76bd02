//! Token server configuration
//!
//! Settings come from an optional JSON file (path in `TOKENSERVER_CONFIG`)
//! with individual `TOKENSERVER_*` environment variables layered on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use thiserror::Error;
use tokenserver_core::{KeyPair, PublicKey, TrustAnchors};

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "TOKENSERVER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {reason}")]
    InvalidVar { var: String, reason: String },

    #[error("Invalid key file {path:?}: {reason}")]
    InvalidKey { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    pub url: String,
    pub capacity: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    pub port: u16,

    /// Audience assertions must be addressed to, `*` for any
    pub audience: String,

    /// Issuer domain → root public key
    pub trusted_roots: TrustAnchors,

    /// Issuers allowed to vouch for principals outside their own domain
    pub secondary_issuers: Vec<String>,

    pub worker_pool_size: usize,
    pub worker_timeout_ms: u64,
    pub backend_timeout_ms: u64,

    /// Storage nodes registered at startup
    pub nodes: Vec<NodeConfig>,

    /// Accepted `app/version` pairs
    pub services: Vec<String>,

    pub token_ttl_secs: u64,

    /// SQLite database; in-memory assignment when unset
    pub database_path: Option<String>,

    /// Where the token signing key is kept
    pub key_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            audience: "http://localhost:5000".to_string(),
            trusted_roots: TrustAnchors::new(),
            secondary_issuers: Vec::new(),
            worker_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            worker_timeout_ms: 5_000,
            backend_timeout_ms: 2_000,
            nodes: Vec::new(),
            services: vec!["sync/1.1".to_string(), "sync/1.5".to_string()],
            token_ttl_secs: 300,
            database_path: None,
            key_file: "tokenserver-key".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load `TOKENSERVER_CONFIG` if set, then apply environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(format!("{}CONFIG", ENV_PREFIX)) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())?;
        Ok(config)
    }

    /// Override fields from `lookup`, which receives variable names without
    /// the `TOKENSERVER_` prefix.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORT") {
            self.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = lookup("AUDIENCE") {
            self.audience = v;
        }
        if let Some(v) = lookup("TRUSTED_ROOTS") {
            self.trusted_roots = parse_roots(&v)?;
        }
        if let Some(v) = lookup("SECONDARY_ISSUERS") {
            self.secondary_issuers = split_list(&v).map(str::to_string).collect();
        }
        if let Some(v) = lookup("WORKER_POOL_SIZE") {
            self.worker_pool_size = parse_var("WORKER_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("WORKER_TIMEOUT_MS") {
            self.worker_timeout_ms = parse_var("WORKER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("BACKEND_TIMEOUT_MS") {
            self.backend_timeout_ms = parse_var("BACKEND_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("NODES") {
            self.nodes = parse_nodes(&v)?;
        }
        if let Some(v) = lookup("SERVICES") {
            self.services = split_list(&v).map(str::to_string).collect();
        }
        if let Some(v) = lookup("TOKEN_TTL_SECS") {
            self.token_ttl_secs = parse_var("TOKEN_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database_path = Some(v).filter(|p| !p.is_empty());
        }
        if let Some(v) = lookup("KEY_FILE") {
            self.key_file = v;
        }
        Ok(())
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_var<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidVar {
        var: format!("{}{}", ENV_PREFIX, var),
        reason: e.to_string(),
    })
}

/// `domain=base64key,domain=base64key`
fn parse_roots(raw: &str) -> Result<TrustAnchors, ConfigError> {
    split_list(raw)
        .map(|entry| -> Result<(String, PublicKey), ConfigError> {
            let (domain, key) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidVar {
                var: format!("{}TRUSTED_ROOTS", ENV_PREFIX),
                reason: format!("expected domain=key, got {:?}", entry),
            })?;
            let key = PublicKey::from_base64(key.trim()).map_err(|e| ConfigError::InvalidVar {
                var: format!("{}TRUSTED_ROOTS", ENV_PREFIX),
                reason: e.to_string(),
            })?;
            Ok((domain.trim().to_string(), key))
        })
        .collect()
}

/// `url=capacity,url=capacity`; the capacity is split off the last `=`
fn parse_nodes(raw: &str) -> Result<Vec<NodeConfig>, ConfigError> {
    split_list(raw)
        .map(|entry| -> Result<NodeConfig, ConfigError> {
            let (url, capacity) = entry.rsplit_once('=').ok_or_else(|| ConfigError::InvalidVar {
                var: format!("{}NODES", ENV_PREFIX),
                reason: format!("expected url=capacity, got {:?}", entry),
            })?;
            Ok(NodeConfig {
                url: url.trim().to_string(),
                capacity: parse_var("NODES", capacity)?,
            })
        })
        .collect()
}

/// Load the signing key seed from `path`, creating a fresh key there if the
/// file does not exist yet.
pub fn load_or_generate_keypair(path: impl AsRef<Path>) -> Result<KeyPair, ConfigError> {
    let path = path.as_ref();
    let invalid = |reason: String| ConfigError::InvalidKey {
        path: path.to_path_buf(),
        reason,
    };

    if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let seed = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|e| invalid(e.to_string()))?;
        return KeyPair::from_seed(&seed).map_err(|e| invalid(e.to_string()));
    }

    let keypair = KeyPair::generate();
    std::fs::write(path, URL_SAFE_NO_PAD.encode(keypair.secret_bytes())).map_err(|source| {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    tracing::info!(path = %path.display(), "Generated new signing key");
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert!(config.worker_pool_size >= 1);
        assert_eq!(config.token_ttl(), Duration::from_secs(300));
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let root = KeyPair::generate().public_key();
        let body = serde_json::json!({
            "audience": "https://service.example",
            "trusted_roots": { "IdP.example": root },
            "nodes": [{ "url": "https://node1.example", "capacity": 100 }],
            "worker_timeout_ms": 250
        });
        std::fs::write(&path, body.to_string()).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.audience, "https://service.example");
        assert_eq!(config.trusted_roots.get("idp.example"), Some(&root));
        assert_eq!(config.nodes[0].capacity, 100);
        assert_eq!(config.worker_timeout(), Duration::from_millis(250));
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_env_overrides() {
        let root = KeyPair::generate().public_key();
        let roots = format!("idp.example={}", root.to_base64());
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("PORT", "8080"),
                ("TRUSTED_ROOTS", roots.as_str()),
                ("NODES", "https://a.example:8443=10, https://b.example=20"),
                ("SERVICES", "sync/1.5"),
                ("SECONDARY_ISSUERS", "loadtest.local"),
                ("DATABASE_PATH", ""),
            ]))
            .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.trusted_roots.get("idp.example"), Some(&root));
        assert_eq!(
            config.nodes,
            vec![
                NodeConfig { url: "https://a.example:8443".into(), capacity: 10 },
                NodeConfig { url: "https://b.example".into(), capacity: 20 },
            ]
        );
        assert_eq!(config.services, vec!["sync/1.5".to_string()]);
        assert_eq!(config.secondary_issuers, vec!["loadtest.local".to_string()]);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_bad_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("TOKENSERVER_PORT"));
    }

    #[test]
    fn test_keypair_is_generated_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");

        let first = load_or_generate_keypair(&path).unwrap();
        let second = load_or_generate_keypair(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_corrupt_key_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, "definitely not a key").unwrap();
        assert!(matches!(
            load_or_generate_keypair(&path),
            Err(ConfigError::InvalidKey { .. })
        ));
    }
}
