//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// API listen address
    pub listen: String,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Stellar network configuration
    pub network: NetworkConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: cotravel_common::default_store_path(),
            listen: "127.0.0.1:4000".to_string(),
            auth: AuthConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for session tokens. Generated at startup when unset,
    /// which invalidates sessions across restarts.
    pub jwt_secret: Option<String>,

    /// Session lifetime in hours
    pub session_ttl_hours: i64,

    /// Login challenge lifetime in seconds
    pub challenge_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            session_ttl_hours: 24,
            challenge_ttl_secs: 300,
        }
    }
}

/// Stellar network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Soroban RPC endpoint
    pub rpc_url: String,

    /// Horizon endpoint, used for account balance lookups
    pub horizon_url: String,

    /// Network passphrase
    pub passphrase: String,

    /// Escrow contract id (C...)
    pub contract_id: Option<String>,

    /// Confirmation polling attempts
    pub confirm_attempts: u32,

    /// Confirmation polling interval in milliseconds
    pub confirm_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://soroban-testnet.stellar.org".to_string(),
            horizon_url: "https://horizon-testnet.stellar.org".to_string(),
            passphrase: "Test SDF Network ; September 2015".to_string(),
            contract_id: None,
            confirm_attempts: 30,
            confirm_interval_ms: 1000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = EngineConfig::default();
        config.listen = "0.0.0.0:8080".to_string();
        config.network.contract_id = Some("CDEADBEEF".to_string());
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.listen, "0.0.0.0:8080");
        assert_eq!(loaded.network.contract_id.as_deref(), Some("CDEADBEEF"));
        assert_eq!(loaded.auth.session_ttl_hours, 24);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = EngineConfig::load(std::path::Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.network.confirm_attempts, 30);
    }
}
