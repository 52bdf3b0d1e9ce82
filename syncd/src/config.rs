use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cli::Args;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub rpc: RpcConfig,
    pub notifications: NotificationsConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Apply pending migrations at startup
    pub migrate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Publishing is disabled when unset
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_pending_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/ledger.db"),
            migrate: false,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:16110".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_pending_retries: 100 }
    }
}

impl Config {
    /// Load configuration from file if it exists, otherwise use defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Override config with CLI arguments
    pub fn apply_cli_overrides(&mut self, args: &Args) {
        if let Some(database_path) = &args.database_path {
            self.database.path = database_path.clone();
        }

        if args.migrate {
            self.database.migrate = true;
        }

        if let Some(rpc_url) = &args.rpc_url {
            self.rpc.url = rpc_url.clone();
        }

        if let Some(redis_url) = &args.redis_url {
            self.notifications.redis_url = Some(redis_url.clone());
        }

        if let Some(retries) = args.max_pending_retries {
            self.sync.max_pending_retries = retries;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let rpc_url = Url::parse(&self.rpc.url)
            .map_err(|e| SyncError::Config(format!("Invalid rpc url {}: {}", self.rpc.url, e)))?;
        if !matches!(rpc_url.scheme(), "ws" | "wss") {
            return Err(SyncError::Config(format!(
                "rpc url must use ws or wss, got {}",
                rpc_url.scheme()
            )));
        }

        if let Some(redis_url) = &self.notifications.redis_url {
            let parsed = Url::parse(redis_url)
                .map_err(|e| SyncError::Config(format!("Invalid redis url {}: {}", redis_url, e)))?;
            if !matches!(parsed.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
                return Err(SyncError::Config(format!(
                    "redis url must use a redis scheme, got {}",
                    parsed.scheme()
                )));
            }
        }

        if self.sync.max_pending_retries == 0 {
            return Err(SyncError::Config("max_pending_retries must be at least 1".to_string()));
        }

        if self.database.path.as_os_str().is_empty() {
            return Err(SyncError::Config("database path is empty".to_string()));
        }

        Ok(())
    }
}
