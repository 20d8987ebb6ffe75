//! Runtime configuration: defaults, TOML file, environment, then CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cli::Args;
use crate::error::{MirrorError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub log_level: String,
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub ws_url: String,
    pub reconnect_delay_secs: u64,
    pub ready_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://testnet.ckb.dev/ws".to_string(),
            reconnect_delay_secs: 5,
            ready_timeout_secs: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./ckb_mirror.db"),
            max_connections: 10,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl NodeConfig {
    pub fn connection_config(&self) -> rpc_wrpc::ConnectionConfig {
        rpc_wrpc::ConnectionConfig {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            ready_timeout: self.ready_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Config {
    /// Reads a TOML file. Missing sections and keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| MirrorError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| MirrorError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Builds the effective configuration for the binary.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.apply_cli_overrides(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CKB_WS_RPC_URL") {
            self.node.ws_url = url;
        }
        if let Some(database) = lookup("DATABASE_URL") {
            let path = database.strip_prefix("sqlite:").unwrap_or(&database);
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| MirrorError::Config(format!("PORT is not a valid port: {port}")))?;
        }
        Ok(())
    }

    pub fn apply_cli_overrides(&mut self, args: &Args) {
        if let Some(url) = &args.node_url {
            self.node.ws_url = url.clone();
        }
        if let Some(database) = &args.database {
            self.storage.database_path = database.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if args.json_logs {
            self.json_logs = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.node.ws_url)
            .map_err(|e| MirrorError::Config(format!("invalid node url {}: {}", self.node.ws_url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(MirrorError::Config(format!(
                "node url must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if self.server.port == 0 {
            return Err(MirrorError::Config("server port must be non-zero".to_string()));
        }
        if self.storage.max_connections == 0 {
            return Err(MirrorError::Config("storage.max_connections must be at least 1".to_string()));
        }
        Ok(())
    }
}
