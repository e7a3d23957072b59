use crate::error::{BlockchainError, Result};
use crate::wallet::validate_address;
use log::debug;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_NODE_ID: &str = "3000";
const DEFAULT_SEED_NODE: &str = "localhost:3000";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_DIFFICULTY: u32 = 16;
const DEFAULT_MEMPOOL_THRESHOLD: usize = 2;

const NODE_ID_KEY: &str = "NODE_ID";
const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const SEED_NODE_KEY: &str = "SEED_NODE";

/// Node settings: built-in defaults, then an optional TOML file, then the environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub node_id: String,
    /// Address this node listens on; `localhost:<node_id>` when unset.
    pub node_addr: Option<String>,
    /// Static peer list. The first entry is the seed node.
    pub seed_nodes: Vec<String>,
    pub mining_addr: Option<String>,
    pub data_dir: PathBuf,
    pub difficulty: u32,
    pub mempool_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_id: DEFAULT_NODE_ID.to_string(),
            node_addr: None,
            seed_nodes: vec![DEFAULT_SEED_NODE.to_string()],
            mining_addr: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            difficulty: DEFAULT_DIFFICULTY,
            mempool_threshold: DEFAULT_MEMPOOL_THRESHOLD,
        }
    }
}

impl Config {
    /// Loads defaults, overlays `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Config> {
        Ok(toml::from_str(contents)?)
    }

    /// Overrides fields from `NODE_ID`, `NODE_ADDRESS`, `MINING_ADDRESS` and `SEED_NODE`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(node_id) = lookup(NODE_ID_KEY) {
            debug!("{NODE_ID_KEY} overrides node id: {node_id}");
            self.node_id = node_id;
        }
        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            self.node_addr = Some(addr);
        }
        if let Some(addr) = lookup(MINING_ADDRESS_KEY) {
            self.mining_addr = Some(addr);
        }
        if let Some(seed) = lookup(SEED_NODE_KEY) {
            self.seed_nodes.retain(|node| *node != seed);
            self.seed_nodes.insert(0, seed);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(BlockchainError::Config("node_id must not be empty".to_string()));
        }
        if self.difficulty > 256 {
            return Err(BlockchainError::Config(format!(
                "difficulty {} exceeds 256 bits",
                self.difficulty
            )));
        }
        if self.seed_nodes.is_empty() {
            return Err(BlockchainError::Config(
                "at least one seed node is required".to_string(),
            ));
        }
        if let Some(addr) = &self.mining_addr {
            if !validate_address(addr) {
                return Err(BlockchainError::InvalidAddress(addr.clone()));
            }
        }
        Ok(())
    }

    pub fn node_addr(&self) -> String {
        self.node_addr
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", self.node_id))
    }

    pub fn seed_node(&self) -> &str {
        self.seed_nodes
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_SEED_NODE)
    }

    /// Chain database of this node.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("node_{}", self.node_id))
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.dat", self.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node_addr(), "localhost:3000");
        assert_eq!(config.seed_node(), "localhost:3000");
        assert_eq!(config.difficulty, 16);
        assert_eq!(config.mempool_threshold, 2);
        assert_eq!(config.db_path(), PathBuf::from("data").join("node_3000"));
        assert_eq!(config.wallet_path(), PathBuf::from("data").join("wallet_3000.dat"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = Config::from_toml(
            r#"
            node_id = "3001"
            seed_nodes = ["localhost:3000", "localhost:3002"]
            difficulty = 8
            data_dir = "/tmp/ledger"
            "#,
        )
        .unwrap();

        assert_eq!(config.node_addr(), "localhost:3001");
        assert_eq!(config.seed_nodes.len(), 2);
        assert_eq!(config.difficulty, 8);
        assert_eq!(config.mempool_threshold, 2);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/ledger/node_3001"));
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        assert!(matches!(
            Config::from_toml("dificulty = 3"),
            Err(BlockchainError::Config(_))
        ));
    }

    #[test]
    fn test_environment_wins() {
        let env: HashMap<&str, &str> = [
            ("NODE_ID", "3005"),
            ("NODE_ADDRESS", "127.0.0.1:3005"),
            ("SEED_NODE", "127.0.0.1:4000"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.node_id, "3005");
        assert_eq!(config.node_addr(), "127.0.0.1:3005");
        assert_eq!(config.seed_node(), "127.0.0.1:4000");
        assert_eq!(config.seed_nodes.len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            difficulty: 300,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            mining_addr: Some("not-an-address".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BlockchainError::InvalidAddress(_))
        ));

        let config = Config {
            seed_nodes: vec![],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "mempool_threshold = 5\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.mempool_threshold, 5);
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
