use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_heartbeat_interval() -> u64 {
    3
}

fn default_node_timeout() -> u64 {
    8
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from("shared_dir")
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ip: String,
    /// Port of the external web surface for this node. The core never
    /// listens on it; it is kept in the directory so wrappers can find it.
    pub port: u16,
    pub capacity_mb: u64,
}

/// Cluster configuration, loaded once at start-up and passed to every
/// component explicitly. The node list keeps file order: allocation ties
/// are broken by directory order.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub this_node: String,
    pub network_port: u16,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    #[serde(default = "default_node_timeout")]
    pub node_timeout: u64,
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
    pub nodes: Vec<NodeInfo>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node(&self.this_node).is_none() {
            anyhow::bail!(
                "node '{}' is not present in the peer directory (known: {})",
                self.this_node,
                self.node_names().join(", ")
            );
        }
        if self.block_size == 0 {
            anyhow::bail!("block_size must be greater than zero");
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    /// Every peer except this process.
    pub fn remote_nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.iter().filter(move |n| n.name != self.this_node)
    }

    pub fn capacity_of(&self, name: &str) -> u64 {
        self.node(name).map(|n| n.capacity_mb).unwrap_or(0)
    }

    /// Address of a peer's network listener. The network port is the same
    /// across the cluster.
    pub fn network_addr(&self, name: &str) -> Option<String> {
        self.node(name)
            .map(|n| format!("{}:{}", n.ip, self.network_port))
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.shared_dir.join("blocks")
    }

    pub fn block_table_file(&self) -> PathBuf {
        self.shared_dir.join("block_table.json")
    }

    pub fn file_index_file(&self) -> PathBuf {
        self.shared_dir.join("file_index.json")
    }

    pub fn operations_file(&self) -> PathBuf {
        self.shared_dir.join("operations.json")
    }

    pub fn pending_file(&self) -> PathBuf {
        self.shared_dir.join("pending_operations.json")
    }
}
