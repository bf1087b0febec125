mod allocate;
mod delete;
mod distribute;
mod reconstruct;
mod split;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::network::MessageSender;
use crate::store::{
    BlockDetail, BlockRole, BlockStore, BlockTableDoc, DistributedFile, FileAttributes,
    FileIndexDoc, SystemStats, Tables,
};

pub use allocate::PlacedBlock;

#[derive(Debug, Error)]
pub enum AllocError {
    /// Fewer than two peers with free space: a block cannot get a primary
    /// and a replica on distinct hosts.
    #[error("not enough peers with free space for primary and replica placement")]
    InsufficientReplicas,
}

/// An in-memory block produced by splitting a file. Payload stays raw
/// bytes; base-64 happens only at the transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub block_id: String,
    pub block_num: usize,
    pub file_id: String,
    pub original_filename: String,
    pub size: usize,
    pub hash: String,
    pub data: Vec<u8>,
}

/// Owner of the placement tables and the local payload store; drives
/// splitting, placement, distribution, reconstruction and deletion.
/// Talks to the rest of the cluster only through the injected sender.
pub struct BlockManager {
    pub(crate) config: Arc<Config>,
    pub(crate) store: BlockStore,
    pub(crate) sender: Arc<dyn MessageSender>,
    pub(crate) state: Mutex<Tables>,
}

impl BlockManager {
    pub fn new(config: Arc<Config>, sender: Arc<dyn MessageSender>) -> Self {
        let store = BlockStore::new(config.blocks_dir());
        let state = Mutex::new(Tables::load(&config));
        BlockManager {
            config,
            store,
            sender,
            state,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.config.this_node
    }

    pub async fn block_table(&self) -> BlockTableDoc {
        self.state.lock().await.block_table.clone()
    }

    pub async fn file_index(&self) -> FileIndexDoc {
        self.state.lock().await.file_index.clone()
    }

    /// Union-merges a remote peer's tables into the local ones. Rows
    /// already known locally win; both documents are persisted under the
    /// same lock that guards every other table mutation.
    pub async fn sync_tables(
        &self,
        remote_table: BlockTableDoc,
        remote_index: FileIndexDoc,
    ) -> (usize, usize) {
        let mut state = self.state.lock().await;
        let added_blocks = state.merge_block_table(remote_table);
        let added_files = state.merge_file_index(remote_index);
        if added_blocks > 0 {
            state.save_block_table();
        }
        if added_files > 0 {
            state.save_file_index();
        }
        (added_blocks, added_files)
    }

    pub async fn all_files(&self) -> Vec<DistributedFile> {
        let state = self.state.lock().await;
        state
            .file_index
            .iter()
            .map(|(file_id, entry)| DistributedFile {
                file_id: file_id.clone(),
                filename: entry.original_filename.clone(),
                size: entry.size,
                total_blocks: entry.total_blocks,
                created_at: entry.created_at,
            })
            .collect()
    }

    pub async fn file_attributes(&self, file_id: &str) -> Option<FileAttributes> {
        let state = self.state.lock().await;
        let entry = state.file_index.get(file_id)?;

        let blocks_detail = entry
            .block_ids
            .iter()
            .map(|block_id| match state.block_table.blocks.get(block_id) {
                Some(row) => BlockDetail {
                    block_id: block_id.clone(),
                    block_num: row.block_num,
                    size: row.size,
                    primary_node: row.primary_node.clone(),
                    replica_node: row.replica_node.clone(),
                    hash: row.hash.clone(),
                },
                None => BlockDetail {
                    block_id: block_id.clone(),
                    block_num: 0,
                    size: 0,
                    primary_node: "unknown".to_string(),
                    replica_node: "unknown".to_string(),
                    hash: String::new(),
                },
            })
            .collect();

        Some(FileAttributes {
            original_filename: entry.original_filename.clone(),
            block_ids: entry.block_ids.clone(),
            total_blocks: entry.total_blocks,
            created_at: entry.created_at,
            size: entry.size,
            blocks_detail,
        })
    }

    pub async fn system_stats(&self) -> SystemStats {
        let state = self.state.lock().await;
        let node_usage = state.block_table.node_usage.clone();

        let mut node_capacity = BTreeMap::new();
        let mut node_free_space = BTreeMap::new();
        for node in &self.config.nodes {
            let used = node_usage.get(&node.name).copied().unwrap_or(0);
            node_capacity.insert(node.name.clone(), node.capacity_mb);
            node_free_space.insert(node.name.clone(), node.capacity_mb as i64 - used as i64);
        }

        SystemStats {
            total_files: state.file_index.len(),
            total_blocks: state.block_table.blocks.len(),
            node_usage,
            node_capacity,
            node_free_space,
        }
    }

    // Local payload plumbing used by the request handlers.

    pub async fn store_block_local(&self, block_id: &str, data: &[u8], is_replica: bool) -> bool {
        let role = if is_replica {
            BlockRole::Replica
        } else {
            BlockRole::Primary
        };
        self.store.put(block_id, data, role).await
    }

    pub async fn read_block_local(&self, block_id: &str) -> Option<Vec<u8>> {
        self.store.get(block_id).await
    }

    pub async fn delete_block_local(&self, block_id: &str) -> bool {
        self.store.delete(block_id).await
    }
}
