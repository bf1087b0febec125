use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::{error, warn};

/// One row of the block table: where a block lives and what it contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRow {
    pub block_id: String,
    pub block_num: usize,
    pub file_id: String,
    pub original_filename: String,
    pub size: usize,
    pub hash: String,
    pub primary_node: String,
    pub replica_node: String,
    pub status: String,
    pub created_at: f64,
}

/// `block_table.json`: per-block placement plus per-peer usage accounting
/// in whole megabytes (one per block side, regardless of the last block's
/// real size).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockTableDoc {
    #[serde(default)]
    pub blocks: BTreeMap<String, BlockRow>,
    #[serde(default)]
    pub node_usage: BTreeMap<String, u64>,
}

/// One row of `file_index.json`: how to reassemble a distributed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileIndexEntry {
    pub original_filename: String,
    pub block_ids: Vec<String>,
    pub total_blocks: usize,
    pub created_at: f64,
    pub size: u64,
}

pub type FileIndexDoc = BTreeMap<String, FileIndexEntry>;

/// Listing row for the distributed plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedFile {
    pub file_id: String,
    pub filename: String,
    pub size: u64,
    pub total_blocks: usize,
    pub created_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_files: usize,
    pub total_blocks: usize,
    pub node_usage: BTreeMap<String, u64>,
    pub node_capacity: BTreeMap<String, u64>,
    pub node_free_space: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDetail {
    pub block_id: String,
    pub block_num: usize,
    pub size: usize,
    pub primary_node: String,
    pub replica_node: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub original_filename: String,
    pub block_ids: Vec<String>,
    pub total_blocks: usize,
    pub created_at: f64,
    pub size: u64,
    pub blocks_detail: Vec<BlockDetail>,
}

/// The two placement documents, typed in memory and rewritten whole on
/// every mutation. All access goes through the block manager's mutex.
#[derive(Debug)]
pub struct Tables {
    block_table_file: PathBuf,
    file_index_file: PathBuf,
    pub block_table: BlockTableDoc,
    pub file_index: FileIndexDoc,
}

impl Tables {
    /// Loads both documents. A missing or corrupt file degrades to the
    /// empty document and gets overwritten on the next save.
    pub fn load(config: &Config) -> Self {
        let block_table_file = config.block_table_file();
        let file_index_file = config.file_index_file();

        let mut block_table: BlockTableDoc = read_json(&block_table_file).unwrap_or_default();
        let file_index: FileIndexDoc = read_json(&file_index_file).unwrap_or_default();

        for name in config.node_names() {
            block_table.node_usage.entry(name).or_insert(0);
        }

        Tables {
            block_table_file,
            file_index_file,
            block_table,
            file_index,
        }
    }

    pub fn save_block_table(&self) {
        write_json(&self.block_table_file, &self.block_table);
    }

    pub fn save_file_index(&self) {
        write_json(&self.file_index_file, &self.file_index);
    }

    pub fn usage_of(&self, node: &str) -> u64 {
        self.block_table.node_usage.get(node).copied().unwrap_or(0)
    }

    pub fn charge(&mut self, node: &str, mb: u64) {
        *self
            .block_table
            .node_usage
            .entry(node.to_string())
            .or_insert(0) += mb;
    }

    /// Usage never goes below zero, even when deletes outnumber the
    /// charges this node saw.
    pub fn discharge(&mut self, node: &str, mb: u64) {
        if let Some(used) = self.block_table.node_usage.get_mut(node) {
            *used = used.saturating_sub(mb);
        }
    }

    /// First-writer-wins union: rows already present locally are kept.
    /// Usage accounting is local and is not gossiped.
    pub fn merge_block_table(&mut self, remote: BlockTableDoc) -> usize {
        let mut added = 0;
        for (block_id, row) in remote.blocks {
            if !self.block_table.blocks.contains_key(&block_id) {
                self.block_table.blocks.insert(block_id, row);
                added += 1;
            }
        }
        added
    }

    pub fn merge_file_index(&mut self, remote: FileIndexDoc) -> usize {
        let mut added = 0;
        for (file_id, entry) in remote {
            if !self.file_index.contains_key(&file_id) {
                self.file_index.insert(file_id, entry);
                added += 1;
            }
        }
        added
    }

    /// Block rows whose owning file has left the file index.
    pub fn orphan_rows(&self) -> Vec<BlockRow> {
        self.block_table
            .blocks
            .values()
            .filter(|row| !self.file_index.contains_key(&row.file_id))
            .cloned()
            .collect()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Option<T> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!("corrupt document {} ({}), resetting", path.display(), e);
            None
        }
    }
}

fn write_json<T: Serialize>(path: &PathBuf, doc: &T) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_string_pretty(doc) {
        Ok(raw) => {
            if let Err(e) = std::fs::write(path, raw) {
                error!("failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => error!("failed to serialize {}: {}", path.display(), e),
    }
}
