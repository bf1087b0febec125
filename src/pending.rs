use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::util::now_ts;
use crate::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    TransferFile,
    TransferFolder,
    Delete,
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PendingKind::TransferFile => "transfer_file",
            PendingKind::TransferFolder => "transfer_folder",
            PendingKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A deferred operation waiting for its peer to come back. `source_node`
/// is the peer responsible for replaying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    #[serde(rename = "type")]
    pub kind: PendingKind,
    pub source_node: String,
    pub timestamp: f64,
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
}

/// Persistent, timestamp-ordered queue of deferred transfers and deletes.
/// Every mutation rewrites `pending_operations.json`.
#[derive(Debug)]
pub struct PendingOperations {
    file: PathBuf,
    queue: Mutex<Vec<PendingOperation>>,
}

impl PendingOperations {
    pub fn load(file: impl AsRef<Path>) -> Self {
        let file = file.as_ref().to_path_buf();
        let queue = match std::fs::read_to_string(&file) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(ops) => ops,
                Err(e) => {
                    warn!("corrupt pending queue ({}), resetting", e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        PendingOperations {
            file,
            queue: Mutex::new(queue),
        }
    }

    fn save(&self, queue: &[PendingOperation]) {
        if let Some(parent) = self.file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(raw) = serde_json::to_string_pretty(queue) {
            if let Err(e) = std::fs::write(&self.file, raw) {
                warn!("failed to persist pending queue: {}", e);
            }
        }
    }

    pub fn enqueue(
        &self,
        kind: PendingKind,
        source_node: &str,
        target_node: Option<&str>,
        filename: &str,
    ) -> PendingOperation {
        let timestamp = now_ts();
        let op = PendingOperation {
            kind,
            source_node: source_node.to_string(),
            timestamp,
            id: format!("{}_{}_{}", kind, target_node.unwrap_or("any"), timestamp),
            filename: filename.to_string(),
            target_node: target_node.map(str::to_string),
        };

        let mut queue = self.queue.lock().unwrap();
        queue.push(op.clone());
        self.save(&queue);
        op
    }

    /// Removes and returns every entry owned by `source_node`. This is the
    /// destructive read behind `get_pending_operations`.
    pub fn drain_for(&self, source_node: &str) -> Vec<PendingOperation> {
        let mut queue = self.queue.lock().unwrap();
        let drained: Vec<PendingOperation> = queue
            .iter()
            .filter(|op| op.source_node == source_node)
            .cloned()
            .collect();
        if !drained.is_empty() {
            queue.retain(|op| op.source_node != source_node);
            self.save(&queue);
        }
        drained
    }

    pub fn snapshot(&self) -> Vec<PendingOperation> {
        self.queue.lock().unwrap().clone()
    }

    pub fn remove(&self, id: &str) {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.len();
        queue.retain(|op| op.id != id);
        if queue.len() != before {
            self.save(&queue);
        }
    }

    /// Adds entries pulled from peers, re-sorts by timestamp and persists.
    pub fn merge(&self, ops: Vec<PendingOperation>) {
        if ops.is_empty() {
            return;
        }
        let mut queue = self.queue.lock().unwrap();
        for op in ops {
            if !queue.iter().any(|existing| existing.id == op.id) {
                queue.push(op);
            }
        }
        queue.sort_by(|a, b| {
            a.timestamp
                .partial_cmp(&b.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.save(&queue);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
