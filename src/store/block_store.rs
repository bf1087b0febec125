use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    Primary,
    Replica,
}

/// On-disk payload store. One file per block under
/// `blocks/primary/<block_id>.bin` or `blocks/replicas/<block_id>.bin`.
/// No in-memory caching; the page cache is enough.
#[derive(Debug, Clone)]
pub struct BlockStore {
    primary_dir: PathBuf,
    replica_dir: PathBuf,
}

impl BlockStore {
    pub fn new(blocks_dir: impl AsRef<Path>) -> Self {
        let blocks_dir = blocks_dir.as_ref();
        BlockStore {
            primary_dir: blocks_dir.join("primary"),
            replica_dir: blocks_dir.join("replicas"),
        }
    }

    fn dir_for(&self, role: BlockRole) -> &Path {
        match role {
            BlockRole::Primary => &self.primary_dir,
            BlockRole::Replica => &self.replica_dir,
        }
    }

    fn path_for(&self, block_id: &str, role: BlockRole) -> PathBuf {
        self.dir_for(role).join(format!("{}.bin", block_id))
    }

    pub async fn put(&self, block_id: &str, data: &[u8], role: BlockRole) -> bool {
        let dir = self.dir_for(role);
        if let Err(e) = fs::create_dir_all(dir).await {
            error!("failed to create block dir {}: {}", dir.display(), e);
            return false;
        }

        let path = self.path_for(block_id, role);
        let result = async {
            let mut file = fs::File::create(&path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("failed to write block {}: {}", block_id, e);
                false
            }
        }
    }

    /// Primary directory first, then replicas.
    pub async fn get(&self, block_id: &str) -> Option<Vec<u8>> {
        for role in [BlockRole::Primary, BlockRole::Replica] {
            let path = self.path_for(block_id, role);
            if let Ok(data) = fs::read(&path).await {
                return Some(data);
            }
        }
        None
    }

    /// Removes the block from both directories. Returns whether anything
    /// was actually deleted.
    pub async fn delete(&self, block_id: &str) -> bool {
        let mut deleted = false;
        for role in [BlockRole::Primary, BlockRole::Replica] {
            let path = self.path_for(block_id, role);
            if fs::remove_file(&path).await.is_ok() {
                deleted = true;
            }
        }
        deleted
    }

    pub async fn contains(&self, block_id: &str) -> bool {
        for role in [BlockRole::Primary, BlockRole::Replica] {
            if fs::try_exists(self.path_for(block_id, role))
                .await
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }
}
