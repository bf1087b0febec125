use super::{BlockManager, PlacedBlock};
use crate::packets::{parse_reply, Ack, MessageBody};
use crate::store::{BlockRole, FileIndexEntry};
use crate::util::now_ts;
use crate::{error, storage};

impl BlockManager {
    /// Ships every placed block to its two hosts: a local disk write for
    /// whichever side is this node, one `store_block` message for a remote
    /// side. A failed block marks the whole distribution failed but does
    /// not stop the others, and nothing is rolled back. The file-index row
    /// is written either way so the upload is visible and retryable.
    pub async fn distribute(
        &self,
        placed: &[PlacedBlock],
        file_id: &str,
        original_name: &str,
    ) -> bool {
        let mut success = true;
        let this = self.config.this_node.clone();

        for pb in placed {
            let sides = [
                (&pb.primary_node, BlockRole::Primary),
                (&pb.replica_node, BlockRole::Replica),
            ];
            for (node, role) in sides {
                let stored = if *node == this {
                    self.store.put(&pb.block.block_id, &pb.block.data, role).await
                } else {
                    self.send_block_to_node(pb, node, role == BlockRole::Replica)
                        .await
                };
                if !stored {
                    error!(
                        "failed to place block {} on {} ({:?})",
                        pb.block.block_id, node, role
                    );
                    success = false;
                }
            }
        }

        let block_ids: Vec<String> = placed.iter().map(|pb| pb.block.block_id.clone()).collect();
        let total_blocks = block_ids.len();
        let size: u64 = placed.iter().map(|pb| pb.block.size as u64).sum();

        let mut state = self.state.lock().await;
        state.file_index.insert(
            file_id.to_string(),
            FileIndexEntry {
                original_filename: original_name.to_string(),
                block_ids,
                total_blocks,
                created_at: now_ts(),
                size,
            },
        );
        state.save_file_index();

        storage!(
            "distributed {} as {} blocks ({})",
            original_name,
            total_blocks,
            if success { "complete" } else { "incomplete" }
        );
        success
    }

    async fn send_block_to_node(&self, pb: &PlacedBlock, node: &str, is_replica: bool) -> bool {
        let body = MessageBody::StoreBlock {
            block_id: pb.block.block_id.clone(),
            block_data: base64::encode(&pb.block.data),
            is_replica,
        };
        match self.sender.send(node, body).await {
            Some(reply) => parse_reply::<Ack>(reply)
                .map(|ack| ack.status.is_ok())
                .unwrap_or(false),
            None => false,
        }
    }
}
