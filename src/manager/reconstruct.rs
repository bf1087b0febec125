use super::BlockManager;
use crate::packets::{parse_reply, BlockDataReply, MessageBody};
use crate::util::md5_hex;
use crate::{storage, warn};

impl BlockManager {
    /// Rebuilds a file by concatenating its blocks in index order. Any
    /// block that cannot be found locally, on its primary, or on its
    /// replica fails the whole reconstruction.
    pub async fn reconstruct(&self, file_id: &str) -> Option<(Vec<u8>, String)> {
        let (block_ids, original_filename) = {
            let state = self.state.lock().await;
            let entry = state.file_index.get(file_id)?;
            (entry.block_ids.clone(), entry.original_filename.clone())
        };

        let mut data = Vec::new();
        for block_id in &block_ids {
            match self.fetch_block(block_id).await {
                Some(payload) => data.extend_from_slice(&payload),
                None => {
                    storage!("could not resolve block {} for {}", block_id, file_id);
                    return None;
                }
            }
        }

        Some((data, original_filename))
    }

    /// Failover read: local disk first, then the primary peer, then the
    /// replica peer. One attempt per source, no retries.
    pub async fn fetch_block(&self, block_id: &str) -> Option<Vec<u8>> {
        if let Some(data) = self.store.get(block_id).await {
            return Some(data);
        }

        let row = {
            let state = self.state.lock().await;
            state.block_table.blocks.get(block_id).cloned()
        };
        let Some(row) = row else {
            storage!("block {} not found in block table", block_id);
            return None;
        };

        let this = self.config.this_node.as_str();
        if row.primary_node != this {
            if let Some(data) = self.request_block(block_id, &row.primary_node).await {
                self.check_integrity(block_id, &row.hash, &data);
                return Some(data);
            }
        }

        if row.replica_node != this {
            storage!(
                "primary {} failed for block {}, trying replica {}",
                row.primary_node,
                block_id,
                row.replica_node
            );
            if let Some(data) = self.request_block(block_id, &row.replica_node).await {
                self.check_integrity(block_id, &row.hash, &data);
                return Some(data);
            }
        }

        None
    }

    async fn request_block(&self, block_id: &str, node: &str) -> Option<Vec<u8>> {
        let body = MessageBody::GetBlock {
            block_id: block_id.to_string(),
        };
        let reply = self.sender.send(node, body).await?;
        let reply: BlockDataReply = parse_reply(reply)?;
        if !reply.status.is_ok() {
            return None;
        }
        base64::decode(reply.block_data?).ok()
    }

    fn check_integrity(&self, block_id: &str, expected: &str, data: &[u8]) {
        if !expected.is_empty() && md5_hex(data) != expected {
            warn!("hash mismatch on block {} fetched from peer", block_id);
        }
    }
}
