use super::{AllocError, Block, BlockManager};
use crate::storage;
use crate::store::{BlockRow, Tables};
use crate::util::now_ts;

/// A block with both of its hosts decided.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedBlock {
    pub block: Block,
    pub primary_node: String,
    pub replica_node: String,
    pub created_at: f64,
}

impl BlockManager {
    /// Picks a primary and a replica peer for every block, greedily
    /// re-ranking peers by free space before each block so load balances
    /// itself. Each placement charges one megabyte to both hosts. The
    /// whole allocation is atomic: if any block cannot get two distinct
    /// hosts, nothing is persisted and the table is left untouched.
    pub async fn allocate(
        &self,
        blocks: Vec<Block>,
        original_name: &str,
    ) -> Result<Vec<PlacedBlock>, AllocError> {
        let mut state = self.state.lock().await;

        let usage_snapshot = state.block_table.node_usage.clone();
        let mut staged_ids: Vec<String> = Vec::new();
        let mut placed = Vec::with_capacity(blocks.len());

        for block in blocks {
            let candidates = self.ranked_free_nodes(&state, None);
            if candidates.len() < 2 {
                Self::rollback(&mut state, &usage_snapshot, &staged_ids);
                return Err(AllocError::InsufficientReplicas);
            }
            let primary_node = candidates[0].clone();

            let replica_candidates = self.ranked_free_nodes(&state, Some(&primary_node));
            let Some(replica_node) = replica_candidates.first().cloned() else {
                Self::rollback(&mut state, &usage_snapshot, &staged_ids);
                return Err(AllocError::InsufficientReplicas);
            };

            state.charge(&primary_node, 1);
            state.charge(&replica_node, 1);

            let created_at = now_ts();
            let row = BlockRow {
                block_id: block.block_id.clone(),
                block_num: block.block_num,
                file_id: block.file_id.clone(),
                original_filename: original_name.to_string(),
                size: block.size,
                hash: block.hash.clone(),
                primary_node: primary_node.clone(),
                replica_node: replica_node.clone(),
                status: "allocated".to_string(),
                created_at,
            };
            state.block_table.blocks.insert(row.block_id.clone(), row);
            staged_ids.push(block.block_id.clone());

            storage!(
                "block {} -> primary {}, replica {}",
                block.block_id,
                primary_node,
                replica_node
            );

            placed.push(PlacedBlock {
                block,
                primary_node,
                replica_node,
                created_at,
            });
        }

        state.save_block_table();
        Ok(placed)
    }

    /// Peers with free space, best first. Directory order breaks ties
    /// (the sort is stable).
    fn ranked_free_nodes(&self, state: &Tables, exclude: Option<&str>) -> Vec<String> {
        let mut candidates: Vec<(String, i64)> = self
            .config
            .nodes
            .iter()
            .filter(|node| Some(node.name.as_str()) != exclude)
            .filter_map(|node| {
                let free = node.capacity_mb as i64 - state.usage_of(&node.name) as i64;
                (free > 0).then(|| (node.name.clone(), free))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.into_iter().map(|(name, _)| name).collect()
    }

    fn rollback(
        state: &mut Tables,
        usage_snapshot: &std::collections::BTreeMap<String, u64>,
        staged_ids: &[String],
    ) {
        state.block_table.node_usage = usage_snapshot.clone();
        for id in staged_ids {
            state.block_table.blocks.remove(id);
        }
    }
}
