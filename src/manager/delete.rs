use std::collections::BTreeSet;

use super::BlockManager;
use crate::packets::MessageBody;
use crate::storage;

impl BlockManager {
    /// Removes a file and all its blocks everywhere. The whole deletion
    /// runs under the table lock so the tables and the local disk cannot
    /// diverge mid-way; a failed remote delete is not rolled back, the
    /// leftover copy becomes an orphan until a sweep catches it.
    pub async fn delete_file(&self, file_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.file_index.get(file_id).cloned() else {
            return false;
        };

        let this = self.config.this_node.clone();
        for block_id in &entry.block_ids {
            let row = state.block_table.blocks.get(block_id).cloned();
            if let Some(row) = row {
                for node in [&row.primary_node, &row.replica_node] {
                    if *node == this {
                        self.store.delete(block_id).await;
                    } else {
                        let _ = self
                            .sender
                            .send(
                                node,
                                MessageBody::DeleteBlock {
                                    block_id: block_id.clone(),
                                },
                            )
                            .await;
                    }
                }
                state.discharge(&row.primary_node, 1);
                state.discharge(&row.replica_node, 1);
            }
            state.block_table.blocks.remove(block_id);
        }

        state.file_index.remove(file_id);
        state.save_block_table();
        state.save_file_index();

        storage!("deleted file {} ({} blocks)", file_id, entry.block_ids.len());
        true
    }

    /// Sweeps block rows whose owning file has left the index: payloads
    /// are deleted locally and on both assigned hosts, the rows dropped,
    /// and the affected file ids broadcast so every peer cleans its own
    /// copies. Usage accounting is deliberately left alone.
    pub async fn cleanup_orphans(&self) -> Vec<String> {
        let orphan_file_ids: BTreeSet<String>;
        {
            let mut state = self.state.lock().await;
            let orphans = state.orphan_rows();
            if orphans.is_empty() {
                return Vec::new();
            }

            let this = self.config.this_node.clone();
            let mut file_ids = BTreeSet::new();
            for row in &orphans {
                self.store.delete(&row.block_id).await;
                for node in [&row.primary_node, &row.replica_node] {
                    if *node != this {
                        let _ = self
                            .sender
                            .send(
                                node,
                                MessageBody::DeleteBlock {
                                    block_id: row.block_id.clone(),
                                },
                            )
                            .await;
                    }
                }
                state.block_table.blocks.remove(&row.block_id);
                file_ids.insert(row.file_id.clone());
            }
            state.save_block_table();
            orphan_file_ids = file_ids;
        }

        let ids: Vec<String> = orphan_file_ids.into_iter().collect();
        storage!("orphan sweep removed blocks of {} file(s)", ids.len());

        for node in self.config.remote_nodes() {
            let _ = self
                .sender
                .send(
                    &node.name,
                    MessageBody::CleanupOrphanBlocks {
                        orphan_file_ids: ids.clone(),
                    },
                )
                .await;
        }
        ids
    }

    /// Handler side of the orphan broadcast: drops local payloads and
    /// table rows belonging to the named files.
    pub async fn remove_orphan_blocks(&self, orphan_file_ids: &[String]) -> usize {
        let mut state = self.state.lock().await;
        let doomed: Vec<String> = state
            .block_table
            .blocks
            .values()
            .filter(|row| orphan_file_ids.contains(&row.file_id))
            .map(|row| row.block_id.clone())
            .collect();

        let mut removed_files = 0;
        for block_id in &doomed {
            self.store.delete(block_id).await;
            state.block_table.blocks.remove(block_id);
        }
        for file_id in orphan_file_ids {
            if state.file_index.remove(file_id).is_some() {
                removed_files += 1;
            }
        }
        if !doomed.is_empty() {
            state.save_block_table();
        }
        if removed_files > 0 {
            state.save_file_index();
        }
        doomed.len()
    }
}
