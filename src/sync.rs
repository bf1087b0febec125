use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::files::FileManager;
use crate::manager::BlockManager;
use crate::network::MessageSender;
use crate::packets::{parse_reply, Ack, MessageBody, PendingsReply, TablesReply};
use crate::pending::{PendingKind, PendingOperation, PendingOperations};
use crate::{sync_log, warn};

/// One peer's consistency pass: pull the pendings other peers hold for
/// us, replay our own deferred operations, and gossip the placement
/// tables. Driven on an interval by the node; re-entry is guarded so a
/// slow round cannot stack on itself.
pub struct SyncManager {
    config: Arc<Config>,
    sender: Arc<dyn MessageSender>,
    pending: Arc<PendingOperations>,
    files: Arc<FileManager>,
    manager: Arc<BlockManager>,
    syncing: AtomicBool,
}

impl SyncManager {
    pub fn new(
        config: Arc<Config>,
        sender: Arc<dyn MessageSender>,
        pending: Arc<PendingOperations>,
        files: Arc<FileManager>,
        manager: Arc<BlockManager>,
    ) -> Self {
        SyncManager {
            config,
            sender,
            pending,
            files,
            manager,
            syncing: AtomicBool::new(false),
        }
    }

    pub async fn run_once(&self) {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pull_pendings().await;
        self.replay_own_pendings().await;
        self.gossip_tables().await;

        self.syncing.store(false, Ordering::SeqCst);
    }

    fn live_remote_peers(&self) -> Vec<String> {
        self.sender
            .statuses()
            .into_iter()
            .filter(|(node, alive)| *alive && node != &self.config.this_node)
            .map(|(node, _)| node)
            .collect()
    }

    /// Collects from every live peer the operations queued there on our
    /// behalf; the responder drops them as it answers.
    async fn pull_pendings(&self) {
        for node in self.live_remote_peers() {
            let Some(reply) = self
                .sender
                .send(&node, MessageBody::GetPendingOperations)
                .await
            else {
                continue;
            };
            let Some(reply) = parse_reply::<PendingsReply>(reply) else {
                continue;
            };
            if reply.status.is_ok() && !reply.pending_operations.is_empty() {
                sync_log!(
                    "pulled {} pending operation(s) from {}",
                    reply.pending_operations.len(),
                    node
                );
                self.pending.merge(reply.pending_operations);
            }
        }
    }

    async fn replay_own_pendings(&self) {
        let own: Vec<PendingOperation> = self
            .pending
            .snapshot()
            .into_iter()
            .filter(|op| op.source_node == self.config.this_node)
            .collect();
        if own.is_empty() {
            return;
        }

        sync_log!("replaying {} pending operation(s)", own.len());
        for op in own {
            let success = match op.kind {
                PendingKind::TransferFile => self.replay_transfer_file(&op).await,
                PendingKind::TransferFolder => self.replay_transfer_folder(&op).await,
                PendingKind::Delete => self.files.delete(&op.filename),
            };

            if success {
                sync_log!("pending operation {} completed", op.id);
                self.pending.remove(&op.id);
            } else {
                warn!("pending operation {} still cannot complete", op.id);
            }
        }
    }

    async fn replay_transfer_file(&self, op: &PendingOperation) -> bool {
        // The source file vanishing means there is nothing left to send.
        if !self.files.exists(&op.filename) {
            return true;
        }
        let Some(target) = op.target_node.as_deref() else {
            warn!("pending transfer {} has no target, dropping", op.id);
            return true;
        };
        let Some(file_data) = self.files.get_file_data(&op.filename) else {
            return false;
        };

        let body = MessageBody::TransferFile {
            filename: op.filename.clone(),
            file_data,
        };
        self.send_acked(target, body).await
    }

    async fn replay_transfer_folder(&self, op: &PendingOperation) -> bool {
        if !self.files.exists(&op.filename) {
            return true;
        }
        let Some(target) = op.target_node.as_deref() else {
            warn!("pending transfer {} has no target, dropping", op.id);
            return true;
        };
        let Some(folder_data) = self.files.get_folder_data(&op.filename) else {
            return false;
        };

        let body = MessageBody::TransferFolder {
            folder_name: op.filename.clone(),
            folder_data,
        };
        self.send_acked(target, body).await
    }

    async fn send_acked(&self, node: &str, body: MessageBody) -> bool {
        match self.sender.send(node, body).await {
            Some(reply) => parse_reply::<Ack>(reply)
                .map(|ack| ack.status.is_ok())
                .unwrap_or(false),
            None => false,
        }
    }

    /// First-writer-wins union of every live peer's tables into ours.
    async fn gossip_tables(&self) {
        for node in self.live_remote_peers() {
            let Some(reply) = self.sender.send(&node, MessageBody::GetBlockTable).await else {
                continue;
            };
            let Some(reply) = parse_reply::<TablesReply>(reply) else {
                continue;
            };
            if !reply.status.is_ok() {
                continue;
            }

            let block_table = reply.block_table.unwrap_or_default();
            let file_index = reply.file_index.unwrap_or_default();
            let (blocks, files) = self.manager.sync_tables(block_table, file_index).await;
            if blocks > 0 || files > 0 {
                sync_log!(
                    "gossip from {} brought {} block row(s), {} file(s)",
                    node,
                    blocks,
                    files
                );
            }
        }
    }
}
