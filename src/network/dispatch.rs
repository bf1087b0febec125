use std::sync::Arc;

use serde_json::Value;

use super::NodeStatusMap;
use crate::files::{FileManager, FolderData, ViewContent};
use crate::manager::BlockManager;
use crate::oplog::OperationLog;
use crate::packets::{
    reply_value, Ack, BlockDataReply, DistributedFilesReply, ErrorKind, FileListReply, Message,
    MessageBody, PendingsReply, ReplyStatus, StatsReply, TablesReply, ViewFileReply,
};
use crate::pending::PendingOperations;
use crate::{debug, info};

type HandlerResult = Result<Value, (ErrorKind, String)>;

/// Routes every inbound request to its handler. Each message type maps to
/// exactly one handler with the same shape: typed body in, reply value or
/// tagged error out.
pub struct Dispatcher {
    node_name: String,
    manager: Arc<BlockManager>,
    files: Arc<FileManager>,
    pending: Arc<PendingOperations>,
    oplog: Arc<OperationLog>,
    status: Arc<NodeStatusMap>,
}

impl Dispatcher {
    pub fn new(
        node_name: String,
        manager: Arc<BlockManager>,
        files: Arc<FileManager>,
        pending: Arc<PendingOperations>,
        oplog: Arc<OperationLog>,
        status: Arc<NodeStatusMap>,
    ) -> Self {
        Dispatcher {
            node_name,
            manager,
            files,
            pending,
            oplog,
            status,
        }
    }

    pub async fn dispatch(&self, message: Message) -> Value {
        // Any traffic from a peer proves it alive.
        self.status.mark_alive(&message.source_node);

        let source = message.source_node;
        let result = match message.body {
            MessageBody::Heartbeat => Ok(reply_value(&Ack::ok())),
            MessageBody::StoreBlock {
                block_id,
                block_data,
                is_replica,
            } => {
                self.handle_store_block(&source, &block_id, &block_data, is_replica)
                    .await
            }
            MessageBody::GetBlock { block_id } => self.handle_get_block(&source, &block_id).await,
            MessageBody::DeleteBlock { block_id } => {
                self.handle_delete_block(&source, &block_id).await
            }
            MessageBody::GetBlockTable => self.handle_get_block_table().await,
            MessageBody::SyncBlockTable {
                block_table,
                file_index,
            } => {
                let (blocks, files) = self.manager.sync_tables(block_table, file_index).await;
                if blocks > 0 || files > 0 {
                    debug!("sync from {} added {} blocks, {} files", source, blocks, files);
                }
                Ok(reply_value(&Ack::ok()))
            }
            MessageBody::GetDistributedFiles => {
                let files = self.manager.all_files().await;
                Ok(reply_value(&DistributedFilesReply {
                    status: ReplyStatus::Ok,
                    files,
                }))
            }
            MessageBody::GetSystemStats => {
                let stats = self.manager.system_stats().await;
                Ok(reply_value(&StatsReply {
                    status: ReplyStatus::Ok,
                    stats: Some(stats),
                }))
            }
            MessageBody::CleanupOrphanBlocks { orphan_file_ids } => {
                let removed = self.manager.remove_orphan_blocks(&orphan_file_ids).await;
                info!(
                    "orphan cleanup from {} removed {} local blocks",
                    source, removed
                );
                Ok(reply_value(&Ack::ok()))
            }
            MessageBody::TransferFile {
                filename,
                file_data,
            } => self.handle_transfer_file(&source, &filename, &file_data),
            MessageBody::TransferFolder {
                folder_name,
                folder_data,
            } => self.handle_transfer_folder(&source, &folder_name, &folder_data),
            MessageBody::ViewFile { filename } => self.handle_view_file(&filename),
            MessageBody::ListFiles { folder_name } => {
                self.handle_list_files(folder_name.as_deref())
            }
            MessageBody::GetPendingOperations => {
                // Destructive on purpose: the caller takes ownership of its
                // own deferred operations.
                let pending_operations = self.pending.drain_for(&source);
                Ok(reply_value(&PendingsReply {
                    status: ReplyStatus::Ok,
                    pending_operations,
                }))
            }
            MessageBody::GetAllPendings => Ok(reply_value(&PendingsReply {
                status: ReplyStatus::Ok,
                pending_operations: self.pending.snapshot(),
            })),
        };

        match result {
            Ok(reply) => reply,
            Err((kind, message)) => reply_value(&Ack::error(kind, message)),
        }
    }

    async fn handle_store_block(
        &self,
        source: &str,
        block_id: &str,
        block_data: &str,
        is_replica: bool,
    ) -> HandlerResult {
        info!(
            "receiving block {} (replica={}) from {}",
            block_id, is_replica, source
        );
        let data = base64::decode(block_data)
            .map_err(|e| (ErrorKind::BadRequest, format!("invalid block payload: {}", e)))?;

        if self.manager.store_block_local(block_id, &data, is_replica).await {
            Ok(reply_value(&Ack::ok()))
        } else {
            Err((ErrorKind::Storage, "failed to store block".to_string()))
        }
    }

    async fn handle_get_block(&self, source: &str, block_id: &str) -> HandlerResult {
        debug!("{} requests block {}", source, block_id);
        match self.manager.read_block_local(block_id).await {
            Some(data) => Ok(reply_value(&BlockDataReply {
                status: ReplyStatus::Ok,
                block_data: Some(base64::encode(data)),
                message: None,
            })),
            None => Err((ErrorKind::NotFound, "block not found".to_string())),
        }
    }

    async fn handle_delete_block(&self, source: &str, block_id: &str) -> HandlerResult {
        info!("deleting block {} on request of {}", block_id, source);
        if self.manager.delete_block_local(block_id).await {
            Ok(reply_value(&Ack::ok()))
        } else {
            Err((ErrorKind::NotFound, "block not found".to_string()))
        }
    }

    async fn handle_get_block_table(&self) -> HandlerResult {
        Ok(reply_value(&TablesReply {
            status: ReplyStatus::Ok,
            block_table: Some(self.manager.block_table().await),
            file_index: Some(self.manager.file_index().await),
        }))
    }

    fn handle_transfer_file(&self, source: &str, filename: &str, file_data: &str) -> HandlerResult {
        info!("receiving file {} from {}", filename, source);
        if self.files.save_file(filename, file_data) {
            self.oplog
                .record("transfer_file", source, Some(&self.node_name), Some(filename));
            Ok(reply_value(&Ack::ok()))
        } else {
            Err((ErrorKind::Storage, "failed to save file".to_string()))
        }
    }

    fn handle_transfer_folder(
        &self,
        source: &str,
        folder_name: &str,
        folder_data: &FolderData,
    ) -> HandlerResult {
        info!("receiving folder {} from {}", folder_name, source);
        if self.files.save_folder(folder_data) {
            self.oplog.record(
                "transfer_folder",
                source,
                Some(&self.node_name),
                Some(folder_name),
            );
            Ok(reply_value(&Ack::ok()))
        } else {
            Err((ErrorKind::Storage, "failed to save folder".to_string()))
        }
    }

    fn handle_view_file(&self, filename: &str) -> HandlerResult {
        let content = self
            .files
            .view(filename)
            .map_err(|message| (ErrorKind::NotFound, message))?;

        let reply = match content {
            ViewContent::Text { content } => ViewFileReply {
                status: ReplyStatus::Ok,
                file_type: Some("text".to_string()),
                content: Some(content),
                mime_type: None,
                filename: Some(filename.to_string()),
                message: None,
            },
            ViewContent::Binary { content } => ViewFileReply {
                status: ReplyStatus::Ok,
                file_type: Some("binary".to_string()),
                content: Some(content),
                mime_type: None,
                filename: Some(filename.to_string()),
                message: None,
            },
            ViewContent::Image { content, mime_type } => ViewFileReply {
                status: ReplyStatus::Ok,
                file_type: Some("image".to_string()),
                content: Some(content),
                mime_type: Some(mime_type),
                filename: Some(filename.to_string()),
                message: None,
            },
            ViewContent::Unsupported { message } => ViewFileReply {
                status: ReplyStatus::Ok,
                file_type: Some("unsupported".to_string()),
                content: None,
                mime_type: None,
                filename: Some(filename.to_string()),
                message: Some(message),
            },
        };
        Ok(reply_value(&reply))
    }

    fn handle_list_files(&self, folder_name: Option<&str>) -> HandlerResult {
        match self.files.list_files(folder_name) {
            Some(files) => Ok(reply_value(&FileListReply {
                status: ReplyStatus::Ok,
                files,
            })),
            None => Err((ErrorKind::NotFound, "folder not found".to_string())),
        }
    }
}
