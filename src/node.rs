use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::files::{FileEntry, FileManager};
use crate::manager::{AllocError, BlockManager};
use crate::network::{Dispatcher, MessageSender, NetClient, NetServer, NodeStatusMap};
use crate::oplog::OperationLog;
use crate::packets::{parse_reply, Ack, FileListReply, MessageBody, PendingsReply};
use crate::pending::{PendingKind, PendingOperation, PendingOperations};
use crate::store::{BlockTableDoc, DistributedFile, FileAttributes, FileIndexDoc, SystemStats};
use crate::sync::SyncManager;
use crate::{error, info, warn};

const SYNC_INTERVAL_SECS: u64 = 3;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to read source file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub file_id: String,
    pub total_blocks: usize,
    pub size: u64,
    /// False when at least one block side could not be placed; the rows
    /// are persisted anyway and the user retries by re-uploading.
    pub complete: bool,
}

/// One process of the cluster: owns every component, wires them together
/// and runs the background tasks. The public methods are the surface an
/// external HTTP wrapper maps its routes onto.
pub struct Node {
    config: Arc<Config>,
    status: Arc<NodeStatusMap>,
    client: Arc<NetClient>,
    manager: Arc<BlockManager>,
    files: Arc<FileManager>,
    pending: Arc<PendingOperations>,
    oplog: Arc<OperationLog>,
    sync: Arc<SyncManager>,
    remote_files_cache: DashMap<String, Vec<FileEntry>>,
    transparent_ops: Mutex<Vec<PendingOperation>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.shared_dir)?;
        let config = Arc::new(config);

        let status = Arc::new(NodeStatusMap::new(&config));
        let client = Arc::new(NetClient::new(Arc::clone(&config), Arc::clone(&status)));
        let sender: Arc<dyn MessageSender> = client.clone();

        let manager = Arc::new(BlockManager::new(Arc::clone(&config), Arc::clone(&sender)));
        let files = Arc::new(FileManager::new(&config.shared_dir));
        let pending = Arc::new(PendingOperations::load(config.pending_file()));
        let oplog = Arc::new(OperationLog::load(config.operations_file()));

        let sync = Arc::new(SyncManager::new(
            Arc::clone(&config),
            Arc::clone(&sender),
            Arc::clone(&pending),
            Arc::clone(&files),
            Arc::clone(&manager),
        ));

        Ok(Node {
            config,
            status,
            client,
            manager,
            files,
            pending,
            oplog,
            sync,
            remote_files_cache: DashMap::new(),
            transparent_ops: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.config.this_node
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn files(&self) -> &Arc<FileManager> {
        &self.files
    }

    pub fn pending(&self) -> &Arc<PendingOperations> {
        &self.pending
    }

    pub fn manager(&self) -> &Arc<BlockManager> {
        &self.manager
    }

    /// Starts the listener and the background tasks: heartbeats, the
    /// liveness watchdog and the sync loop.
    pub fn start(self: Arc<Self>) {
        info!("starting node {}", self.config.this_node);

        let dispatcher = Arc::new(Dispatcher::new(
            self.config.this_node.clone(),
            Arc::clone(&self.manager),
            Arc::clone(&self.files),
            Arc::clone(&self.pending),
            Arc::clone(&self.oplog),
            Arc::clone(&self.status),
        ));
        let server = Arc::new(NetServer::new(self.config.network_port, dispatcher));

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(server.spawn());

        let client = Arc::clone(&self.client);
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                client.spawn_heartbeat_round();
            }
        }));

        let status = Arc::clone(&self.status);
        let node_timeout = Duration::from_secs(self.config.node_timeout);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                for node in status.expire(node_timeout) {
                    warn!("node {} stopped responding", node);
                }
            }
        }));

        let node = Arc::clone(&self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(SYNC_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                node.sync.run_once().await;
                node.refresh_remote_caches().await;
            }
        }));

        info!("node {} started", self.config.this_node);
    }

    pub fn stop(&self) {
        info!("stopping node {}", self.config.this_node);
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    // ==================== distributed plane ====================

    /// Full upload pipeline: split, place, distribute.
    pub async fn upload(
        &self,
        path: &Path,
        original_name: &str,
    ) -> Result<UploadReport, UploadError> {
        let (blocks, file_id) = self.manager.split_file(path, original_name).await?;
        let size: u64 = blocks.iter().map(|b| b.size as u64).sum();
        let total_blocks = blocks.len();

        let placed = self.manager.allocate(blocks, original_name).await?;
        let complete = self.manager.distribute(&placed, &file_id, original_name).await;

        Ok(UploadReport {
            file_id,
            total_blocks,
            size,
            complete,
        })
    }

    pub async fn download(&self, file_id: &str) -> Option<(Vec<u8>, String)> {
        self.manager.reconstruct(file_id).await
    }

    pub async fn delete_distributed(&self, file_id: &str) -> bool {
        self.manager.delete_file(file_id).await
    }

    pub async fn distributed_files(&self) -> Vec<DistributedFile> {
        self.manager.all_files().await
    }

    pub async fn file_attributes(&self, file_id: &str) -> Option<FileAttributes> {
        self.manager.file_attributes(file_id).await
    }

    pub async fn block_table(&self) -> (BlockTableDoc, FileIndexDoc) {
        (
            self.manager.block_table().await,
            self.manager.file_index().await,
        )
    }

    pub async fn system_stats(&self) -> SystemStats {
        self.manager.system_stats().await
    }

    pub async fn cleanup_orphans(&self) -> Vec<String> {
        self.manager.cleanup_orphans().await
    }

    // ==================== flat file plane ====================

    pub fn list_files(&self, folder: Option<&str>) -> Option<Vec<FileEntry>> {
        self.files.list_files(folder)
    }

    pub fn node_status(&self) -> BTreeMap<String, bool> {
        self.status.statuses()
    }

    /// Sends a flat file to another peer. When the acting peer is not
    /// this process, the work is queued on its behalf and picked up by
    /// its own sync loop.
    pub async fn transfer_file(&self, filename: &str, target_node: &str, source_node: &str) -> bool {
        if source_node != self.config.this_node {
            self.pending.enqueue(
                PendingKind::TransferFile,
                source_node,
                Some(target_node),
                filename,
            );
            return true;
        }
        self.send_file(filename, target_node).await
    }

    pub async fn transfer_folder(
        &self,
        folder_name: &str,
        target_node: &str,
        source_node: &str,
    ) -> bool {
        if source_node != self.config.this_node {
            self.pending.enqueue(
                PendingKind::TransferFolder,
                source_node,
                Some(target_node),
                folder_name,
            );
            return true;
        }
        self.send_folder(folder_name, target_node).await
    }

    async fn send_file(&self, filename: &str, target_node: &str) -> bool {
        let sent = match self.files.get_file_data(filename) {
            Some(file_data) => {
                let body = MessageBody::TransferFile {
                    filename: filename.to_string(),
                    file_data,
                };
                match self.client.send_message(target_node, body).await {
                    Some(reply) => parse_reply::<Ack>(reply)
                        .map(|ack| ack.status.is_ok())
                        .unwrap_or(false),
                    None => false,
                }
            }
            None => false,
        };

        if sent {
            info!("file {} sent to {}", filename, target_node);
            self.oplog.record(
                "transfer_file",
                &self.config.this_node,
                Some(target_node),
                Some(filename),
            );
        } else {
            error!(
                "failed to send file {} to {}, queueing for retry",
                filename, target_node
            );
            self.pending.enqueue(
                PendingKind::TransferFile,
                &self.config.this_node,
                Some(target_node),
                filename,
            );
        }
        sent
    }

    async fn send_folder(&self, folder_name: &str, target_node: &str) -> bool {
        let sent = match self.files.get_folder_data(folder_name) {
            Some(folder_data) => {
                let body = MessageBody::TransferFolder {
                    folder_name: folder_name.to_string(),
                    folder_data,
                };
                match self.client.send_message(target_node, body).await {
                    Some(reply) => parse_reply::<Ack>(reply)
                        .map(|ack| ack.status.is_ok())
                        .unwrap_or(false),
                    None => false,
                }
            }
            None => false,
        };

        if sent {
            self.oplog.record(
                "transfer_folder",
                &self.config.this_node,
                Some(target_node),
                Some(folder_name),
            );
        } else {
            self.pending.enqueue(
                PendingKind::TransferFolder,
                &self.config.this_node,
                Some(target_node),
                folder_name,
            );
        }
        sent
    }

    /// Deletes a flat file locally and queues a delete for every other
    /// peer; each peer applies it when it drains its own pendings.
    pub fn delete_file(&self, filename: &str) -> bool {
        self.files.delete(filename);
        self.oplog
            .record("delete", &self.config.this_node, None, Some(filename));

        for node in self.config.remote_nodes() {
            self.pending
                .enqueue(PendingKind::Delete, &node.name, None, filename);
        }
        true
    }

    // ==================== remote listings & caches ====================

    /// Listing of a remote peer's flat files. A live peer is asked
    /// directly; an unreachable one is answered from the cache with the
    /// in-flight pending operations overlaid.
    pub async fn remote_files(&self, target_node: &str) -> Vec<FileEntry> {
        if self.status.is_alive(target_node) {
            let body = MessageBody::ListFiles { folder_name: None };
            if let Some(reply) = self.client.send_message(target_node, body).await {
                if let Some(reply) = parse_reply::<FileListReply>(reply) {
                    if reply.status.is_ok() {
                        self.remote_files_cache
                            .insert(target_node.to_string(), reply.files.clone());
                        return reply.files;
                    }
                }
            }
        }

        let cached = self
            .remote_files_cache
            .get(target_node)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        self.overlay_pending(cached, target_node)
    }

    /// Refreshes the cached remote listings and the merged snapshot of
    /// in-flight pendings (ours plus every reachable peer's).
    pub async fn refresh_remote_caches(&self) {
        let mut ops = self.pending.snapshot();

        for node in self.config.remote_nodes() {
            if !self.status.is_alive(&node.name) {
                continue;
            }

            let body = MessageBody::ListFiles { folder_name: None };
            if let Some(reply) = self.client.send_message(&node.name, body).await {
                if let Some(reply) = parse_reply::<FileListReply>(reply) {
                    if reply.status.is_ok() {
                        self.remote_files_cache
                            .insert(node.name.clone(), reply.files);
                    }
                }
            }

            if let Some(reply) = self
                .client
                .send_message(&node.name, MessageBody::GetAllPendings)
                .await
            {
                if let Some(reply) = parse_reply::<PendingsReply>(reply) {
                    if reply.status.is_ok() {
                        ops.extend(reply.pending_operations);
                    }
                }
            }
        }

        ops.sort_by(|a, b| {
            a.timestamp
                .partial_cmp(&b.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        *self.transparent_ops.lock().unwrap() = ops;
    }

    /// Projects queued transfers and deletes onto a stale listing so the
    /// cluster looks consistent while peers are catching up.
    fn overlay_pending(&self, mut files: Vec<FileEntry>, target_node: &str) -> Vec<FileEntry> {
        let ops = self.transparent_ops.lock().unwrap().clone();
        for op in ops {
            match op.kind {
                PendingKind::TransferFile => {
                    if op.target_node.as_deref() != Some(target_node) {
                        continue;
                    }
                    if !files.iter().any(|f| f.name == op.filename) {
                        files.push(FileEntry {
                            name: op.filename.clone(),
                            path: String::new(),
                            size: 0,
                            modified: op.timestamp,
                            is_dir: false,
                        });
                    }
                }
                PendingKind::TransferFolder => {
                    if op.target_node.as_deref() != Some(target_node)
                        || op.source_node != self.config.this_node
                    {
                        continue;
                    }
                    if let Some(folder_files) = self.files.list_files(Some(&op.filename)) {
                        for entry in folder_files {
                            if !files.iter().any(|f| f.name == entry.name) {
                                files.push(entry);
                            }
                        }
                    }
                }
                PendingKind::Delete => {
                    files.retain(|f| !path_covers(&op.filename, &f.name));
                }
            }
        }
        files
    }

    pub async fn get_all_pendings(&self, node: &str) -> Vec<PendingOperation> {
        match self
            .client
            .send_message(node, MessageBody::GetAllPendings)
            .await
            .and_then(parse_reply::<PendingsReply>)
        {
            Some(reply) if reply.status.is_ok() => reply.pending_operations,
            _ => Vec::new(),
        }
    }
}

/// Whether `path` names `candidate` itself or one of its ancestors.
fn path_covers(path: &str, candidate: &str) -> bool {
    candidate == path || candidate.starts_with(&format!("{}/", path))
}
