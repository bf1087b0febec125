use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::files::{FileEntry, FolderData};
use crate::pending::PendingOperation;
use crate::store::{BlockTableDoc, DistributedFile, FileIndexDoc, SystemStats};
use crate::util::now_ts;

/// Request envelope. Every request carries the sender's name and a float
/// timestamp next to the type-tagged body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source_node: String,
    pub timestamp: f64,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    pub fn new(source_node: &str, body: MessageBody) -> Self {
        Message {
            source_node: source_node.to_string(),
            timestamp: now_ts(),
            body,
        }
    }
}

/// The request catalog. The `type` field on the wire selects the variant;
/// the dispatcher maps each variant to one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Heartbeat,
    StoreBlock {
        block_id: String,
        block_data: String,
        #[serde(default)]
        is_replica: bool,
    },
    GetBlock {
        block_id: String,
    },
    DeleteBlock {
        block_id: String,
    },
    GetBlockTable,
    SyncBlockTable {
        block_table: BlockTableDoc,
        file_index: FileIndexDoc,
    },
    GetDistributedFiles,
    GetSystemStats,
    CleanupOrphanBlocks {
        orphan_file_ids: Vec<String>,
    },
    TransferFile {
        filename: String,
        file_data: String,
    },
    TransferFolder {
        folder_name: String,
        folder_data: FolderData,
    },
    ViewFile {
        filename: String,
    },
    ListFiles {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folder_name: Option<String>,
    },
    GetPendingOperations,
    GetAllPendings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

impl ReplyStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, ReplyStatus::Ok)
    }
}

/// Wire-level error classification carried in error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Capacity,
    Storage,
    Integrity,
    BadRequest,
    Unsupported,
    Internal,
}

/// Bare acknowledgement, also the shape of every error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Ack {
            status: ReplyStatus::Ok,
            kind: None,
            message: None,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Ack {
            status: ReplyStatus::Error,
            kind: Some(kind),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDataReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablesReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_table: Option<BlockTableDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_index: Option<FileIndexDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedFilesReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub files: Vec<DistributedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SystemStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingsReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub pending_operations: Vec<PendingOperation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewFileReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Serializes a typed reply for the framed response. Serialization of
/// these DTOs cannot fail; a broken one degrades to an internal error.
pub fn reply_value<T: Serialize>(reply: &T) -> Value {
    serde_json::to_value(reply).unwrap_or_else(|e| {
        serde_json::to_value(Ack::error(ErrorKind::Internal, e.to_string())).unwrap_or(Value::Null)
    })
}

/// Parses a raw reply into the DTO the caller expects. `None` when the
/// reply has a different shape entirely.
pub fn parse_reply<T: DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}
