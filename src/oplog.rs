use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::util::now_ts;
use crate::warn;

/// One completed operation as recorded in `operations.json`. The core
/// never reads this back; it is an audit trail for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: String,
    pub source_node: String,
    pub timestamp: f64,
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug)]
pub struct OperationLog {
    file: PathBuf,
    operations: Mutex<Vec<Operation>>,
}

impl OperationLog {
    pub fn load(file: impl AsRef<Path>) -> Self {
        let file = file.as_ref().to_path_buf();
        let operations = std::fs::read_to_string(&file)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        OperationLog {
            file,
            operations: Mutex::new(operations),
        }
    }

    pub fn record(
        &self,
        kind: &str,
        source_node: &str,
        target_node: Option<&str>,
        filename: Option<&str>,
    ) -> Operation {
        let timestamp = now_ts();
        let op = Operation {
            kind: kind.to_string(),
            source_node: source_node.to_string(),
            timestamp,
            operation_id: format!("{}_{}", source_node, timestamp),
            target_node: target_node.map(str::to_string),
            filename: filename.map(str::to_string),
        };

        let mut operations = self.operations.lock().unwrap();
        operations.push(op.clone());
        if let Some(parent) = self.file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(raw) = serde_json::to_string_pretty(&*operations) {
            if let Err(e) = std::fs::write(&self.file, raw) {
                warn!("failed to persist operation log: {}", e);
            }
        }
        op
    }

    pub fn operations_since(&self, timestamp: f64) -> Vec<Operation> {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.timestamp > timestamp)
            .cloned()
            .collect()
    }

    pub fn last_timestamp(&self) -> f64 {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .map(|op| op.timestamp)
            .fold(0.0, f64::max)
    }
}
