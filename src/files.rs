use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{error, warn};

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "py", "rs", "js", "html", "css", "json", "xml", "md", "yml", "yaml", "ini", "cfg",
    "log", "toml",
];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp"];

/// Files the core writes under the shared root; hidden from listings.
const INTERNAL_FILES: &[&str] = &[
    "operations.json",
    "pending_operations.json",
    "block_table.json",
    "file_index.json",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: f64,
    pub is_dir: bool,
}

/// A folder flattened for transfer: relative path to base-64 contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderData {
    pub folder_name: String,
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewContent {
    Text { content: String },
    Binary { content: String },
    Image { content: String, mime_type: String },
    Unsupported { message: String },
}

/// Flat file storage under the shared root. Serves `transfer_file`,
/// `transfer_folder`, `view_file` and `list_files`, and the pending-queue
/// replay.
#[derive(Debug)]
pub struct FileManager {
    shared_dir: PathBuf,
    lock: Mutex<()>,
}

impl FileManager {
    pub fn new(shared_dir: impl AsRef<Path>) -> Self {
        let shared_dir = shared_dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&shared_dir) {
            error!("failed to create shared dir {}: {}", shared_dir.display(), e);
        }
        FileManager {
            shared_dir,
            lock: Mutex::new(()),
        }
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.shared_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).exists()
    }

    /// Recursive listing. `folder` restricts the walk to a subfolder and
    /// prefixes the returned names with it; `None` for a missing or
    /// non-directory folder.
    pub fn list_files(&self, folder: Option<&str>) -> Option<Vec<FileEntry>> {
        let (root, prefix) = match folder {
            None => (self.shared_dir.clone(), String::new()),
            Some(folder) => {
                let path = self.resolve(folder);
                if !path.is_dir() {
                    warn!("listing of {} requested but it is not a folder", folder);
                    return None;
                }
                let prefix = if folder.ends_with('/') {
                    folder.to_string()
                } else {
                    format!("{}/", folder)
                };
                (path, prefix)
            }
        };

        let _guard = self.lock.lock().unwrap();
        let mut files = Vec::new();

        if let Some(folder) = folder {
            if let Some(entry) = entry_for(&root, folder) {
                files.push(entry);
            }
        }

        walk(&root, &root, &prefix, folder.is_none(), &mut files);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Some(files)
    }

    pub fn get_file_data(&self, name: &str) -> Option<String> {
        let path = self.resolve(name);
        if path.is_dir() {
            return None;
        }
        let data = std::fs::read(&path).ok()?;
        Some(base64::encode(data))
    }

    pub fn get_folder_data(&self, folder_name: &str) -> Option<FolderData> {
        let root = self.resolve(folder_name);
        if !root.is_dir() {
            warn!("folder {} does not exist or is not a directory", folder_name);
            return None;
        }

        let mut data = FolderData {
            folder_name: folder_name.to_string(),
            files: BTreeMap::new(),
        };
        collect_folder(&root, &root, &mut data.files)?;
        Some(data)
    }

    pub fn save_file(&self, name: &str, file_data_b64: &str) -> bool {
        let path = self.resolve(name);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("failed to create parent dirs for {}: {}", name, e);
                return false;
            }
        }

        let decoded = if file_data_b64.is_empty() {
            Vec::new()
        } else {
            match base64::decode(file_data_b64) {
                Ok(data) => data,
                Err(e) => {
                    error!("invalid base64 payload for {}: {}", name, e);
                    return false;
                }
            }
        };

        let _guard = self.lock.lock().unwrap();
        match std::fs::write(&path, decoded) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to save file {}: {}", name, e);
                false
            }
        }
    }

    pub fn save_folder(&self, data: &FolderData) -> bool {
        let _guard = self.lock.lock().unwrap();
        let root = self.resolve(&data.folder_name);
        if let Err(e) = std::fs::create_dir_all(&root) {
            error!("failed to create folder {}: {}", data.folder_name, e);
            return false;
        }

        for (relative, contents_b64) in &data.files {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                if std::fs::create_dir_all(parent).is_err() {
                    return false;
                }
            }
            let contents = if contents_b64.is_empty() {
                Vec::new()
            } else {
                match base64::decode(contents_b64) {
                    Ok(c) => c,
                    Err(_) => return false,
                }
            };
            if std::fs::write(&path, contents).is_err() {
                return false;
            }
        }
        true
    }

    /// Removes a file or folder. Reports success even when the path was
    /// already gone; callers rely on delete being idempotent.
    pub fn delete(&self, name: &str) -> bool {
        let path = self.resolve(name);
        if !path.exists() {
            return true;
        }

        let _guard = self.lock.lock().unwrap();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            error!("failed to delete {}: {}", name, e);
        }
        true
    }

    /// Classifies a file for remote viewing: text, image, or base-64
    /// binary; anything else is reported unsupported.
    pub fn view(&self, name: &str) -> Result<ViewContent, String> {
        let path = self.resolve(name);
        if !path.exists() {
            return Err("file not found".to_string());
        }
        if path.is_dir() {
            return Err("path is a folder, not a file".to_string());
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        if TEXT_EXTENSIONS.contains(&extension.as_str()) || size == 0 {
            return match std::fs::read_to_string(&path) {
                Ok(content) => Ok(ViewContent::Text { content }),
                // Not valid UTF-8 after all; fall back to raw bytes.
                Err(_) => {
                    let raw = std::fs::read(&path).map_err(|e| e.to_string())?;
                    Ok(ViewContent::Binary {
                        content: base64::encode(raw),
                    })
                }
            };
        }

        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            let raw = std::fs::read(&path).map_err(|e| e.to_string())?;
            let mime_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();
            return Ok(ViewContent::Image {
                content: base64::encode(raw),
                mime_type,
            });
        }

        Ok(ViewContent::Unsupported {
            message: format!("file type not supported for viewing: .{}", extension),
        })
    }
}

fn entry_for(path: &Path, name: &str) -> Option<FileEntry> {
    let meta = std::fs::metadata(path).ok()?;
    Some(FileEntry {
        name: name.to_string(),
        path: path.to_string_lossy().into_owned(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified: mtime(&meta),
        is_dir: meta.is_dir(),
    })
}

fn mtime(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn walk(root: &Path, dir: &Path, prefix: &str, at_shared_root: bool, out: &mut Vec<FileEntry>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let top_level = dir == root;
    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();

        if at_shared_root && top_level {
            if path.is_dir() && file_name == "blocks" {
                continue;
            }
            if INTERNAL_FILES.contains(&file_name.as_str()) {
                continue;
            }
        }

        let relative = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| file_name.clone());
        let name = format!("{}{}", prefix, relative);

        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        out.push(FileEntry {
            name,
            path: path.to_string_lossy().into_owned(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: mtime(&meta),
            is_dir: meta.is_dir(),
        });

        if path.is_dir() {
            walk(root, &path, prefix, at_shared_root, out);
        }
    }
}

fn collect_folder(
    root: &Path,
    dir: &Path,
    out: &mut BTreeMap<String, String>,
) -> Option<()> {
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_folder(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .ok()?
                .to_string_lossy()
                .into_owned();
            let contents = std::fs::read(&path).ok()?;
            out.insert(relative, base64::encode(contents));
        }
    }
    Some(())
}
