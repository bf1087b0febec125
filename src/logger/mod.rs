use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Local;
use colored::*;

static SHOW_DEBUG: AtomicBool = AtomicBool::new(false);
static SHOW_INFO: AtomicBool = AtomicBool::new(true);
static SHOW_WARNING: AtomicBool = AtomicBool::new(true);
static SHOW_ERROR: AtomicBool = AtomicBool::new(true);

lazy_static::lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

fn get_log_filename() -> String {
    let now = Local::now();
    format!("logs/log_{}.log", now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Mirror all log lines into a file. `None` picks a timestamped file under
/// `logs/`.
pub fn set_log_file(path: Option<&str>) {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from(get_log_filename()),
    };

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            let mut guard = LOG_FILE.lock().unwrap();
            *guard = Some(file);
        }
        Err(e) => eprintln!("failed to open log file {}: {}", path.display(), e),
    }
}

pub fn set_debug(enabled: bool) {
    SHOW_DEBUG.store(enabled, Ordering::Relaxed);
}

pub fn set_info(enabled: bool) {
    SHOW_INFO.store(enabled, Ordering::Relaxed);
}

pub fn set_warning(enabled: bool) {
    SHOW_WARNING.store(enabled, Ordering::Relaxed);
}

pub fn set_error(enabled: bool) {
    SHOW_ERROR.store(enabled, Ordering::Relaxed);
}

fn get_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn write_to_file(message: &str) {
    let mut guard = LOG_FILE.lock().unwrap();
    if let Some(file) = guard.as_mut() {
        let _ = writeln!(file, "{}", message);
    }
}

pub fn debug(message: &str) {
    let log_message = format!("[{}] [DEBUG] {}", get_timestamp(), message);
    if SHOW_DEBUG.load(Ordering::Relaxed) {
        println!("{}", log_message.blue().bold());
    }
    write_to_file(&log_message);
}

pub fn info(message: &str) {
    let log_message = format!("[{}] {}", get_timestamp(), message);
    if SHOW_INFO.load(Ordering::Relaxed) {
        println!("{}", log_message);
    }
    write_to_file(&log_message);
}

pub fn warning(message: &str) {
    let log_message = format!("[{}] [WARNING] {}", get_timestamp(), message);
    if SHOW_WARNING.load(Ordering::Relaxed) {
        println!("{}", log_message.yellow().bold());
    }
    write_to_file(&log_message);
}

pub fn error(message: &str) {
    let log_message = format!("[{}] [ERROR] {}", get_timestamp(), message);
    if SHOW_ERROR.load(Ordering::Relaxed) {
        println!("{}", log_message.red().bold());
    }
    write_to_file(&log_message);
}

/// Block-plane channel: placement, distribution, reconstruction.
pub fn storage(message: &str) {
    let log_message = format!("[{}] [STORAGE] {}", get_timestamp(), message);
    if SHOW_INFO.load(Ordering::Relaxed) {
        println!("{}", log_message.magenta());
    }
    write_to_file(&log_message);
}

/// Consistency-layer channel: pending replay and table gossip.
pub fn sync(message: &str) {
    let log_message = format!("[{}] [SYNC] {}", get_timestamp(), message);
    if SHOW_INFO.load(Ordering::Relaxed) {
        println!("{}", log_message.cyan());
    }
    write_to_file(&log_message);
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::logger::debug(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::logger::info(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::logger::warning(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::logger::error(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! storage {
    ($($arg:tt)*) => {
        $crate::logger::storage(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! sync_log {
    ($($arg:tt)*) => {
        $crate::logger::sync(&format!($($arg)*))
    };
}
