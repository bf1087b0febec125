use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

/// Seconds since the epoch as a float, the timestamp format used on the
/// wire and in every persisted document.
pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
