mod atomic;

pub use atomic::{atomic_write, atomic_write_sync};

/// Get current timestamp in ISO 8601 format
#[must_use]
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
