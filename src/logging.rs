use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::Level;

/// Append-only per-peer activity log: `log_peer_<peerId>.log`, one timestamp-prefixed line per
/// logged event. Writers are serialized through an internal mutex so concurrent threads never
/// interleave partial lines.
pub struct ActivityLog {
    file: Mutex<std::fs::File>,
}

impl ActivityLog {
    pub fn open(peer_id: u32) -> std::io::Result<Self> {
        let path = PathBuf::from(format!("log_peer_{peer_id}.log"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn log(&self, line: impl std::fmt::Display) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut file = self.file.lock().expect("activity log mutex poisoned");
        // A write failure here is not propagated: losing one activity-log line must never bring
        // down a peer link or scheduler thread.
        let _ = writeln!(file, "[{ts}] {line}");
    }
}

/// Installs the ambient `tracing` subscriber used for developer-facing diagnostics (thread
/// panics, I/O errors, decode failures). Separate from `ActivityLog`, which is the exact,
/// user-facing record; `tracing` output is informational only.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .try_init();
}
