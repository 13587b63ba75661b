//! Persisted save notifications
//!
//! The main application merges changes saved by the extension the next time
//! it launches. Every context-merged notification observed during the
//! extension's lifetime is appended to a JSON-lines log inside the account
//! container so the main app can replay them.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Bus event published when a context save was merged.
pub const CONTEXT_MERGED_EVENT: &str = "context-was-merged";

const LOG_FILE_NAME: &str = "save-notifications.jsonl";

/// One persisted save notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveNotificationRecord {
    /// Milliseconds since the Unix epoch at which the notification arrived.
    pub received_at_ms: u64,
    /// Collaborator-defined notification payload.
    pub payload: serde_json::Value,
}

/// Append-only JSON-lines log of context-merged notifications.
pub struct SaveNotificationPersistence {
    log_path: PathBuf,
    file: Mutex<File>,
}

impl SaveNotificationPersistence {
    /// Open (creating if needed) the log inside the account container.
    pub fn open(account_container: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(account_container)?;
        let log_path = account_container.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        debug!(path = %log_path.display(), "save-notification log opened");
        Ok(Self {
            log_path,
            file: Mutex::new(file),
        })
    }

    /// Append a notification payload. Runs inside the bus observer, so I/O
    /// failures are logged rather than propagated.
    pub fn add(&self, payload: serde_json::Value) {
        let record = SaveNotificationRecord {
            received_at_ms: current_time_ms(),
            payload,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(error) => {
                warn!(%error, "save notification not serializable, dropping");
                return;
            }
        };

        let mut file = self.file.lock().unwrap();
        if let Err(error) = writeln!(file, "{line}") {
            warn!(%error, path = %self.log_path.display(), "save notification write failed");
        }
    }

    /// Read back all persisted records (oldest first). Corrupt lines are
    /// skipped with a warning.
    pub fn records(&self) -> std::io::Result<Vec<SaveNotificationRecord>> {
        // Flush buffered writes before reading the file back.
        {
            let mut file = self.file.lock().unwrap();
            let _ = file.flush();
        }

        let reader = BufReader::new(File::open(&self.log_path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(%error, "skipping corrupt save-notification record");
                }
            }
        }
        Ok(records)
    }

    /// Path of the underlying log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
