//! Append-only session logging for the mock servers.
//!
//! Every accepted exchange is recorded in arrival order, keyed by the
//! originating connection, so a run can later correlate traffic by the
//! client-supplied request identifier (the `uuid` header). Records are
//! written as JSON lines; the runner reads the file back after the run.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded request/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// Connection ordinal within this server's lifetime.
    pub connection: u64,
    /// Exchange ordinal within the connection.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Client-supplied correlation identifier, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub response_status: u16,
    /// Whether a scripted entry matched (false = synthetic no-match
    /// response was played).
    pub matched: bool,
}

/// Append-only JSONL session log. The mutex serializes writers, so
/// per-connection record order is preserved even with concurrent
/// connection handlers.
#[derive(Debug)]
pub struct SessionLog {
    writer: Mutex<File>,
}

impl SessionLog {
    /// Create (or truncate) the log file.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            writer: Mutex::new(file),
        })
    }

    /// Append one record and flush it to disk.
    pub fn append(&self, record: &ExchangeRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = self.writer.lock().expect("session log lock poisoned");
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }

    /// Read a session log file back into records, file order preserved.
    pub fn read_file(path: &Path) -> std::io::Result<Vec<ExchangeRecord>> {
        let file = File::open(path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            records.push(record);
        }
        Ok(records)
    }
}
