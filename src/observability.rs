//! Execution Logger
//!
//! Structured audit trail of answered questions. Entries are kept in a
//! bounded in-memory buffer and optionally appended to a JSON-lines file.
//! Nothing in the query pipeline reads entries back.

use crate::error::Result;
use crate::nlq::query::Dialect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub timestamp: DateTime<Utc>,
    pub query_id: Uuid,
    pub question: String,
    pub dialect: Dialect,
    pub query: Option<String>,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub rows_returned: Option<u64>,
    pub execution_time_ms: u64,
}

pub struct ExecutionLogger {
    log_file: Option<PathBuf>,
    entries: Mutex<VecDeque<QueryLogEntry>>,
    max_in_memory: usize,
}

impl ExecutionLogger {
    pub fn new(log_file: Option<PathBuf>, max_in_memory: usize) -> Self {
        Self {
            log_file,
            entries: Mutex::new(VecDeque::new()),
            max_in_memory,
        }
    }

    pub fn log_query(&self, entry: QueryLogEntry) -> Result<()> {
        if let Some(ref path) = self.log_file {
            let line = serde_json::to_string(&entry)?;
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", line)?;
        }

        // A poisoned lock only means another writer panicked mid-push
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(entry);
        while entries.len() > self.max_in_memory {
            entries.pop_front();
        }
        Ok(())
    }

    /// Most recent entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<QueryLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }
}
