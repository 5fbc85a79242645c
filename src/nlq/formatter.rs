//! Response Formatter
//!
//! Shapes pipeline output into the payload handed to callers (CLI, chat
//! loop, HTTP tool endpoint). Formatting is infallible.

use crate::error::CopilotError;
use crate::nlq::executor::ExecutionResult;
use crate::nlq::query::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Success {
        query: String,
        results: Vec<Row>,
    },
    Failure {
        /// Absent only when generation failed before any query existed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        error: String,
        kind: String,
    },
}

impl ResponsePayload {
    pub fn is_success(&self) -> bool {
        matches!(self, ResponsePayload::Success { .. })
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            ResponsePayload::Success { query, .. } => Some(query),
            ResponsePayload::Failure { query, .. } => query.as_deref(),
        }
    }

    /// Human-readable rendering for terminals and chat transcripts.
    pub fn to_display_string(&self) -> String {
        match self {
            ResponsePayload::Success { query, results } => {
                let mut out = format!("Query: {}\nResults ({} rows):", query, results.len());
                for row in results {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, display_value(v)))
                        .collect();
                    out.push_str("\n  ");
                    out.push_str(&cells.join(", "));
                }
                out
            }
            ResponsePayload::Failure { query, error, kind } => match query {
                Some(query) => format!("Query: {}\n{}: {}", query, kind, error),
                None => format!("{}: {}", kind, error),
            },
        }
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Payload for an executed query. Failure payloads always carry the query
/// text and a non-empty error string.
pub fn format(query: &str, result: &ExecutionResult) -> ResponsePayload {
    match result {
        ExecutionResult::Rows { rows } => ResponsePayload::Success {
            query: query.to_string(),
            results: rows.clone(),
        },
        ExecutionResult::Failure(failure) => {
            let error = if failure.message.trim().is_empty() {
                format!("{} with no message", failure.kind)
            } else {
                failure.message.clone()
            };
            ResponsePayload::Failure {
                query: Some(query.to_string()),
                error,
                kind: failure.kind.to_string(),
            }
        }
    }
}

/// Payload for a pipeline that stopped before execution.
pub fn format_error(query: Option<&str>, error: &CopilotError) -> ResponsePayload {
    let query = match error {
        CopilotError::InvalidQuery { query, .. } => Some(query.clone()),
        _ => query.map(str::to_string),
    };
    ResponsePayload::Failure {
        query,
        error: error.to_string(),
        kind: error.kind().to_string(),
    }
}
