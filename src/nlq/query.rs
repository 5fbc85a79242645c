//! Query values flowing through the gateway.
//!
//! A `CandidateQuery` is untrusted generator output. The only way to obtain a
//! `ValidatedQuery` is through `QueryValidator::validate`, so executors that
//! accept `&ValidatedQuery` can never see text that skipped the gate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single result record: column/field name to value, in backend order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Natural-language question supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Question(String);

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Question {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Question {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query syntax accepted by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// SQL against the billing warehouse.
    WarehouseSql,
    /// Projection/aggregation expressions for the resource-config query service.
    ResourceConfigDsl,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::WarehouseSql => "warehouse-sql",
            Dialect::ResourceConfigDsl => "resource-config-dsl",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query text produced by the synthesizer; not yet trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub text: String,
    pub dialect: Dialect,
}

impl CandidateQuery {
    pub fn new(text: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            text: text.into(),
            dialect,
        }
    }
}

/// A candidate that passed the syntax gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedQuery {
    text: String,
    dialect: Dialect,
}

impl ValidatedQuery {
    /// Only the validator constructs validated queries.
    pub(crate) fn new(text: String, dialect: Dialect) -> Self {
        Self { text, dialect }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
