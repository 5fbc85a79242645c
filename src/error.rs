use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid query: {reason}. Query: {query}")]
    InvalidQuery { query: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl CopilotError {
    /// Name of the error in the gateway taxonomy, as surfaced to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            CopilotError::Generation(_) => "GenerationError",
            CopilotError::InvalidQuery { .. } => "InvalidQueryError",
            CopilotError::Backend(_) => "BackendError",
            CopilotError::TimedOut(_) => "TimedOutError",
            CopilotError::Config(_) => "ConfigError",
            CopilotError::Io(_) => "IoError",
            CopilotError::Json(_) => "JsonError",
            CopilotError::Csv(_) => "CsvError",
        }
    }

    pub fn invalid_query(query: impl Into<String>, reason: impl Into<String>) -> Self {
        CopilotError::InvalidQuery {
            query: query.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for CopilotError {
    fn from(err: sqlx::Error) -> Self {
        CopilotError::Backend(err.to_string())
    }
}

impl From<reqwest::Error> for CopilotError {
    fn from(err: reqwest::Error) -> Self {
        CopilotError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CopilotError>;
