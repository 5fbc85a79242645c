pub mod backends;
pub mod config;
pub mod cur;
pub mod error;
pub mod llm;
pub mod nlq;
pub mod observability;
pub mod tags;

pub use config::{AppConfig, Target};
pub use error::{CopilotError, Result};
pub use nlq::{NlqGateway, Question, ResponsePayload};
