//! Natural-language-to-query pipeline
//!
//! - `descriptor`: what a backend can be asked
//! - `synthesizer`: question -> candidate query via a text generator
//! - `validator`: candidate -> validated query
//! - `executor`: validated query -> rows or failure
//! - `formatter`: result -> caller payload
//! - `gateway`: the single entry point wiring the stages together

pub mod descriptor;
pub mod executor;
pub mod formatter;
pub mod gateway;
pub mod query;
pub mod synthesizer;
pub mod validator;

pub use descriptor::{FieldDescriptor, SchemaDescriptor};
pub use executor::{
    ExecutionFailure, ExecutionResult, FailureKind, JobId, JobPoll, JobStatus, PollPolicy, PollingExecutor,
    QueryExecutor, QueryService, SqlBackend, SyncExecutor,
};
pub use formatter::ResponsePayload;
pub use gateway::NlqGateway;
pub use query::{CandidateQuery, Dialect, Question, Row, ValidatedQuery};
pub use synthesizer::QuerySynthesizer;
pub use validator::{QueryValidator, ValidationMode};
