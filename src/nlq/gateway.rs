//! NL-to-Query Gateway
//!
//! question -> synthesize -> validate -> execute -> format
//!
//! Each question is handled start to finish with no state carried between
//! calls. Generation and validation errors stop the pipeline before any
//! backend call; backend failures come back from the executor as values.

use crate::error::Result;
use crate::nlq::descriptor::SchemaDescriptor;
use crate::nlq::executor::{ExecutionResult, QueryExecutor};
use crate::nlq::formatter::{self, ResponsePayload};
use crate::nlq::query::{Question, ValidatedQuery};
use crate::nlq::synthesizer::QuerySynthesizer;
use crate::nlq::validator::QueryValidator;
use crate::observability::{ExecutionLogger, QueryLogEntry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct NlqGateway {
    descriptor: SchemaDescriptor,
    synthesizer: QuerySynthesizer,
    validator: QueryValidator,
    executor: Arc<dyn QueryExecutor>,
    logger: Option<Arc<ExecutionLogger>>,
}

impl NlqGateway {
    pub fn new(
        descriptor: SchemaDescriptor,
        synthesizer: QuerySynthesizer,
        validator: QueryValidator,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            descriptor,
            synthesizer,
            validator,
            executor,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<ExecutionLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    /// Run the pipeline. `Err` means the question never reached the backend.
    pub async fn run(&self, question: &Question) -> Result<(ValidatedQuery, ExecutionResult)> {
        let candidate = self.synthesizer.synthesize(question, &self.descriptor).await?;
        let validated = self.validator.validate(&candidate)?;
        let result = self.executor.execute(&validated).await;
        Ok((validated, result))
    }

    /// Answer a question. Always returns a well-formed payload.
    pub async fn ask(&self, question: &Question) -> ResponsePayload {
        let query_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%query_id, dialect = %self.descriptor.dialect, "answering question");

        let outcome = self.run(question).await;
        let payload = match &outcome {
            Ok((validated, result)) => {
                info!(%query_id, query = %validated, success = result.is_success(), "query executed");
                formatter::format(validated.text(), result)
            }
            Err(e) => {
                warn!(%query_id, kind = e.kind(), "question rejected before execution: {}", e);
                formatter::format_error(None, e)
            }
        };

        if let Some(logger) = &self.logger {
            let entry = self.log_entry(query_id, question, &outcome, &payload, started);
            if let Err(e) = logger.log_query(entry) {
                warn!(%query_id, "failed to write execution log: {}", e);
            }
        }
        payload
    }

    fn log_entry(
        &self,
        query_id: Uuid,
        question: &Question,
        outcome: &Result<(ValidatedQuery, ExecutionResult)>,
        payload: &ResponsePayload,
        started: Instant,
    ) -> QueryLogEntry {
        let (error_kind, error_message) = match payload {
            ResponsePayload::Failure { kind, error, .. } => (Some(kind.clone()), Some(error.clone())),
            ResponsePayload::Success { .. } => (None, None),
        };
        let rows_returned = match outcome {
            Ok((_, result)) => result.row_count().map(|n| n as u64),
            Err(_) => None,
        };

        QueryLogEntry {
            timestamp: Utc::now(),
            query_id,
            question: question.as_str().to_string(),
            dialect: self.descriptor.dialect,
            query: payload.query().map(str::to_string),
            success: payload.is_success(),
            error_kind,
            error_message,
            rows_returned,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}
