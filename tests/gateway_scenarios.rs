use async_trait::async_trait;
use finops_copilot::error::{CopilotError, Result};
use finops_copilot::llm::{GenerationParams, Prompt, TextGenerator};
use finops_copilot::nlq::{
    CandidateQuery, Dialect, ExecutionResult, FailureKind, JobId, JobPoll, JobStatus, NlqGateway, PollPolicy,
    PollingExecutor, QueryExecutor, QueryService, QuerySynthesizer, QueryValidator, Question, ResponsePayload, Row,
    SchemaDescriptor, SqlBackend, SyncExecutor, ValidationMode,
};
use finops_copilot::observability::ExecutionLogger;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Generator that always answers with the same text and remembers prompts.
struct ScriptedGenerator {
    reply: std::result::Result<String, String>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGenerator {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &Prompt, _params: &GenerationParams) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(CopilotError::Generation(message.clone())),
        }
    }
}

struct FakeWarehouse {
    rows: Vec<Row>,
    fault: Option<String>,
    calls: AtomicUsize,
}

impl FakeWarehouse {
    fn with_rows(rows: Vec<Row>) -> Arc<Self> {
        Arc::new(Self {
            rows,
            fault: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn faulting(message: &str) -> Arc<Self> {
        Arc::new(Self {
            rows: Vec::new(),
            fault: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SqlBackend for FakeWarehouse {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn run_query(&self, _sql: &str) -> Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fault {
            Some(message) => Err(CopilotError::Backend(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }
}

/// Query service that replays a fixed sequence of poll responses.
struct ScriptedService {
    polls: Mutex<Vec<JobPoll>>,
    poll_count: AtomicUsize,
}

impl ScriptedService {
    fn new(mut polls: Vec<JobPoll>) -> Arc<Self> {
        polls.reverse();
        Arc::new(Self {
            polls: Mutex::new(polls),
            poll_count: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl QueryService for ScriptedService {
    async fn submit(&self, _expression: &str) -> Result<JobId> {
        Ok(JobId("job-1".to_string()))
    }

    async fn poll(&self, _job: &JobId) -> Result<JobPoll> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let mut polls = self.polls.lock().unwrap();
        // The last scripted status repeats once the script runs out
        let next = if polls.len() > 1 { polls.pop() } else { polls.last().cloned() };
        next.ok_or_else(|| CopilotError::Backend("no scripted poll".to_string()))
    }
}

/// Query service whose calls hang far longer than any sensible deadline.
struct StallingService {
    stall_on_submit: bool,
    stall: Duration,
}

#[async_trait]
impl QueryService for StallingService {
    async fn submit(&self, _expression: &str) -> Result<JobId> {
        if self.stall_on_submit {
            tokio::time::sleep(self.stall).await;
        }
        Ok(JobId("job-slow".to_string()))
    }

    async fn poll(&self, _job: &JobId) -> Result<JobPoll> {
        tokio::time::sleep(self.stall).await;
        Ok(JobPoll {
            status: JobStatus::Complete,
            results: Some(Vec::new()),
            error_message: None,
        })
    }
}

fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

fn pending() -> JobPoll {
    JobPoll {
        status: JobStatus::Running,
        results: None,
        error_message: None,
    }
}

fn billing_gateway(generator: Arc<ScriptedGenerator>, warehouse: Arc<FakeWarehouse>) -> NlqGateway {
    NlqGateway::new(
        SchemaDescriptor::cur_warehouse("cur", "cur_data"),
        QuerySynthesizer::new(generator),
        QueryValidator::new(ValidationMode::Shallow),
        Arc::new(SyncExecutor::new(warehouse)),
    )
}

fn config_gateway(generator: Arc<ScriptedGenerator>, service: Arc<ScriptedService>, policy: PollPolicy) -> NlqGateway {
    NlqGateway::new(
        SchemaDescriptor::resource_config(),
        QuerySynthesizer::new(generator),
        QueryValidator::new(ValidationMode::Shallow),
        Arc::new(PollingExecutor::new(service, policy)),
    )
}

fn fast_policy(timeout_ms: u64) -> PollPolicy {
    PollPolicy {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        timeout: Duration::from_millis(timeout_ms),
    }
}

#[tokio::test]
async fn test_top_services_question_returns_rows_in_backend_order() {
    let rows = vec![
        row(json!({"service": "AmazonEC2", "cost": 1500.5})),
        row(json!({"service": "AmazonRDS", "cost": 45.0})),
        row(json!({"service": "AmazonS3", "cost": 10.25})),
    ];
    let generator = ScriptedGenerator::replying("SELECT service, cost FROM x");
    let warehouse = FakeWarehouse::with_rows(rows.clone());
    let gateway = billing_gateway(generator.clone(), warehouse.clone());

    let payload = gateway.ask(&Question::new("What are my top 3 services by cost?")).await;

    assert_eq!(
        payload,
        ResponsePayload::Success {
            query: "SELECT service, cost FROM x".to_string(),
            results: rows,
        }
    );
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 1);

    let prompts = generator.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].user.contains("What are my top 3 services by cost?"));
    assert!(prompts[0].system.as_deref().unwrap_or_default().contains("cur.cur_data"));
}

#[tokio::test]
async fn test_destructive_statement_never_reaches_the_warehouse() {
    let warehouse = FakeWarehouse::with_rows(Vec::new());
    let gateway = billing_gateway(ScriptedGenerator::replying("DROP TABLE billing"), warehouse.clone());

    let payload = gateway.ask(&Question::new("Clean up the billing table")).await;

    match &payload {
        ResponsePayload::Failure { query, error, kind } => {
            assert_eq!(kind, "InvalidQueryError");
            assert_eq!(query.as_deref(), Some("DROP TABLE billing"));
            assert!(!error.is_empty());
        }
        other => panic!("expected failure payload, got {:?}", other),
    }
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 0);

    let err = gateway.run(&Question::new("Clean up the billing table")).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidQueryError");
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_warehouse_fault_becomes_backend_failure() {
    let generator = ScriptedGenerator::replying("SELECT service FROM cur.cur_data");
    let gateway = billing_gateway(generator, FakeWarehouse::faulting("connection reset"));

    let (validated, result) = gateway.run(&Question::new("Which services cost most?")).await.unwrap();
    match &result {
        ExecutionResult::Failure(failure) => {
            assert_eq!(failure.kind, FailureKind::Backend);
            assert_eq!(failure.query, validated.text());
            assert!(failure.message.contains("connection reset"));
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let payload = gateway.ask(&Question::new("Which services cost most?")).await;
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["kind"], "BackendError");
    assert_eq!(value["query"], "SELECT service FROM cur.cur_data");
}

#[tokio::test]
async fn test_generation_failure_payload_has_no_query() {
    let warehouse = FakeWarehouse::with_rows(Vec::new());
    let gateway = billing_gateway(ScriptedGenerator::failing("rate limited"), warehouse.clone());

    let payload = gateway.ask(&Question::new("What did we spend?")).await;

    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["kind"], "GenerationError");
    assert!(value.get("query").is_none());
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_job_stops_polling_immediately() {
    let service = ScriptedService::new(vec![JobPoll {
        status: JobStatus::Failed,
        results: None,
        error_message: Some("syntax error".to_string()),
    }]);
    let executor = PollingExecutor::new(service.clone(), fast_policy(1_000));
    let gateway = config_gateway(
        ScriptedGenerator::replying("SELECT resourceId WHERE resourceType = 'AWS::EC2::Instance'"),
        service.clone(),
        fast_policy(1_000),
    );

    let (validated, _) = gateway.run(&Question::new("List my EC2 instances")).await.unwrap();
    assert_eq!(service.poll_count.load(Ordering::SeqCst), 1);

    let result = executor.execute(&validated).await;
    match result {
        ExecutionResult::Failure(failure) => {
            assert_eq!(failure.kind, FailureKind::Backend);
            assert_eq!(failure.message, "syntax error");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(service.poll_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pending_job_completes_after_polling() {
    let service = ScriptedService::new(vec![
        pending(),
        pending(),
        JobPoll {
            status: JobStatus::Complete,
            results: Some(vec![row(json!({"resourceId": "i-0abc", "awsRegion": "eu-west-1"}))]),
            error_message: None,
        },
    ]);
    let gateway = config_gateway(
        ScriptedGenerator::replying("```sql\nSELECT resourceId, awsRegion WHERE resourceType = 'AWS::EC2::Instance'\n```"),
        service.clone(),
        fast_policy(5_000),
    );

    let payload = gateway.ask(&Question::new("Where are my instances?")).await;

    assert!(payload.is_success(), "unexpected payload: {:?}", payload);
    assert_eq!(
        payload.query(),
        Some("SELECT resourceId, awsRegion WHERE resourceType = 'AWS::EC2::Instance'")
    );
    assert_eq!(service.poll_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_job_that_never_settles_times_out() {
    let service = ScriptedService::new(vec![pending()]);
    let gateway = config_gateway(
        ScriptedGenerator::replying("SELECT COUNT(*) WHERE resourceType = 'AWS::S3::Bucket'"),
        service.clone(),
        fast_policy(60),
    );

    let payload = gateway.ask(&Question::new("How many buckets do I have?")).await;

    match payload {
        ResponsePayload::Failure { kind, query, .. } => {
            assert_eq!(kind, "TimedOutError");
            assert_eq!(query.as_deref(), Some("SELECT COUNT(*) WHERE resourceType = 'AWS::S3::Bucket'"));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(service.poll_count.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_config_expression_with_from_clause_is_rejected() {
    let service = ScriptedService::new(vec![pending()]);
    let gateway = config_gateway(
        ScriptedGenerator::replying("SELECT resourceId FROM resources"),
        service.clone(),
        fast_policy(1_000),
    );

    let payload = gateway.ask(&Question::new("List resources")).await;

    assert!(!payload.is_success());
    assert_eq!(service.poll_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_each_question_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("executions.jsonl");
    let logger = Arc::new(ExecutionLogger::new(Some(log_path.clone()), 10));
    let gateway = billing_gateway(
        ScriptedGenerator::replying("SELECT 1"),
        FakeWarehouse::with_rows(vec![row(json!({"one": 1}))]),
    )
    .with_logger(logger.clone());

    gateway.ask(&Question::new("first")).await;
    gateway.ask(&Question::new("second")).await;

    let recent = logger.recent(10);
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|entry| entry.success));
    assert!(recent.iter().all(|entry| entry.rows_returned == Some(1)));

    let written = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(written.lines().count(), 2);
    assert!(written.contains("\"question\":\"first\""));
}

#[tokio::test]
async fn test_stalled_service_calls_are_cut_off_at_the_deadline() {
    let validated = QueryValidator::default()
        .validate(&CandidateQuery::new("SELECT resourceId", Dialect::ResourceConfigDsl))
        .unwrap();

    for stall_on_submit in [false, true] {
        let service = Arc::new(StallingService {
            stall_on_submit,
            stall: Duration::from_millis(1_500),
        });
        let executor = PollingExecutor::new(service, fast_policy(100));

        let started = Instant::now();
        let result = executor.execute(&validated).await;
        let elapsed = started.elapsed();

        match result {
            ExecutionResult::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::TimedOut);
                assert_eq!(failure.query, "SELECT resourceId");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(
            elapsed < Duration::from_millis(600),
            "deadline of 100ms overran: {:?} (stall_on_submit={})",
            elapsed,
            stall_on_submit
        );
    }
}
