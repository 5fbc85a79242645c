//! Environment-driven configuration
//!
//! Binaries load `.env` first (dotenv), then call `AppConfig::from_env`.
//! Parsing goes through a lookup function so it can be exercised without
//! touching the process environment.

use crate::backends::{HttpConfigQueryService, PostgresWarehouse, TrinoSettings, TrinoWarehouse};
use crate::error::{CopilotError, Result};
use crate::llm::{AnthropicClient, LlmClient, TextGenerator};
use crate::nlq::{
    NlqGateway, PollPolicy, PollingExecutor, QueryExecutor, QuerySynthesizer, QueryValidator, SchemaDescriptor,
    SqlBackend, SyncExecutor, ValidationMode,
};
use crate::observability::ExecutionLogger;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseConfig {
    Trino {
        coordinator_url: String,
        catalog: String,
        schema: String,
        user: String,
    },
    Postgres {
        database_url: String,
    },
}

/// Which backend a question is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Cost & Usage data in the billing warehouse.
    #[default]
    Billing,
    /// Resource inventory in the config query service.
    Config,
}

impl FromStr for Target {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "billing" | "cur" => Ok(Target::Billing),
            "config" | "resources" => Ok(Target::Config),
            other => Err(CopilotError::Config(format!("Unknown target: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub warehouse: WarehouseConfig,
    pub cur_table: String,
    pub config_service_url: String,
    pub poll: PollPolicy,
    pub validation_mode: ValidationMode,
    pub execution_log: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let provider = match or("LLM_PROVIDER", "openai").to_lowercase().as_str() {
            "openai" => LlmProvider::OpenAi,
            "anthropic" => LlmProvider::Anthropic,
            other => return Err(CopilotError::Config(format!("Unknown LLM_PROVIDER: {}", other))),
        };
        let (key_var, default_base, default_model) = match provider {
            LlmProvider::OpenAi => ("OPENAI_API_KEY", LlmClient::DEFAULT_BASE_URL, LlmClient::DEFAULT_MODEL),
            LlmProvider::Anthropic => (
                "ANTHROPIC_API_KEY",
                AnthropicClient::DEFAULT_BASE_URL,
                AnthropicClient::DEFAULT_MODEL,
            ),
        };
        let api_key = get("LLM_API_KEY")
            .or_else(|| get(key_var))
            .ok_or_else(|| CopilotError::Config(format!("LLM_API_KEY or {} must be set", key_var)))?;

        let llm = LlmConfig {
            provider,
            api_key,
            base_url: or("LLM_BASE_URL", default_base),
            model: or("LLM_MODEL", default_model),
        };

        let warehouse = match or("WAREHOUSE_BACKEND", "trino").to_lowercase().as_str() {
            "trino" | "athena" => WarehouseConfig::Trino {
                coordinator_url: or("TRINO_COORDINATOR_URL", "http://localhost:8080"),
                catalog: or("TRINO_CATALOG", "awsdatacatalog"),
                schema: or("TRINO_SCHEMA", "cur"),
                user: or("TRINO_USER", "finops"),
            },
            "postgres" => WarehouseConfig::Postgres {
                database_url: get("DATABASE_URL").ok_or_else(|| {
                    CopilotError::Config("DATABASE_URL must be set for the postgres warehouse".to_string())
                })?,
            },
            other => return Err(CopilotError::Config(format!("Unknown WAREHOUSE_BACKEND: {}", other))),
        };

        let parse_u64 = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| CopilotError::Config(format!("{} must be a number, got {}", key, v))),
                None => Ok(default),
            }
        };
        let positive = |key: &str, default: u64| -> Result<u64> {
            match parse_u64(key, default)? {
                0 => Err(CopilotError::Config(format!("{} must be greater than zero", key))),
                n => Ok(n),
            }
        };
        let defaults = PollPolicy::default();
        let poll = PollPolicy {
            initial_delay: Duration::from_millis(positive("POLL_INITIAL_MS", defaults.initial_delay.as_millis() as u64)?),
            max_delay: Duration::from_millis(positive("POLL_MAX_MS", defaults.max_delay.as_millis() as u64)?),
            multiplier: defaults.multiplier,
            timeout: Duration::from_secs(positive("POLL_TIMEOUT_SECS", defaults.timeout.as_secs())?),
        };

        Ok(Self {
            llm,
            warehouse,
            cur_table: or("CUR_TABLE", "cur_data"),
            config_service_url: or("CONFIG_SERVICE_URL", "http://localhost:8090"),
            poll,
            validation_mode: or("VALIDATION_MODE", "shallow").parse()?,
            execution_log: get("EXECUTION_LOG").map(PathBuf::from),
        })
    }

    pub fn text_generator(&self) -> Result<Arc<dyn TextGenerator>> {
        let llm = &self.llm;
        let generator: Arc<dyn TextGenerator> = match llm.provider {
            LlmProvider::OpenAi => Arc::new(LlmClient::new(
                llm.api_key.clone(),
                llm.model.clone(),
                llm.base_url.clone(),
            )?),
            LlmProvider::Anthropic => Arc::new(AnthropicClient::new(
                llm.api_key.clone(),
                llm.model.clone(),
                llm.base_url.clone(),
            )?),
        };
        Ok(generator)
    }

    pub fn descriptor(&self, target: Target) -> SchemaDescriptor {
        match (target, &self.warehouse) {
            (Target::Billing, WarehouseConfig::Trino { schema, .. }) => {
                SchemaDescriptor::cur_warehouse(schema, &self.cur_table)
            }
            (Target::Billing, WarehouseConfig::Postgres { .. }) => {
                SchemaDescriptor::cur_warehouse("public", &self.cur_table)
            }
            (Target::Config, _) => SchemaDescriptor::resource_config(),
        }
    }

    async fn executor(&self, target: Target) -> Result<Arc<dyn QueryExecutor>> {
        match target {
            Target::Billing => {
                let backend: Arc<dyn SqlBackend> = match &self.warehouse {
                    WarehouseConfig::Trino {
                        coordinator_url,
                        catalog,
                        schema,
                        user,
                    } => Arc::new(TrinoWarehouse::new(TrinoSettings {
                        coordinator_url: coordinator_url.clone(),
                        catalog: catalog.clone(),
                        schema: schema.clone(),
                        user: user.clone(),
                        ..TrinoSettings::default()
                    })?),
                    WarehouseConfig::Postgres { database_url } => {
                        Arc::new(PostgresWarehouse::connect(database_url).await?)
                    }
                };
                Ok(Arc::new(SyncExecutor::new(backend)))
            }
            Target::Config => {
                let service = Arc::new(HttpConfigQueryService::new(&self.config_service_url)?);
                Ok(Arc::new(PollingExecutor::new(service, self.poll)))
            }
        }
    }

    /// Wire a gateway for the given target.
    pub async fn gateway(&self, target: Target) -> Result<NlqGateway> {
        let gateway = NlqGateway::new(
            self.descriptor(target),
            QuerySynthesizer::new(self.text_generator()?),
            QueryValidator::new(self.validation_mode),
            self.executor(target).await?,
        );
        Ok(match &self.execution_log {
            Some(path) => gateway.with_logger(Arc::new(ExecutionLogger::new(Some(path.clone()), 1000))),
            None => gateway,
        })
    }
}
