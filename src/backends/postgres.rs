//! PostgreSQL warehouse backend
//!
//! For CUR exports loaded into Postgres. The generated query is wrapped in
//! `row_to_json` so any projection comes back as JSON objects without
//! per-type decoding.

use crate::error::{CopilotError, Result};
use crate::nlq::executor::SqlBackend;
use crate::nlq::query::Row;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| CopilotError::Config(format!("Failed to connect to PostgreSQL: {}", e)))?;
        info!("Connected to PostgreSQL warehouse");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Wrap a query so each result row is returned as one JSON object.
pub fn wrap_as_json_rows(sql: &str) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!("SELECT row_to_json(q) AS row FROM ({}) AS q", inner)
}

#[async_trait]
impl SqlBackend for PostgresWarehouse {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        // EXPLAIN cannot be used as a subquery; its plan lines come back as text
        if sql.trim_start().to_lowercase().starts_with("explain") {
            let lines = sqlx::query_scalar::<_, String>(sql.trim().trim_end_matches(';'))
                .fetch_all(&self.pool)
                .await?;
            return Ok(lines
                .into_iter()
                .map(|line| {
                    let mut row = Row::new();
                    row.insert("QUERY PLAN".to_string(), serde_json::Value::String(line));
                    row
                })
                .collect());
        }

        let wrapped = wrap_as_json_rows(sql);
        let values = sqlx::query_scalar::<_, serde_json::Value>(&wrapped)
            .fetch_all(&self.pool)
            .await?;

        values
            .into_iter()
            .map(|value| match value {
                serde_json::Value::Object(row) => Ok(row),
                other => Err(CopilotError::Backend(format!(
                    "Expected a JSON object per row, got {}",
                    other
                ))),
            })
            .collect()
    }
}
