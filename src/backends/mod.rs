//! Backend implementations
//!
//! - `trino`: billing warehouse over the Trino/Athena REST protocol
//! - `postgres`: billing warehouse loaded into PostgreSQL
//! - `config_service`: asynchronous resource-config query service

pub mod config_service;
pub mod postgres;
pub mod trino;

pub use config_service::HttpConfigQueryService;
pub use postgres::PostgresWarehouse;
pub use trino::{TrinoSettings, TrinoWarehouse};
