//! Environment-driven configuration for connecting to the durable backends.
//!
//! Plain env-var structs, no config-file layer; each field reads one
//! variable with a sensible default, consistent with the rest of the
//! workspace's ambient stack.

use flowctl_core::{AppError, AppResult};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connection settings for the Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// `postgres://...` connection string.
    pub database_url: String,
    /// Maximum pool size.
    pub max_connections: u32,
}

impl PostgresConfig {
    /// Reads settings from `DATABASE_URL` / `DATABASE_MAX_CONNECTIONS`.
    pub fn from_env() -> AppResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::Validation("DATABASE_URL must be set".to_owned()))?;
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

/// Opens a Postgres connection pool per `config`.
pub async fn connect_postgres(config: &PostgresConfig) -> AppResult<PgPool> {
    tracing::info!(max_connections = config.max_connections, "connecting to postgres");
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|error| AppError::Transient(format!("failed to connect to postgres: {error}")))
}

/// Connection settings for the Redis-backed lock.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// `redis://...` connection string.
    pub redis_url: String,
}

impl RedisConfig {
    /// Reads settings from `REDIS_URL`.
    pub fn from_env() -> AppResult<Self> {
        let redis_url = std::env::var("REDIS_URL")
            .map_err(|_| AppError::Validation("REDIS_URL must be set".to_owned()))?;

        Ok(Self { redis_url })
    }
}

/// Opens a Redis connection manager per `config`.
pub async fn connect_redis(config: &RedisConfig) -> AppResult<ConnectionManager> {
    tracing::info!("connecting to redis");
    let client = redis::Client::open(config.redis_url.as_str())
        .map_err(|error| AppError::Validation(format!("invalid redis url: {error}")))?;
    ConnectionManager::new(client)
        .await
        .map_err(|error| AppError::Transient(format!("failed to connect to redis: {error}")))
}
