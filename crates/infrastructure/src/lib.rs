//! Infrastructure adapters implementing the application crate's store and
//! lock ports: Postgres and Redis for durable deployments, in-memory
//! equivalents for tests and single-process use.

#![forbid(unsafe_code)]

mod config;
mod in_memory_workflow_lock;
mod in_memory_workflow_store;
mod postgres_workflow_store;
mod redis_workflow_lock;

pub use config::{connect_postgres, connect_redis, PostgresConfig, RedisConfig};
pub use in_memory_workflow_lock::InMemoryWorkflowLock;
pub use in_memory_workflow_store::InMemoryWorkflowStore;
pub use postgres_workflow_store::{run_migrations, PostgresWorkflowStore};
pub use redis_workflow_lock::RedisWorkflowLock;
