//! Distributed [`WorkflowLock`] backed by Redis.
//!
//! Acquisition is a single `SET key token NX EX ttl` so only one caller ever
//! wins the key. Release and renew run as Lua scripts that compare the
//! stored token against the caller's before mutating the key, so a worker
//! that lost its lock to expiry can never release or extend a lock another
//! worker has since acquired.

use async_trait::async_trait;
use chrono::Utc;
use flowctl_application::WorkflowLock;
use flowctl_core::{AppError, AppResult, WorkflowId};
use flowctl_domain::{Lock, LOCK_TTL_SECONDS};
use redis::aio::ConnectionManager;
use redis::Script;

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

const RENEW_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
";

/// Lock adapter over a Redis connection manager.
pub struct RedisWorkflowLock {
    connection: ConnectionManager,
}

impl RedisWorkflowLock {
    /// Wraps an existing connection manager.
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn key(workflow_id: WorkflowId) -> String {
        format!("flowctl:lock:{workflow_id}")
    }
}

#[async_trait]
impl WorkflowLock for RedisWorkflowLock {
    async fn acquire(&self, workflow_id: WorkflowId) -> AppResult<Lock> {
        let lock = Lock::new(workflow_id, Utc::now());
        let mut connection = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(workflow_id))
            .arg(&lock.token)
            .arg("NX")
            .arg("EX")
            .arg(LOCK_TTL_SECONDS)
            .query_async(&mut connection)
            .await
            .map_err(|error| AppError::Transient(format!("redis SET NX failed: {error}")))?;

        match reply {
            Some(_) => Ok(lock),
            None => Err(AppError::Locked(format!("workflow {workflow_id} is already locked"))),
        }
    }

    async fn release(&self, lock: &Lock) -> AppResult<()> {
        let mut connection = self.connection.clone();
        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(Self::key(lock.workflow_id))
            .arg(&lock.token)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| AppError::Transient(format!("redis release script failed: {error}")))?;

        // A `0` reply means the key had already expired or was claimed by
        // another worker; releasing a lock we no longer hold is not an error.
        let _ = released;
        Ok(())
    }

    async fn renew(&self, lock: &Lock) -> AppResult<Lock> {
        let mut connection = self.connection.clone();
        let renewed: i64 = Script::new(RENEW_SCRIPT)
            .key(Self::key(lock.workflow_id))
            .arg(&lock.token)
            .arg(LOCK_TTL_SECONDS)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| AppError::Transient(format!("redis renew script failed: {error}")))?;

        if renewed == 0 {
            return Err(AppError::Locked(format!(
                "lock for workflow {} was lost before it could be renewed",
                lock.workflow_id
            )));
        }

        Ok(Lock {
            workflow_id: lock.workflow_id,
            expires_at: Utc::now() + chrono::Duration::seconds(LOCK_TTL_SECONDS),
            token: lock.token.clone(),
        })
    }
}
