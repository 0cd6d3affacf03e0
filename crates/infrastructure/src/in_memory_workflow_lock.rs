//! Reference [`WorkflowLock`] backed by an in-process map.
//!
//! Unlike [`crate::RedisWorkflowLock`], expiry is only checked lazily on the
//! next `acquire`; nothing reclaims a stale entry in the background. Meant
//! for tests and single-process deployments paired with
//! [`crate::InMemoryWorkflowStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use flowctl_application::WorkflowLock;
use flowctl_core::{AppError, AppResult, WorkflowId};
use flowctl_domain::Lock;

/// Lock adapter backed by an in-process `HashMap`.
#[derive(Default)]
pub struct InMemoryWorkflowLock {
    held: Mutex<HashMap<WorkflowId, Lock>>,
}

impl InMemoryWorkflowLock {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<WorkflowId, Lock>> {
        match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl WorkflowLock for InMemoryWorkflowLock {
    async fn acquire(&self, workflow_id: WorkflowId) -> AppResult<Lock> {
        let now = Utc::now();
        let mut held = self.locked();

        if let Some(existing) = held.get(&workflow_id) {
            if !existing.is_expired(now) {
                return Err(AppError::Locked(format!("workflow {workflow_id} is already locked")));
            }
        }

        let lock = Lock::new(workflow_id, now);
        held.insert(workflow_id, lock.clone());
        Ok(lock)
    }

    async fn release(&self, lock: &Lock) -> AppResult<()> {
        let mut held = self.locked();
        if held.get(&lock.workflow_id).is_some_and(|existing| existing.token == lock.token) {
            held.remove(&lock.workflow_id);
        }
        Ok(())
    }

    async fn renew(&self, lock: &Lock) -> AppResult<Lock> {
        let now = Utc::now();
        let mut held = self.locked();

        match held.get(&lock.workflow_id) {
            Some(existing) if existing.token == lock.token => {
                let renewed = Lock::new(lock.workflow_id, now);
                let renewed = Lock {
                    token: lock.token.clone(),
                    ..renewed
                };
                held.insert(lock.workflow_id, renewed.clone());
                Ok(renewed)
            }
            _ => Err(AppError::Locked(format!(
                "lock for workflow {} was lost before it could be renewed",
                lock.workflow_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryWorkflowLock;
    use flowctl_application::WorkflowLock;
    use flowctl_core::WorkflowId;

    #[tokio::test]
    async fn second_acquire_is_locked_out() {
        let lock = InMemoryWorkflowLock::new();
        let workflow_id = WorkflowId::new();
        let first = lock.acquire(workflow_id).await;
        assert!(first.is_ok());

        let second = lock.acquire(workflow_id).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn release_allows_reacquire() {
        let lock = InMemoryWorkflowLock::new();
        let workflow_id = WorkflowId::new();
        let held = match lock.acquire(workflow_id).await {
            Ok(held) => held,
            Err(error) => panic!("expected Ok, got {error}"),
        };

        assert!(lock.release(&held).await.is_ok());
        assert!(lock.acquire(workflow_id).await.is_ok());
    }
}
