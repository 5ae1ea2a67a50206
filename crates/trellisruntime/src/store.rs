//! Persistence boundaries the engine writes through.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use trelliscore::{Execution, ExecutionUpdate, FlowError, Result, Workflow, WorkflowError};

/// Storage for execution rows, one per idempotency key.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Create the PENDING row for a key, or return the row that already exists.
    async fn create(&self, workflow_id: &str, idempotency_key: &str) -> Result<Execution>;

    async fn update(
        &self,
        workflow_id: &str,
        idempotency_key: &str,
        update: ExecutionUpdate,
    ) -> Result<Execution>;

    async fn get(&self, idempotency_key: &str) -> Result<Option<Execution>>;
}

/// Read access to saved workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load(&self, workflow_id: &str) -> Result<Workflow>;
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    rows: RwLock<HashMap<String, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, workflow_id: &str, idempotency_key: &str) -> Result<Execution> {
        let mut rows = self.rows.write().await;
        let row = rows
            .entry(idempotency_key.to_string())
            .or_insert_with(|| Execution::pending(workflow_id, idempotency_key));
        Ok(row.clone())
    }

    async fn update(
        &self,
        workflow_id: &str,
        idempotency_key: &str,
        update: ExecutionUpdate,
    ) -> Result<Execution> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(idempotency_key)
            .filter(|row| row.workflow_id == workflow_id)
            .ok_or_else(|| {
                FlowError::Execution(format!(
                    "No execution for workflow {} with key {}",
                    workflow_id, idempotency_key
                ))
            })?;
        row.apply(update);
        Ok(row.clone())
    }

    async fn get(&self, idempotency_key: &str) -> Result<Option<Execution>> {
        Ok(self.rows.read().await.get(idempotency_key).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.clone(), workflow);
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load(&self, workflow_id: &str) -> Result<Workflow> {
        let workflows = self.workflows.read().await;
        workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trelliscore::{ExecutionStatus, OutputMap};

    #[tokio::test]
    async fn create_is_idempotent_per_key() {
        let store = InMemoryExecutionStore::new();
        let first = store.create("wf", "evt_1").await.unwrap();
        let second = store.create("wf", "evt_1").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.len().await, 1);
        assert_eq!(first.status, ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn update_finalizes_row() {
        let store = InMemoryExecutionStore::new();
        store.create("wf", "evt_1").await.unwrap();

        let row = store
            .update("wf", "evt_1", ExecutionUpdate::success(OutputMap::new()))
            .await
            .unwrap();

        assert_eq!(row.status, ExecutionStatus::Success);
        assert!(row.completed_at.is_some());
        assert_eq!(store.get("evt_1").await.unwrap(), Some(row));
    }

    #[tokio::test]
    async fn update_requires_matching_row() {
        let store = InMemoryExecutionStore::new();
        store.create("wf", "evt_1").await.unwrap();

        let wrong_workflow = store
            .update("other", "evt_1", ExecutionUpdate::success(OutputMap::new()))
            .await;
        assert!(wrong_workflow.is_err());
        assert!(store.update("wf", "nope", ExecutionUpdate::success(OutputMap::new())).await.is_err());
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_retriable() {
        let store = InMemoryWorkflowStore::new();
        let err = store.load("missing").await.unwrap_err();
        assert!(matches!(err, FlowError::Workflow(WorkflowError::NotFound(_))));
        assert!(!err.is_retriable());
    }
}
