use crate::registry::ExecutorRegistry;
use crate::store::{ExecutionStore, WorkflowStore};
use crate::WorkflowExecutor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use trelliscore::{EventBus, Execution, ExecutionEvent, FlowError, RetryPolicy, StepStore, TriggerEvent};

/// Persistence backends a runtime writes through
#[derive(Clone)]
pub struct Stores {
    pub workflows: Arc<dyn WorkflowStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub steps: Arc<dyn StepStore>,
}

/// Main runtime for executing workflows
pub struct TrellisRuntime {
    registry: Arc<ExecutorRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
    executions: Arc<dyn ExecutionStore>,
}

impl TrellisRuntime {
    /// The registry is frozen from here on; runs only read it.
    pub fn new(registry: ExecutorRegistry, config: RuntimeConfig, stores: Stores) -> Self {
        let registry = Arc::new(registry);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = Arc::new(WorkflowExecutor::new(
            registry.clone(),
            stores.workflows,
            stores.executions.clone(),
            stores.steps,
            event_bus.clone(),
            config.retry,
        ));

        Self {
            registry,
            executor,
            event_bus,
            executions: stores.executions,
        }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn executions(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }

    /// Run a trigger event to completion
    pub async fn handle(&self, event: TriggerEvent) -> Result<Execution, FlowError> {
        self.executor.execute(event).await
    }

    /// Run a trigger event on its own task; runs for different keys proceed concurrently
    pub fn spawn(&self, event: TriggerEvent) -> JoinHandle<Result<Execution, FlowError>> {
        let executor = self.executor.clone();
        tokio::spawn(async move { executor.execute(event).await })
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "retry": { "max_attempts": 5 } }"#).unwrap();

        assert_eq!(config.event_buffer_size, 1000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_ms, 1000);
    }
}
