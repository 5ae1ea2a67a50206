use std::collections::HashMap;
use std::sync::Arc;
use trelliscore::{Executor, NodeType, WorkflowError};

/// Node type to executor table.
///
/// Populated once at startup and shared read-only between runs.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor for a node type, replacing any previous one
    pub fn register(&mut self, node_type: NodeType, executor: Arc<dyn Executor>) {
        tracing::info!("Registering executor for node type: {}", node_type);
        self.executors.insert(node_type, executor);
    }

    /// Look up the executor for a node type.
    ///
    /// A missing executor means the stored workflow and this process disagree
    /// about the node set; it is never retried.
    pub fn dispatch(&self, node_type: NodeType) -> Result<Arc<dyn Executor>, WorkflowError> {
        self.executors
            .get(&node_type)
            .cloned()
            .ok_or(WorkflowError::UnknownNodeType(node_type))
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }

    /// Registered node types, sorted
    pub fn list_node_types(&self) -> Vec<NodeType> {
        let mut types: Vec<NodeType> = self.executors.keys().copied().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use trelliscore::{NodeContext, NodeError, NodeOutput};

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::new())
        }
    }

    #[test]
    fn dispatches_registered_type() {
        let mut registry = ExecutorRegistry::new();
        registry.register(NodeType::Delay, Arc::new(Noop));

        assert!(registry.dispatch(NodeType::Delay).is_ok());
        assert!(registry.contains(NodeType::Delay));
    }

    #[test]
    fn unregistered_type_fails_loudly() {
        let registry = ExecutorRegistry::new();
        match registry.dispatch(NodeType::HttpRequest) {
            Err(err) => assert_eq!(err, WorkflowError::UnknownNodeType(NodeType::HttpRequest)),
            Ok(_) => panic!("dispatch should fail for an unregistered type"),
        }
    }

    #[test]
    fn lists_types_in_stable_order() {
        let mut registry = ExecutorRegistry::new();
        registry.register(NodeType::HttpRequest, Arc::new(Noop));
        registry.register(NodeType::ManualTrigger, Arc::new(Noop));

        assert_eq!(
            registry.list_node_types(),
            vec![NodeType::ManualTrigger, NodeType::HttpRequest]
        );
    }
}
