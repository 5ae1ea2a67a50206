use crate::{NodeId, NodeType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node {node_id} failed: {source}")]
    Node {
        node_id: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Step '{step}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        #[source]
        source: Box<FlowError>,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    /// The run for this key was already finalized as failed.
    #[error("Execution {idempotency_key} already failed: {error}")]
    AlreadyFailed {
        idempotency_key: String,
        error: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Whether the durable step runtime may try the failing step again.
    ///
    /// Store failures are transient; node failures defer to the executor's own
    /// classification. Everything else is a data or configuration problem.
    pub fn is_retriable(&self) -> bool {
        match self {
            FlowError::Node { source, .. } => source.is_retriable(),
            FlowError::Store(_) => true,
            _ => false,
        }
    }

    /// Render the error and its source chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            rendered.push_str("\n  caused by: ");
            rendered.push_str(&cause.to_string());
            current = cause.source();
        }
        rendered
    }
}

/// Errors raised by node executors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("{0}")]
    NonRetriable(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },
}

impl NodeError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, NodeError::ExecutionFailed(_) | NodeError::Timeout { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Trigger event is missing an idempotency key")]
    MissingIdempotencyKey,

    #[error("Trigger event is missing a workflow id")]
    MissingWorkflowId,

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Workflow has no trigger node")]
    NoTriggerNode,

    #[error("Workflow contains a cycle (through node {node_id})")]
    CyclicDependency { node_id: NodeId },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("No executor for node type {0}")]
    UnknownNodeType(NodeType),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_errors_classify_retriability() {
        assert!(NodeError::ExecutionFailed("timeout".into()).is_retriable());
        assert!(NodeError::Timeout { seconds: 5 }.is_retriable());
        assert!(!NodeError::Configuration("missing variableName".into()).is_retriable());
        assert!(!NodeError::NonRetriable("bad".into()).is_retriable());
    }

    #[test]
    fn flow_error_defers_to_node_classification() {
        let transient = FlowError::Node {
            node_id: "a".into(),
            source: NodeError::ExecutionFailed("503".into()),
        };
        let fatal = FlowError::Node {
            node_id: "a".into(),
            source: NodeError::NonRetriable("no".into()),
        };
        assert!(transient.is_retriable());
        assert!(!fatal.is_retriable());
        assert!(FlowError::Store("connection reset".into()).is_retriable());
        assert!(!FlowError::Workflow(WorkflowError::NoTriggerNode).is_retriable());
    }

    #[test]
    fn chain_renders_every_cause() {
        let err = FlowError::RetriesExhausted {
            step: "node:x".into(),
            attempts: 3,
            source: Box::new(FlowError::Node {
                node_id: "x".into(),
                source: NodeError::ExecutionFailed("connection refused".into()),
            }),
        };
        let chain = err.chain();
        assert!(chain.starts_with("Step 'node:x' failed after 3 attempts"));
        assert!(chain.contains("caused by: Node x failed"));
        assert!(chain.contains("caused by: Execution failed: connection refused"));
    }

    #[test]
    fn unknown_node_type_names_the_type() {
        let err = WorkflowError::UnknownNodeType(NodeType::HttpRequest);
        assert_eq!(err.to_string(), "No executor for node type HTTP_REQUEST");
    }
}
