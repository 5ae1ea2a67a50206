use crate::{EventEmitter, NodeError, NodeId, NodeType, StepHandle};
use async_trait::async_trait;

/// Key/value mapping produced by one node's executor.
///
/// Non-trigger executors namespace their result under the node's configured
/// variable name (`{ "myGemini": { "text": .. } }`); trigger executors may
/// return a flat payload.
pub type NodeOutput = serde_json::Map<String, serde_json::Value>;

/// Merged upstream outputs handed to an executor.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Capability every node type implements
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute the node with the given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Everything an executor receives for one invocation
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    pub node_type: NodeType,

    /// Opaque node configuration from the editor
    pub data: serde_json::Value,

    /// Outputs of upstream nodes, or the initial payload for triggers
    pub context: Context,

    /// Owner of the workflow
    pub user_id: String,

    /// Durable step handle scoped to this node
    pub step: StepHandle,

    /// Best-effort status publisher
    pub publish: EventEmitter,
}

impl NodeContext {
    /// Get a required string field from the node configuration
    pub fn require_data_str(&self, name: &str) -> Result<&str, NodeError> {
        self.data
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Deserialize the node configuration into the executor's own shape.
    ///
    /// A node saved without data parses as an empty object.
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, NodeError> {
        let data = match &self.data {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(data)
            .map_err(|e| NodeError::Configuration(format!("{} node: {}", self.node_type, e)))
    }
}

/// Wrap a single value under a variable name, the shape non-trigger nodes return.
pub fn namespaced(variable_name: impl Into<String>, value: serde_json::Value) -> NodeOutput {
    let mut output = NodeOutput::new();
    output.insert(variable_name.into(), value);
    output
}
