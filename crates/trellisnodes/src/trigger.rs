use async_trait::async_trait;
use trelliscore::{Executor, NodeContext, NodeError, NodeOutput, NodeStatus};

/// Executor shared by every trigger type.
///
/// A trigger's context is the run's initial payload; it hands that payload
/// on unchanged so downstream nodes can read it flat.
pub struct TriggerNode;

#[async_trait]
impl Executor for TriggerNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.publish.status(NodeStatus::Loading);
        tracing::debug!("{} trigger {} fired", ctx.node_type, ctx.node_id);
        ctx.publish.status(NodeStatus::Success);
        Ok(ctx.context)
    }
}
