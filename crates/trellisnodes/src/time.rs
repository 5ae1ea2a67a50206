use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use trelliscore::{Executor, NodeContext, NodeError, NodeOutput, NodeStatus};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelayData {
    seconds: Option<f64>,
    delay_ms: Option<u64>,
}

impl DelayData {
    fn duration(&self) -> Result<Duration, NodeError> {
        match (self.delay_ms, self.seconds) {
            (Some(ms), _) => Ok(Duration::from_millis(ms)),
            (None, Some(seconds)) => Duration::try_from_secs_f64(seconds).map_err(|e| {
                NodeError::Configuration(format!("Invalid delay: {} seconds ({})", seconds, e))
            }),
            // Default to 1 second if not specified
            (None, None) => Ok(Duration::from_secs(1)),
        }
    }
}

/// Delay execution for a configured duration
pub struct DelayNode;

#[async_trait]
impl Executor for DelayNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay = ctx.parse_data::<DelayData>()?.duration()?;

        ctx.publish.status(NodeStatus::Loading);
        ctx.publish.info(format!("Delaying for {}ms", delay.as_millis()));

        ctx.step.sleep::<NodeError>("delay", delay).await?;

        ctx.publish.status(NodeStatus::Success);

        // Pass through the upstream context
        Ok(ctx.context)
    }
}
