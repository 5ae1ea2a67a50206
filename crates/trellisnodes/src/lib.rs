//! Standard node library
//!
//! Built-in executors for every trigger type plus HTTP requests and delays

mod http;
mod time;
mod trigger;

pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use trigger::TriggerNode;
use trellisruntime::ExecutorRegistry;
use trelliscore::NodeType;

use std::sync::Arc;

/// Register all standard executors with a registry
pub fn register_all(registry: &mut ExecutorRegistry) {
    let trigger = Arc::new(TriggerNode);
    for node_type in NodeType::ALL.into_iter().filter(|t| t.is_trigger()) {
        registry.register(node_type, trigger.clone());
    }
    registry.register(NodeType::HttpRequest, Arc::new(HttpRequestNode::new()));
    registry.register(NodeType::Delay, Arc::new(DelayNode));
}
