//! Core abstractions for the trellis workflow engine
//!
//! Plain graph data, the execution record, the executor contract and the
//! durable step primitive. Everything the runtime and the node library
//! share lives here.

mod error;
pub mod events;
mod execution;
mod node;
pub mod step;
mod workflow;

pub use error::{FlowError, NodeError, WorkflowError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, NodeEvent, NodeStatus};
pub use execution::{
    Execution, ExecutionId, ExecutionStatus, ExecutionUpdate, OutputMap, RunRequest,
    TriggerEvent, TriggerEventData,
};
pub use node::{namespaced, Context, Executor, NodeContext, NodeOutput};
pub use step::{InMemoryStepStore, RetryPolicy, StepError, StepHandle, StepStore};
pub use workflow::{Connection, NodeId, NodeSpec, NodeType, Workflow, WorkflowId};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
