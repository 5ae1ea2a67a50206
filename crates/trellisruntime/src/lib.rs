//! Workflow execution runtime
//!
//! Prunes a saved workflow to what its triggers reach, orders it, and runs
//! each node through the executor registered for its type as a durable step.

mod executor;
pub mod graph;
mod registry;
mod runtime;
pub mod store;

pub use executor::WorkflowExecutor;
pub use graph::{build_parents, prune, reachable, resolve_input, topological_sort, ParentMap, PrunedGraph};
pub use registry::ExecutorRegistry;
pub use runtime::{RuntimeConfig, Stores, TrellisRuntime};
pub use store::{
    ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowStore, WorkflowStore,
};
