use crate::graph::{build_parents, prune, resolve_input, topological_sort};
use crate::registry::ExecutorRegistry;
use crate::store::{ExecutionStore, WorkflowStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, Span};
use trelliscore::{
    Execution, ExecutionEvent, ExecutionUpdate, EventBus, FlowError, NodeContext, NodeOutput,
    OutputMap, RetryPolicy, RunRequest, StepHandle, StepStore, TriggerEvent, Workflow,
    WorkflowError,
};

const FINALIZE_FAILURE: &str = "finalize-failure";

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs trigger events through their workflows, one node at a time.
///
/// Every externally visible effect of a run happens inside a durable step
/// keyed by the event's idempotency key, so re-delivering the same event
/// replays completed work instead of repeating it.
pub struct WorkflowExecutor {
    registry: Arc<ExecutorRegistry>,
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    steps: Arc<dyn StepStore>,
    event_bus: Arc<EventBus>,
    retry: RetryPolicy,
}

/// What a run has produced so far, kept for the failure path
#[derive(Default)]
struct RunState {
    execution: Option<Execution>,
    outputs: OutputMap,
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        steps: Arc<dyn StepStore>,
        event_bus: Arc<EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            workflows,
            executions,
            steps,
            event_bus,
            retry,
        }
    }

    /// Execute a trigger event and return the finalized execution row.
    ///
    /// On failure the row is finalized to FAILED before the original error
    /// is returned.
    #[instrument(
        name = "workflow.execute",
        skip(self, event),
        fields(idempotency_key = tracing::field::Empty, workflow_id = tracing::field::Empty)
    )]
    pub async fn execute(&self, event: TriggerEvent) -> Result<Execution, FlowError> {
        let request = event.into_request()?;
        Span::current().record("idempotency_key", request.idempotency_key.as_str());
        Span::current().record("workflow_id", request.workflow_id.as_str());

        let start_time = Instant::now();
        let step = StepHandle::new(
            self.steps.clone(),
            request.idempotency_key.clone(),
            self.retry.clone(),
        );

        // A key finalized as FAILED stays failed; re-delivery does not re-enter the run.
        if let Some(finalized) = step.recorded::<Execution, FlowError>(FINALIZE_FAILURE).await? {
            info!("Execution {} already finalized as failed", finalized.id);
            return Err(FlowError::AlreadyFailed {
                idempotency_key: request.idempotency_key,
                error: finalized.error.unwrap_or_default(),
            });
        }

        let mut state = RunState::default();

        let result = self.run(&step, &request, &mut state).await;
        let duration_ms = elapsed_ms(start_time);

        if let Err(err) = &result {
            error!("Run failed: {}", err);
            self.finalize_failure(&step, &request, &state, err).await;
        }

        if let Some(execution) = &state.execution {
            self.event_bus.emit(ExecutionEvent::WorkflowCompleted {
                execution_id: execution.id,
                success: result.is_ok(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        result
    }

    async fn run(
        &self,
        step: &StepHandle,
        request: &RunRequest,
        state: &mut RunState,
    ) -> Result<Execution, FlowError> {
        let executions = &self.executions;
        let workflows = &self.workflows;

        let execution: Execution = step
            .run("create-execution", move || async move {
                executions
                    .create(&request.workflow_id, &request.idempotency_key)
                    .await
            })
            .await?;
        let execution_id = execution.id;
        state.execution = Some(execution);

        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: request.workflow_id.clone(),
            timestamp: Utc::now(),
        });
        info!("Starting execution {} of workflow {}", execution_id, request.workflow_id);

        let workflow: Workflow = step
            .run("load-workflow", move || async move {
                workflows.load(&request.workflow_id).await
            })
            .await?;
        workflow.validate_connections()?;

        let trigger_ids = workflow.trigger_node_ids();
        if trigger_ids.is_empty() {
            return Err(WorkflowError::NoTriggerNode.into());
        }

        let pruned = prune(&workflow, &trigger_ids);
        let order = topological_sort(&pruned.nodes, &pruned.connections)?;
        let parents = build_parents(&pruned.connections);
        debug!(
            "Execution order: {:?}",
            order.iter().map(|n| n.id.as_str()).collect::<Vec<_>>()
        );

        for node in &order {
            let executor = self.registry.dispatch(node.node_type)?;
            let context = resolve_input(
                &node.id,
                &parents,
                &state.outputs,
                &trigger_ids,
                &request.initial_data,
            );

            let ctx = NodeContext {
                node_id: node.id.clone(),
                node_type: node.node_type,
                data: node.data.clone(),
                context,
                user_id: workflow.user_id.clone(),
                step: step.scoped(&format!("node:{}", node.id)),
                publish: self.event_bus.create_emitter(execution_id, node.id.clone()),
            };

            self.event_bus.emit(ExecutionEvent::NodeStarted {
                execution_id,
                node_id: node.id.clone(),
                node_type: node.node_type,
                timestamp: Utc::now(),
            });

            let started = Instant::now();
            let (ctx, executor, node_id) = (&ctx, &executor, &node.id);
            let result: Result<NodeOutput, FlowError> = step
                .run(&format!("node:{}", node.id), move || {
                    let ctx = ctx.clone();
                    async move {
                        executor.execute(ctx).await.map_err(|source| FlowError::Node {
                            node_id: node_id.clone(),
                            source,
                        })
                    }
                })
                .await;
            let duration_ms = elapsed_ms(started);

            match result {
                Ok(output) => {
                    info!("Node {} completed in {}ms", node.id, duration_ms);
                    self.event_bus.emit(ExecutionEvent::NodeCompleted {
                        execution_id,
                        node_id: node.id.clone(),
                        output: output.clone(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    state.outputs.insert(node.id.clone(), output);
                }
                Err(e) => {
                    error!("Node {} failed: {}", node.id, e);
                    self.event_bus.emit(ExecutionEvent::NodeFailed {
                        execution_id,
                        node_id: node.id.clone(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Err(e);
                }
            }
        }

        let update = ExecutionUpdate::success(state.outputs.clone());
        let update = &update;
        let execution: Execution = step
            .run("finalize-success", move || async move {
                executions
                    .update(&request.workflow_id, &request.idempotency_key, update.clone())
                    .await
            })
            .await?;

        info!(
            "Execution {} succeeded after {} nodes",
            execution.id,
            state.outputs.len()
        );
        state.execution = Some(execution.clone());
        Ok(execution)
    }

    /// Record the failure on the execution row, once per idempotency key.
    async fn finalize_failure(
        &self,
        step: &StepHandle,
        request: &RunRequest,
        state: &RunState,
        err: &FlowError,
    ) {
        if state.execution.is_none() {
            error!("No execution row to finalize for key {}", request.idempotency_key);
            return;
        }

        let executions = &self.executions;
        let update = ExecutionUpdate::failure(state.outputs.clone(), err.to_string(), err.chain());
        let update = &update;
        let finalized: Result<Execution, FlowError> = step
            .run(FINALIZE_FAILURE, move || async move {
                executions
                    .update(&request.workflow_id, &request.idempotency_key, update.clone())
                    .await
            })
            .await;

        if let Err(e) = finalized {
            error!(
                "Failed to finalize execution for key {}: {}",
                request.idempotency_key, e
            );
        }
    }
}
