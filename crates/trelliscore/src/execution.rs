use crate::{NodeId, NodeOutput, WorkflowError, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Outputs recorded for one run, keyed by node id.
pub type OutputMap = HashMap<NodeId, NodeOutput>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Success,
    Failed,
}

/// One run of a workflow, keyed by the triggering event's idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub idempotency_key: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: OutputMap,
    pub error: Option<String>,
    pub error_stack: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn pending(workflow_id: impl Into<WorkflowId>, idempotency_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            idempotency_key: idempotency_key.into(),
            status: ExecutionStatus::Pending,
            output: OutputMap::new(),
            error: None,
            error_stack: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn apply(&mut self, update: ExecutionUpdate) {
        self.status = update.status;
        if let Some(output) = update.output {
            self.output = output;
        }
        self.error = update.error;
        self.error_stack = update.error_stack;
        if update.completed_at.is_some() {
            self.completed_at = update.completed_at;
        }
    }
}

/// Terminal mutation of an execution row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUpdate {
    pub status: ExecutionStatus,
    pub output: Option<OutputMap>,
    pub error: Option<String>,
    pub error_stack: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionUpdate {
    pub fn success(output: OutputMap) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: Some(output),
            error: None,
            error_stack: None,
            completed_at: Some(Utc::now()),
        }
    }

    /// Failed runs keep whatever outputs completed before the failure.
    pub fn failure(output: OutputMap, error: String, error_stack: String) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output: Some(output),
            error: Some(error),
            error_stack: Some(error_stack),
            completed_at: Some(Utc::now()),
        }
    }
}

/// Event that starts a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerEvent {
    /// Idempotency key: at most one execution exists per event id.
    pub id: Option<String>,
    #[serde(default)]
    pub data: TriggerEventData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEventData {
    pub workflow_id: Option<WorkflowId>,
    pub initial_data: Option<NodeOutput>,
}

/// A trigger event that carries everything a run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub idempotency_key: String,
    pub workflow_id: WorkflowId,
    pub initial_data: NodeOutput,
}

impl TriggerEvent {
    pub fn new(id: impl Into<String>, workflow_id: impl Into<WorkflowId>) -> Self {
        Self {
            id: Some(id.into()),
            data: TriggerEventData {
                workflow_id: Some(workflow_id.into()),
                initial_data: None,
            },
        }
    }

    pub fn with_initial_data(mut self, initial_data: NodeOutput) -> Self {
        self.data.initial_data = Some(initial_data);
        self
    }

    /// Reject events that lack an idempotency key or a workflow id.
    pub fn into_request(self) -> Result<RunRequest, WorkflowError> {
        let idempotency_key = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or(WorkflowError::MissingIdempotencyKey)?;
        let workflow_id = self
            .data
            .workflow_id
            .filter(|id| !id.is_empty())
            .ok_or(WorkflowError::MissingWorkflowId)?;

        Ok(RunRequest {
            idempotency_key,
            workflow_id,
            initial_data: self.data.initial_data.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_without_id_is_rejected() {
        let event = TriggerEvent {
            id: None,
            data: TriggerEventData {
                workflow_id: Some("wf".into()),
                initial_data: None,
            },
        };
        assert_eq!(event.into_request(), Err(WorkflowError::MissingIdempotencyKey));
    }

    #[test]
    fn event_without_workflow_is_rejected() {
        let event = TriggerEvent {
            id: Some("evt_1".into()),
            data: TriggerEventData::default(),
        };
        assert_eq!(event.into_request(), Err(WorkflowError::MissingWorkflowId));
    }

    #[test]
    fn missing_initial_data_defaults_to_empty_object() {
        let request = TriggerEvent::new("evt_1", "wf").into_request().unwrap();
        assert_eq!(request.idempotency_key, "evt_1");
        assert!(request.initial_data.is_empty());
    }

    #[test]
    fn parses_wire_event() {
        let event: TriggerEvent = serde_json::from_value(json!({
            "id": "evt_2",
            "data": { "workflowId": "wf_7", "initialData": { "email": "a@b.c" } }
        }))
        .unwrap();

        let request = event.into_request().unwrap();
        assert_eq!(request.workflow_id, "wf_7");
        assert_eq!(request.initial_data["email"], "a@b.c");
    }

    #[test]
    fn failure_update_keeps_partial_output() {
        let mut execution = Execution::pending("wf", "evt");
        let mut output = OutputMap::new();
        output.insert("a".into(), json!({ "a": 1 }).as_object().cloned().unwrap());

        execution.apply(ExecutionUpdate::failure(output, "boom".into(), "boom".into()));

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("boom"));
        assert!(execution.output.contains_key("a"));
        assert!(execution.completed_at.is_some());
    }

    #[test]
    fn success_update_clears_earlier_error() {
        let mut execution = Execution::pending("wf", "evt");
        execution.apply(ExecutionUpdate::failure(
            OutputMap::new(),
            "upstream 503".into(),
            "upstream 503".into(),
        ));

        execution.apply(ExecutionUpdate::success(OutputMap::new()));

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.error, None);
        assert_eq!(execution.error_stack, None);
    }
}
