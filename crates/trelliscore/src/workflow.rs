use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub type WorkflowId = String;
pub type NodeId = String;

/// Complete workflow definition as persisted by the editor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    pub user_id: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Workflow {
    pub fn new(id: impl Into<WorkflowId>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            user_id: user_id.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, from_node_id: impl Into<NodeId>, to_node_id: impl Into<NodeId>) {
        self.connections.push(Connection {
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of every node whose type originates a run.
    pub fn trigger_node_ids(&self) -> HashSet<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.node_type.is_trigger())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Every connection endpoint must name a node of this workflow.
    pub fn validate_connections(&self) -> Result<(), WorkflowError> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        for conn in &self.connections {
            for endpoint in [&conn.from_node_id, &conn.to_node_id] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(WorkflowError::NodeNotFound(endpoint.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Executor-owned configuration, never interpreted by the engine.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            data: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
}

impl Connection {
    pub fn new(from_node_id: impl Into<NodeId>, to_node_id: impl Into<NodeId>) -> Self {
        Self {
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
        }
    }
}

/// Closed set of node types the engine knows how to dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Placeholder node the editor seeds new workflows with
    Initial,
    ManualTrigger,
    GoogleFormTrigger,
    StripeTrigger,
    ScheduleTrigger,
    HttpRequest,
    Delay,
}

impl NodeType {
    pub const ALL: [NodeType; 7] = [
        NodeType::Initial,
        NodeType::ManualTrigger,
        NodeType::GoogleFormTrigger,
        NodeType::StripeTrigger,
        NodeType::ScheduleTrigger,
        NodeType::HttpRequest,
        NodeType::Delay,
    ];

    /// Trigger nodes receive the run's initial payload instead of parent outputs.
    pub fn is_trigger(self) -> bool {
        matches!(
            self,
            NodeType::Initial
                | NodeType::ManualTrigger
                | NodeType::GoogleFormTrigger
                | NodeType::StripeTrigger
                | NodeType::ScheduleTrigger
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Initial => "INITIAL",
            NodeType::ManualTrigger => "MANUAL_TRIGGER",
            NodeType::GoogleFormTrigger => "GOOGLE_FORM_TRIGGER",
            NodeType::StripeTrigger => "STRIPE_TRIGGER",
            NodeType::ScheduleTrigger => "SCHEDULE_TRIGGER",
            NodeType::HttpRequest => "HTTP_REQUEST",
            NodeType::Delay => "DELAY",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
