use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type NodeId = String;
pub type SubworkflowId = String;

/// Node as it exists on the editor canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Node-type specific configuration, opaque to the engine
    #[serde(default)]
    pub data: Value,
}

impl WorkflowNode {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: None,
            position: None,
            data: Value::Null,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Directed edge between two canvas nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            source_handle: None,
            label: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// `workflow{nodes,edges}` payload of chat and sync commands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

/// `workflow{...}` payload of `execute_workflow`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutableWorkflow {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    pub variables: Vec<Value>,
    pub outputs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
}

/// The editor's current workflow, attached to every outbound command that
/// needs it so the orchestrator never works from a guessed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_workflow_id: Option<String>,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub variables: Vec<Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_tabs: Option<Vec<Value>>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(WorkflowEdge::new(source, target));
    }

    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Snapshot for chat and sync commands
    pub fn graph(&self) -> WorkflowGraph {
        WorkflowGraph {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Snapshot for `execute_workflow`
    pub fn executable(&self) -> ExecutableWorkflow {
        ExecutableWorkflow {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            variables: self.variables.clone(),
            outputs: self.outputs.clone(),
            output_type: self.output_type.clone(),
        }
    }
}
