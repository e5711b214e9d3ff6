use crate::{ConversationId, ExecutionId, NodeId, SyncError, TaskId, WorkflowEdge, WorkflowNode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Events pushed by the orchestrator.
///
/// Framed as `{"event": "<name>", "data": {...}}`. Delivery is at-least-once
/// and only ordered within one task or execution stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ChatProgress(ChatProgress),
    ChatStream(ChatStream),
    ChatResponse(ChatResponse),
    ChatCancelled(TaskRef),
    AgentQuestion(AgentQuestion),
    AgentComplete(AgentComplete),
    AgentError(AgentError),
    ExecutionStarted(ExecutionRef),
    ExecutionStep(ExecutionStep),
    ExecutionPaused(ExecutionAck),
    ExecutionResumed(ExecutionAck),
    ExecutionComplete(ExecutionComplete),
    ExecutionError(ExecutionFailure),
    SubflowStart(SubflowStart),
    SubflowStep(SubflowStep),
    SubflowComplete(SubflowComplete),
    ExecutionLog(ExecutionLog),
    WorkflowModified(WorkflowMutation),
    WorkflowUpdate(WorkflowMutation),
}

/// Which identity gates an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope<'a> {
    Task(Option<&'a TaskId>),
    Execution(&'a ExecutionId),
}

impl ServerEvent {
    /// Every event name this client understands
    pub const NAMES: &'static [&'static str] = &[
        "chat_progress",
        "chat_stream",
        "chat_response",
        "chat_cancelled",
        "agent_question",
        "agent_complete",
        "agent_error",
        "execution_started",
        "execution_step",
        "execution_paused",
        "execution_resumed",
        "execution_complete",
        "execution_error",
        "subflow_start",
        "subflow_step",
        "subflow_complete",
        "execution_log",
        "workflow_modified",
        "workflow_update",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ChatProgress(_) => "chat_progress",
            ServerEvent::ChatStream(_) => "chat_stream",
            ServerEvent::ChatResponse(_) => "chat_response",
            ServerEvent::ChatCancelled(_) => "chat_cancelled",
            ServerEvent::AgentQuestion(_) => "agent_question",
            ServerEvent::AgentComplete(_) => "agent_complete",
            ServerEvent::AgentError(_) => "agent_error",
            ServerEvent::ExecutionStarted(_) => "execution_started",
            ServerEvent::ExecutionStep(_) => "execution_step",
            ServerEvent::ExecutionPaused(_) => "execution_paused",
            ServerEvent::ExecutionResumed(_) => "execution_resumed",
            ServerEvent::ExecutionComplete(_) => "execution_complete",
            ServerEvent::ExecutionError(_) => "execution_error",
            ServerEvent::SubflowStart(_) => "subflow_start",
            ServerEvent::SubflowStep(_) => "subflow_step",
            ServerEvent::SubflowComplete(_) => "subflow_complete",
            ServerEvent::ExecutionLog(_) => "execution_log",
            ServerEvent::WorkflowModified(_) => "workflow_modified",
            ServerEvent::WorkflowUpdate(_) => "workflow_update",
        }
    }

    pub fn scope(&self) -> EventScope<'_> {
        match self {
            ServerEvent::ChatProgress(e) => EventScope::Task(e.task_id.as_ref()),
            ServerEvent::ChatStream(e) => EventScope::Task(e.task_id.as_ref()),
            ServerEvent::ChatResponse(e) => EventScope::Task(e.task_id.as_ref()),
            ServerEvent::ChatCancelled(e) => EventScope::Task(e.task_id.as_ref()),
            ServerEvent::AgentQuestion(e) => EventScope::Task(e.task_id.as_ref()),
            ServerEvent::AgentComplete(e) => EventScope::Task(e.task_id.as_ref()),
            ServerEvent::AgentError(e) => EventScope::Task(e.task_id.as_ref()),
            ServerEvent::WorkflowModified(e) | ServerEvent::WorkflowUpdate(e) => {
                EventScope::Task(e.task_id.as_ref())
            }
            ServerEvent::ExecutionStarted(e) => EventScope::Execution(&e.execution_id),
            ServerEvent::ExecutionStep(e) => EventScope::Execution(&e.execution_id),
            ServerEvent::ExecutionPaused(e) | ServerEvent::ExecutionResumed(e) => {
                EventScope::Execution(&e.execution_id)
            }
            ServerEvent::ExecutionComplete(e) => EventScope::Execution(&e.execution_id),
            ServerEvent::ExecutionError(e) => EventScope::Execution(&e.execution_id),
            ServerEvent::SubflowStart(e) => EventScope::Execution(&e.execution_id),
            ServerEvent::SubflowStep(e) => EventScope::Execution(&e.execution_id),
            ServerEvent::SubflowComplete(e) => EventScope::Execution(&e.execution_id),
            ServerEvent::ExecutionLog(e) => EventScope::Execution(&e.execution_id),
        }
    }

    /// Parse one wire frame.
    ///
    /// Returns `Ok(None)` for event names this client does not know, so a
    /// newer orchestrator cannot break an older client.
    pub fn from_frame(frame: &str) -> crate::Result<Option<Self>> {
        let raw: RawFrame = serde_json::from_str(frame)?;
        if !Self::NAMES.contains(&raw.event.as_str()) {
            return Ok(None);
        }

        let data = match raw.data {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(SyncError::Protocol(format!(
                    "Event '{}' carries non-object data: {}",
                    raw.event, other
                )))
            }
        };

        let mut envelope = Map::new();
        envelope.insert("event".to_string(), Value::String(raw.event));
        envelope.insert("data".to_string(), data);
        Ok(Some(serde_json::from_value(Value::Object(envelope))?))
    }

    pub fn to_frame(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatProgress {
    pub event: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStream {
    pub chunk: String,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentQuestion {
    pub question: String,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentComplete {
    pub message: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
    pub error: String,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRef {
    pub execution_id: ExecutionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub node_label: Option<String>,
    #[serde(default)]
    pub step_index: Option<u64>,
}

/// Server acknowledgement of a pause or resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAck {
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub current_node_id: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionComplete {
    pub execution_id: ExecutionId,
    pub success: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub path: Option<Vec<NodeId>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub execution_id: ExecutionId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubflowStart {
    pub execution_id: ExecutionId,
    pub parent_node_id: NodeId,
    pub subworkflow_id: String,
    #[serde(default)]
    pub subworkflow_name: String,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubflowStep {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    #[serde(default)]
    pub step_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubflowComplete {
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub subworkflow_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub execution_id: ExecutionId,
    pub entry: LogRecord,
}

/// Execution log entry as reported by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub log_type: String,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub node_label: Option<String>,
    #[serde(default)]
    pub subworkflow_id: Option<String>,
    /// Nesting as the server saw it. Never used for annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subworkflow_stack: Option<Vec<String>>,
    /// Type-specific fields (decision outcome, inputs, outputs, ...)
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl LogRecord {
    pub fn new(log_type: impl Into<String>) -> Self {
        Self {
            id: None,
            log_type: log_type.into(),
            node_id: None,
            node_label: None,
            subworkflow_id: None,
            subworkflow_stack: None,
            payload: Map::new(),
        }
    }

    pub fn with_node(mut self, node_id: impl Into<NodeId>, label: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self.node_label = Some(label.into());
        self
    }

    pub fn with_subworkflow(mut self, subworkflow_id: impl Into<String>) -> Self {
        self.subworkflow_id = Some(subworkflow_id.into());
        self
    }
}

/// Graph mutation proposed by the orchestrator, handed on untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMutation {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Connection status reported by the channel adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: Option<String> },
    Error { message: String },
}
