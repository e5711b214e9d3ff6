use crate::{
    ConversationId, ExecutableWorkflow, ExecutionId, SessionId, TaskId, WorkflowGraph,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Commands sent from the client to the orchestrator.
///
/// Framed as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    Chat(ChatCommand),
    CancelTask { task_id: TaskId },
    SyncWorkflow(SyncWorkflowCommand),
    ExecuteWorkflow(ExecuteWorkflowCommand),
    PauseExecution { execution_id: ExecutionId },
    ResumeExecution { execution_id: ExecutionId },
    StopExecution { execution_id: ExecutionId },
}

impl ClientCommand {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Chat(_) => "chat",
            ClientCommand::CancelTask { .. } => "cancel_task",
            ClientCommand::SyncWorkflow(_) => "sync_workflow",
            ClientCommand::ExecuteWorkflow(_) => "execute_workflow",
            ClientCommand::PauseExecution { .. } => "pause_execution",
            ClientCommand::ResumeExecution { .. } => "resume_execution",
            ClientCommand::StopExecution { .. } => "stop_execution",
        }
    }
    
    pub fn to_frame(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCommand {
    pub session_id: SessionId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_workflow_id: Option<String>,
    pub workflow: WorkflowGraph,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_tabs: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWorkflowCommand {
    pub conversation_id: ConversationId,
    pub workflow: WorkflowGraph,
    pub analysis: Option<Value>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteWorkflowCommand {
    pub execution_id: ExecutionId,
    pub workflow: ExecutableWorkflow,
    pub inputs: HashMap<String, Value>,
    pub speed_ms: u64,
}
