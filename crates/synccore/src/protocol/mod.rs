// crates/synccore/src/protocol/mod.rs

mod command;
mod event;

pub use command::{ChatCommand, ClientCommand, ExecuteWorkflowCommand, SyncWorkflowCommand};
pub use event::{
    AgentComplete, AgentError, AgentQuestion, ChatProgress, ChatResponse, ChatStream,
    ConnectionEvent, EventScope, ExecutionAck, ExecutionComplete, ExecutionFailure, ExecutionLog,
    ExecutionRef, ExecutionStep, LogRecord, ServerEvent, SubflowComplete, SubflowStart,
    SubflowStep, TaskRef, WorkflowMutation,
};
