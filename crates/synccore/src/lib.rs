//! Wire vocabulary for the flowsync engine
//! 
//! This crate provides the identifiers, workflow snapshot types and the
//! command/event protocol spoken with the orchestrator. It holds no engine
//! state and has no async runtime dependency.

mod error;
mod ids;
pub mod protocol;
mod workflow;

pub use error::{SyncError, TransportError};
pub use ids::{ConversationId, ExecutionId, MessageId, SessionId, TaskId};
pub use protocol::*;
pub use workflow::{
    ExecutableWorkflow, NodeId, Position, SubworkflowId, WorkflowContext, WorkflowEdge,
    WorkflowGraph, WorkflowNode,
};

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
