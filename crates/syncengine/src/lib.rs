//! Realtime task & execution synchronization engine
//!
//! This crate keeps a workflow editor's chat tasks and stepped execution
//! visualization consistent with an at-least-once, partially ordered event
//! channel. Every handler is a synchronous reducer that filters by task or
//! execution identity before it touches state.

mod clock;
mod config;
mod driver;
mod exec_log;
mod execution;
mod outcome;
mod session;
mod sink;
mod subflow;
mod tasks;
mod trail;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use driver::{
    spawn_session, spawn_session_with_clock, ChannelTransport, Inbound, SessionCommand,
    SessionHandle, Transport,
};
pub use exec_log::{ExecutionLogEntry, ExecutionLogRecorder, SUBFLOW_COMPLETE, SUBFLOW_START};
pub use execution::{ControlRequest, Execution, ExecutionController, ExecutionStatus};
pub use outcome::{Ignored, Outcome};
pub use session::{ConnectionState, EngineSignal, MutationKind, Session, SessionSnapshot};
pub use sink::{CommandSink, QueueSink, RecordingSink};
pub use subflow::{SubflowFrame, SubflowStack};
pub use tasks::{ChatMessage, MessageRole, Task, TaskRegistry, TaskStart, TaskStatus};
pub use trail::Trail;
