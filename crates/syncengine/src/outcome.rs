use thiserror::Error;

/// Why a reducer left state untouched.
///
/// None of these reach UI consumers; the session logs them and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Ignored {
    #[error("event belongs to task {event}, current task is {current}")]
    StaleTask { event: String, current: String },
    
    #[error("task {0} was cancelled or already finalized")]
    CancelledTask(String),
    
    #[error("event belongs to execution {event}, current execution is {current}")]
    StaleExecution { event: String, current: String },
    
    #[error("no execution is current")]
    NoExecution,
    
    #[error("no task is current")]
    NoTask,
    
    #[error("execution is not active")]
    NotActive,
    
    #[error("duplicate delivery")]
    Duplicate,
    
    #[error("acknowledgement for a superseded request")]
    Superseded,
    
    #[error("subflow stack is empty")]
    EmptySubflowStack,
    
    #[error("no conversation to sync with")]
    NoConversation,
    
    #[error("invalid in current state: {0}")]
    InvalidState(String),
    
    #[error("unknown event")]
    UnknownEvent,
    
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl Ignored {
    /// Whether this is a routine drop (stale or redelivered traffic) rather
    /// than a rejected local command
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            Ignored::StaleTask { .. }
                | Ignored::CancelledTask(_)
                | Ignored::StaleExecution { .. }
                | Ignored::NoExecution
                | Ignored::NoTask
                | Ignored::Duplicate
                | Ignored::Superseded
                | Ignored::UnknownEvent
        )
    }
}

/// Result of applying one event or command
pub type Outcome = Result<(), Ignored>;
