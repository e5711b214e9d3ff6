use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    
    #[error("Protocol error: {0}")]
    Protocol(String),
    
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures at the channel boundary. These never corrupt engine state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not connected to orchestrator")]
    Disconnected,
    
    #[error("Send failed: {0}")]
    SendFailed(String),
    
    #[error("Channel closed")]
    Closed,
}
