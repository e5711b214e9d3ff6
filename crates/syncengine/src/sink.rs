use std::sync::{Arc, Mutex};
use synccore::{ClientCommand, TransportError};
use tokio::sync::mpsc;

/// Where the session hands outbound commands.
///
/// Implementations must not block: the session is a synchronous reducer and
/// the only suspension point is on the transport side of this queue.
pub trait CommandSink: Send {
    fn send(&self, command: ClientCommand) -> Result<(), TransportError>;
}

/// Queues commands for an async transport pump
#[derive(Debug, Clone)]
pub struct QueueSink {
    sender: mpsc::UnboundedSender<ClientCommand>,
}

impl QueueSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl CommandSink for QueueSink {
    fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        self.sender.send(command).map_err(|_| TransportError::Closed)
    }
}

/// Keeps every command in memory. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<ClientCommand>>>,
    offline: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Make subsequent sends fail with `TransportError::Disconnected`
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(|p| p.into_inner()) = offline;
    }
    
    pub fn sent(&self) -> Vec<ClientCommand> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
    
    pub fn take(&self) -> Vec<ClientCommand> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|p| p.into_inner()))
    }
    
    pub fn names(&self) -> Vec<&'static str> {
        self.sent().iter().map(ClientCommand::name).collect()
    }
}

impl CommandSink for RecordingSink {
    fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        if *self.offline.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(TransportError::Disconnected);
        }
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(command);
        Ok(())
    }
}
