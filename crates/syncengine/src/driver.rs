// crates/syncengine/src/driver.rs

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::outcome::Ignored;
use crate::session::{EngineSignal, Session, SessionSnapshot};
use crate::sink::QueueSink;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use synccore::{
    ClientCommand, ConnectionEvent, ExecutionId, ServerEvent, TaskId, TransportError,
    WorkflowContext,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Outbound half of the channel adapter
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one command, resolving once the transport has accepted it
    async fn send(&self, command: ClientCommand) -> Result<(), TransportError>;
}

/// Transport that hands commands to an in-process receiver, for tests and
/// loopback orchestrators
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<ClientCommand>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        self.sender.send(command).map_err(|_| TransportError::Closed)
    }
}

/// Items the channel adapter feeds into a running session
#[derive(Debug, Clone)]
pub enum Inbound {
    Event(ServerEvent),
    /// Raw `{"event": .., "data": ..}` text frame
    Frame(String),
    Connection(ConnectionEvent),
    /// The pump could not deliver a command
    SendFailed {
        command: ClientCommand,
        error: TransportError,
    },
}

/// UI commands accepted by a running session
#[derive(Debug)]
pub enum SessionCommand {
    SendMessage {
        text: String,
        image: Option<String>,
        reply: Option<oneshot::Sender<TaskId>>,
    },
    CancelTask(TaskId),
    SyncWorkflow { source: String },
    SetWorkflow(WorkflowContext),
    StartExecution {
        inputs: HashMap<String, Value>,
        speed_ms: Option<u64>,
        reply: Option<oneshot::Sender<Result<ExecutionId, Ignored>>>,
    },
    PauseExecution,
    ResumeExecution,
    StopExecution,
    SetSpeed(u64),
    ClearExecutionLog,
    DismissTransportError,
}

/// Handle to a session running on its own task.
///
/// Dropping the handle stops both background tasks.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    inbound: mpsc::Sender<Inbound>,
    snapshots: watch::Receiver<SessionSnapshot>,
    signals: broadcast::Sender<EngineSignal>,
    shutdown: CancellationToken,
    _stop_on_drop: DropGuard,
    actor: JoinHandle<()>,
    pump: JoinHandle<()>,
}

/// Spawn a session actor plus an outbound pump feeding `transport`
pub fn spawn_session(config: EngineConfig, transport: Arc<dyn Transport>) -> SessionHandle {
    spawn_session_with_clock(config, transport, Arc::new(SystemClock))
}

pub fn spawn_session_with_clock(
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
) -> SessionHandle {
    let buffer = config.event_buffer_size.max(1);
    let (sink, mut outbound) = QueueSink::new();
    let mut session = Session::with_clock(config, Box::new(sink), clock);

    let (command_tx, mut command_rx) = mpsc::channel(buffer);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(buffer);
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
    let (signal_tx, _) = broadcast::channel(buffer);
    let shutdown = CancellationToken::new();

    let pump_shutdown = shutdown.clone();
    let pump_feedback = inbound_tx.downgrade();
    let pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = pump_shutdown.cancelled() => break,
                command = outbound.recv() => {
                    let Some(command) = command else { break };
                    if let Err(error) = transport.send(command.clone()).await {
                        tracing::warn!("Transport rejected {}: {}", command.name(), error);
                        let Some(feedback) = pump_feedback.upgrade() else { break };
                        if feedback.send(Inbound::SendFailed { command, error }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!("Outbound pump stopped");
    });

    let actor_shutdown = shutdown.clone();
    let actor_signals = signal_tx.clone();
    let actor = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = actor_shutdown.cancelled() => break,
                Some(command) = command_rx.recv() => run_command(&mut session, command),
                Some(item) = inbound_rx.recv() => receive(&mut session, item),
                else => break,
            }

            for signal in session.drain_signals() {
                let _ = actor_signals.send(signal);
            }
            let _ = snapshot_tx.send(session.snapshot());
        }
        tracing::info!("Session {} stopped", session.id());
    });

    SessionHandle {
        commands: command_tx,
        inbound: inbound_tx,
        snapshots: snapshot_rx,
        signals: signal_tx,
        _stop_on_drop: shutdown.clone().drop_guard(),
        shutdown,
        actor,
        pump,
    }
}

fn run_command(session: &mut Session, command: SessionCommand) {
    match command {
        SessionCommand::SendMessage { text, image, reply } => {
            let task_id = session.send_message(&text, image);
            if let Some(reply) = reply {
                let _ = reply.send(task_id);
            }
        }
        SessionCommand::CancelTask(task_id) => {
            let _ = session.cancel_task(&task_id);
        }
        SessionCommand::SyncWorkflow { source } => {
            let _ = session.sync_workflow(&source);
        }
        SessionCommand::SetWorkflow(workflow) => session.set_workflow(workflow),
        SessionCommand::StartExecution {
            inputs,
            speed_ms,
            reply,
        } => {
            let result = session.start_execution(inputs, speed_ms);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        SessionCommand::PauseExecution => {
            let _ = session.pause_execution();
        }
        SessionCommand::ResumeExecution => {
            let _ = session.resume_execution();
        }
        SessionCommand::StopExecution => {
            let _ = session.stop_execution();
        }
        SessionCommand::SetSpeed(speed_ms) => {
            session.set_speed(speed_ms);
        }
        SessionCommand::ClearExecutionLog => session.clear_execution_log(),
        SessionCommand::DismissTransportError => session.dismiss_transport_error(),
    }
}

fn receive(session: &mut Session, item: Inbound) {
    match item {
        Inbound::Event(event) => {
            let _ = session.apply(&event);
        }
        Inbound::Frame(frame) => {
            let _ = session.apply_frame(&frame);
        }
        Inbound::Connection(event) => session.on_connection(&event),
        Inbound::SendFailed { command, error } => session.on_send_failed(&command, &error),
    }
}

impl SessionHandle {
    /// Sender the channel adapter pushes server traffic into
    pub fn inbound(&self) -> mpsc::Sender<Inbound> {
        self.inbound.clone()
    }

    pub async fn deliver(&self, item: Inbound) -> Result<(), TransportError> {
        self.inbound.send(item).await.map_err(|_| TransportError::Closed)
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<EngineSignal> {
        self.signals.subscribe()
    }

    pub async fn send_message(
        &self,
        text: impl Into<String>,
        image: Option<String>,
    ) -> Result<TaskId, TransportError> {
        let (reply, response) = oneshot::channel();
        self.command(SessionCommand::SendMessage {
            text: text.into(),
            image,
            reply: Some(reply),
        })
        .await?;
        response.await.map_err(|_| TransportError::Closed)
    }

    /// Outer error: the session is gone. Inner error: the engine declined.
    pub async fn start_execution(
        &self,
        inputs: HashMap<String, Value>,
        speed_ms: Option<u64>,
    ) -> Result<Result<ExecutionId, Ignored>, TransportError> {
        let (reply, response) = oneshot::channel();
        self.command(SessionCommand::StartExecution {
            inputs,
            speed_ms,
            reply: Some(reply),
        })
        .await?;
        response.await.map_err(|_| TransportError::Closed)
    }

    pub async fn cancel_task(&self, task_id: TaskId) -> Result<(), TransportError> {
        self.command(SessionCommand::CancelTask(task_id)).await
    }

    pub async fn pause_execution(&self) -> Result<(), TransportError> {
        self.command(SessionCommand::PauseExecution).await
    }

    pub async fn resume_execution(&self) -> Result<(), TransportError> {
        self.command(SessionCommand::ResumeExecution).await
    }

    pub async fn stop_execution(&self) -> Result<(), TransportError> {
        self.command(SessionCommand::StopExecution).await
    }

    pub async fn command(&self, command: SessionCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Stop the actor and the pump and wait for both
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.actor.await;
        let _ = self.pump.await;
    }
}
