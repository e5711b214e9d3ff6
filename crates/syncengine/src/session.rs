//! Session-scoped context: every command and every inbound event goes
//! through here.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::exec_log::{ExecutionLogEntry, ExecutionLogRecorder};
use crate::execution::{ControlRequest, Execution, ExecutionController, ExecutionStatus};
use crate::outcome::{Ignored, Outcome};
use crate::sink::CommandSink;
use crate::subflow::{SubflowFrame, SubflowStack};
use crate::tasks::{ChatMessage, TaskRegistry};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use synccore::{
    ChatCommand, ClientCommand, ConnectionEvent, ConversationId, ExecuteWorkflowCommand,
    ExecutionId, ServerEvent, SessionId, SyncWorkflowCommand, TaskId, TransportError,
    WorkflowContext, WorkflowMutation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Modified,
    Update,
}

/// One-shot notifications for UI collaborators outside the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineSignal {
    /// Reopen the result-inspection surface
    OpenResults { execution_id: ExecutionId },
    /// Hand a graph mutation to the mutation collaborator
    WorkflowMutation {
        kind: MutationKind,
        payload: Map<String, Value>,
    },
}

/// Connection status and the dismissible transport banner
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub transport_error: Option<String>,
}

/// Read-only copy of everything UI consumers render from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub conversation_id: Option<ConversationId>,
    pub current_task_id: Option<TaskId>,
    pub streaming: bool,
    pub stream_buffer: String,
    pub processing_status: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub execution_status: ExecutionStatus,
    pub execution: Option<Execution>,
    pub speed_ms: u64,
    pub subflow_stack: Vec<SubflowFrame>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub connection: ConnectionState,
}

pub struct Session {
    id: SessionId,
    clock: Arc<dyn Clock>,
    sink: Box<dyn CommandSink>,
    workflow: WorkflowContext,
    tasks: TaskRegistry,
    execution: ExecutionController,
    subflows: SubflowStack,
    log: ExecutionLogRecorder,
    connection: ConnectionState,
    signals: Vec<EngineSignal>,
}

impl Session {
    pub fn new(config: EngineConfig, sink: Box<dyn CommandSink>) -> Self {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        sink: Box<dyn CommandSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let id = SessionId::generate();
        tracing::info!("Created session {}", id);
        Self {
            id,
            clock,
            sink,
            workflow: WorkflowContext::default(),
            tasks: TaskRegistry::new(config.cancel_ttl()),
            execution: ExecutionController::new(
                config.default_speed_ms,
                config.min_speed_ms,
                config.max_speed_ms,
            ),
            subflows: SubflowStack::new(),
            log: ExecutionLogRecorder::new(),
            connection: ConnectionState::default(),
            signals: Vec::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn execution(&self) -> &ExecutionController {
        &self.execution
    }

    pub fn subflows(&self) -> &SubflowStack {
        &self.subflows
    }

    pub fn execution_log(&self) -> &ExecutionLogRecorder {
        &self.log
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn workflow(&self) -> &WorkflowContext {
        &self.workflow
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            conversation_id: self.tasks.conversation_id().cloned(),
            current_task_id: self.tasks.current_task_id().cloned(),
            streaming: self.tasks.is_streaming(),
            stream_buffer: self.tasks.stream_buffer().to_string(),
            processing_status: self.tasks.processing_status().map(str::to_string),
            messages: self.tasks.messages().to_vec(),
            execution_status: self.execution.status(),
            execution: self.execution.current().cloned(),
            speed_ms: self.execution.speed_ms(),
            subflow_stack: self.subflows.frames().to_vec(),
            execution_log: self.log.entries().to_vec(),
            connection: self.connection.clone(),
        }
    }

    /// Take the signals raised since the last call
    pub fn drain_signals(&mut self) -> Vec<EngineSignal> {
        std::mem::take(&mut self.signals)
    }

    // ---- commands -------------------------------------------------------

    /// Replace the workflow snapshot attached to outbound commands
    pub fn set_workflow(&mut self, workflow: WorkflowContext) {
        self.workflow = workflow;
    }

    /// Start a chat task. A task that is still current is cancelled first.
    pub fn send_message(&mut self, text: &str, image: Option<String>) -> TaskId {
        if let Some(previous) = self.tasks.current_task_id().cloned() {
            tracing::info!("New message supersedes task {}", previous);
            let _ = self.cancel_task(&previous);
        }

        let now = self.clock.now();
        let start = self.tasks.begin(text, image.clone(), now);
        let command = ClientCommand::Chat(ChatCommand {
            session_id: self.id.clone(),
            message: text.to_string(),
            conversation_id: Some(start.conversation_id),
            image,
            task_id: start.task_id.clone(),
            current_workflow_id: self.workflow.current_workflow_id.clone(),
            workflow: self.workflow.graph(),
            analysis: self.workflow.analysis.clone(),
            open_tabs: self.workflow.open_tabs.clone(),
        });
        let _ = self.emit(command);
        start.task_id
    }

    /// Soft cancel: suppresses the task's events locally for the TTL
    pub fn cancel_task(&mut self, task_id: &TaskId) -> Outcome {
        let now = self.clock.now();
        if !self.tasks.cancel(task_id, now) {
            return Err(Ignored::NoTask);
        }
        let _ = self.emit(ClientCommand::CancelTask {
            task_id: task_id.clone(),
        });
        Ok(())
    }

    pub fn sync_workflow(&mut self, source: &str) -> Outcome {
        let Some(conversation_id) = self.tasks.conversation_id().cloned() else {
            return self.reject("sync_workflow", Ignored::NoConversation);
        };
        let _ = self.emit(ClientCommand::SyncWorkflow(SyncWorkflowCommand {
            conversation_id,
            workflow: self.workflow.graph(),
            analysis: self.workflow.analysis.clone(),
            source: source.to_string(),
        }));
        Ok(())
    }

    pub fn set_speed(&mut self, speed_ms: u64) -> u64 {
        self.execution.set_speed(speed_ms)
    }

    pub fn start_execution(
        &mut self,
        inputs: HashMap<String, Value>,
        speed_ms: Option<u64>,
    ) -> Result<ExecutionId, Ignored> {
        let execution_id = match self.execution.start(speed_ms) {
            Ok(id) => id,
            Err(reason) => {
                tracing::warn!("Ignoring start_execution: {}", reason);
                return Err(reason);
            }
        };
        self.subflows.clear();
        self.log.clear();

        let command = ClientCommand::ExecuteWorkflow(ExecuteWorkflowCommand {
            execution_id: execution_id.clone(),
            workflow: self.workflow.executable(),
            inputs,
            speed_ms: self.execution.speed_ms(),
        });
        let _ = self.emit(command);
        Ok(execution_id)
    }

    pub fn pause_execution(&mut self) -> Outcome {
        let execution_id = match self.execution.pause() {
            Ok(id) => id,
            Err(reason) => return self.reject("pause_execution", reason),
        };
        let _ = self.emit(ClientCommand::PauseExecution { execution_id });
        Ok(())
    }

    pub fn resume_execution(&mut self) -> Outcome {
        let execution_id = match self.execution.resume() {
            Ok(id) => id,
            Err(reason) => return self.reject("resume_execution", reason),
        };
        let _ = self.emit(ClientCommand::ResumeExecution { execution_id });
        Ok(())
    }

    pub fn stop_execution(&mut self) -> Outcome {
        let execution_id = match self.execution.stop() {
            Ok(id) => id,
            Err(reason) => return self.reject("stop_execution", reason),
        };
        let _ = self.emit(ClientCommand::StopExecution { execution_id });
        Ok(())
    }

    pub fn clear_execution_log(&mut self) {
        self.log.clear();
    }

    pub fn dismiss_transport_error(&mut self) {
        self.connection.transport_error = None;
    }

    // ---- inbound --------------------------------------------------------

    /// Apply one server event. Stale, cancelled and duplicate events come
    /// back as `Err` and leave state untouched.
    pub fn apply(&mut self, event: &ServerEvent) -> Outcome {
        let outcome = self.route(event);
        if let Err(reason) = &outcome {
            if reason.is_routine() {
                tracing::debug!("Dropped {}: {}", event.name(), reason);
            } else {
                tracing::warn!("Ignored {}: {}", event.name(), reason);
            }
        }
        outcome
    }

    /// Parse and apply one wire frame. Malformed frames raise the
    /// transport banner.
    pub fn apply_frame(&mut self, frame: &str) -> Outcome {
        match ServerEvent::from_frame(frame) {
            Ok(Some(event)) => self.apply(&event),
            Ok(None) => {
                tracing::debug!("Skipping unknown event frame");
                Err(Ignored::UnknownEvent)
            }
            Err(e) => {
                tracing::warn!("Malformed frame: {}", e);
                self.connection.transport_error = Some(e.to_string());
                Err(Ignored::Malformed(e.to_string()))
            }
        }
    }

    /// A command never reached the orchestrator. Raises the banner and
    /// unwinds whatever the command had optimistically changed.
    pub fn on_send_failed(&mut self, command: &ClientCommand, error: &TransportError) {
        tracing::warn!("Failed to send {}: {}", command.name(), error);
        self.connection.transport_error = Some(error.to_string());
        match command {
            ClientCommand::ExecuteWorkflow(start) => {
                self.execution.fail_start(&start.execution_id, error.to_string());
            }
            ClientCommand::PauseExecution { execution_id } => {
                self.execution.rollback(execution_id, ControlRequest::Pause);
            }
            ClientCommand::ResumeExecution { execution_id } => {
                self.execution.rollback(execution_id, ControlRequest::Resume);
            }
            _ => {}
        }
    }

    pub fn on_connection(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                tracing::info!("Connected to orchestrator");
                self.connection.connected = true;
                self.connection.transport_error = None;
            }
            ConnectionEvent::Disconnected { reason } => {
                tracing::warn!("Disconnected from orchestrator: {:?}", reason);
                self.connection.connected = false;
                if let Some(reason) = reason {
                    self.connection.transport_error = Some(reason.clone());
                }
            }
            ConnectionEvent::Error { message } => {
                tracing::warn!("Transport error: {}", message);
                self.connection.transport_error = Some(message.clone());
            }
        }
    }

    fn route(&mut self, event: &ServerEvent) -> Outcome {
        let now = self.clock.now();
        match event {
            ServerEvent::ChatProgress(e) => self.tasks.on_progress(e, now),
            ServerEvent::ChatStream(e) => self.tasks.on_stream(e, now),
            ServerEvent::ChatResponse(e) => self.tasks.on_response(e, now),
            ServerEvent::ChatCancelled(e) => self.tasks.on_server_cancelled(e, now),
            ServerEvent::AgentQuestion(e) => self.tasks.on_question(e, now),
            ServerEvent::AgentComplete(e) => self.tasks.on_agent_complete(e, now),
            ServerEvent::AgentError(e) => self.tasks.on_agent_error(e, now),
            ServerEvent::WorkflowModified(e) => self.forward_mutation(MutationKind::Modified, e),
            ServerEvent::WorkflowUpdate(e) => self.forward_mutation(MutationKind::Update, e),

            ServerEvent::ExecutionStarted(e) => self.execution.on_started(e),
            ServerEvent::ExecutionStep(e) => self.execution.on_step(e),
            ServerEvent::ExecutionPaused(e) => self.execution.on_paused(e),
            ServerEvent::ExecutionResumed(e) => self.execution.on_resumed(e),
            ServerEvent::ExecutionComplete(e) => {
                self.execution.on_complete(e)?;
                self.finish_execution(&e.execution_id);
                Ok(())
            }
            ServerEvent::ExecutionError(e) => {
                self.execution.on_error(e)?;
                self.finish_execution(&e.execution_id);
                Ok(())
            }
            ServerEvent::SubflowStart(e) => {
                self.admit_active(&e.execution_id)?;
                self.subflows.push(e);
                Ok(())
            }
            ServerEvent::SubflowStep(e) => {
                self.admit_active(&e.execution_id)?;
                self.subflows.step(e)
            }
            ServerEvent::SubflowComplete(e) => {
                self.execution.admit(&e.execution_id)?;
                self.subflows.pop(e.subworkflow_id.as_deref()).map(|_| ())
            }
            ServerEvent::ExecutionLog(e) => {
                self.execution.admit(&e.execution_id)?;
                self.log.append(e.entry.clone());
                Ok(())
            }
        }
    }

    fn admit_active(&mut self, execution_id: &ExecutionId) -> Outcome {
        let execution = self.execution.admit(execution_id)?;
        if !execution.status.is_active() {
            return Err(Ignored::NotActive);
        }
        Ok(())
    }

    fn forward_mutation(&mut self, kind: MutationKind, event: &WorkflowMutation) -> Outcome {
        let now = self.clock.now();
        self.tasks.admit(event.task_id.as_ref(), now)?;
        let mut payload = event.payload.clone();
        if let Some(task_id) = &event.task_id {
            payload.insert("task_id".to_string(), Value::String(task_id.to_string()));
        }
        self.signals
            .push(EngineSignal::WorkflowMutation { kind, payload });
        Ok(())
    }

    fn finish_execution(&mut self, execution_id: &ExecutionId) {
        self.subflows.clear();
        self.signals.push(EngineSignal::OpenResults {
            execution_id: execution_id.clone(),
        });
    }

    fn emit(&mut self, command: ClientCommand) -> Result<(), TransportError> {
        match self.sink.send(command.clone()) {
            Ok(()) => {
                tracing::debug!("Sent {}", command.name());
                Ok(())
            }
            Err(e) => {
                self.on_send_failed(&command, &e);
                Err(e)
            }
        }
    }

    fn reject(&self, command: &str, reason: Ignored) -> Outcome {
        tracing::warn!("Ignoring {}: {}", command, reason);
        Err(reason)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("current_task_id", &self.tasks.current_task_id())
            .field("execution_id", &self.execution.current_id())
            .field("subflow_depth", &self.subflows.depth())
            .finish()
    }
}
