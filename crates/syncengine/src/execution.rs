//! Run/pause/stop state machine for the single current execution.

use crate::outcome::{Ignored, Outcome};
use crate::trail::Trail;
use serde::Serialize;
use serde_json::Value;
use synccore::{
    ExecutionAck, ExecutionComplete, ExecutionFailure, ExecutionId, ExecutionRef, ExecutionStep,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Error,
}

impl ExecutionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ExecutionStatus::Running | ExecutionStatus::Paused)
    }
}

/// A locally requested transition awaiting server confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRequest {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub status: ExecutionStatus,
    #[serde(flatten)]
    pub trail: Trail,
    pub speed_ms: u64,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub pending: Option<ControlRequest>,
    /// Server acknowledged `execution_started`
    pub confirmed: bool,
    #[serde(skip)]
    last_step_index: Option<u64>,
    #[serde(skip)]
    finished: bool,
}

impl Execution {
    fn new(speed_ms: u64) -> Self {
        Self {
            id: ExecutionId::generate(),
            status: ExecutionStatus::Running,
            trail: Trail::default(),
            speed_ms,
            output: None,
            error: None,
            pending: None,
            confirmed: false,
            last_step_index: None,
            finished: false,
        }
    }

    /// A terminal server event has been applied
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.trail.settle();
        self.status = ExecutionStatus::Stopped;
        self.pending = None;
        self.finished = true;
    }
}

/// Owns the current execution identity. Any event for another id is stale.
#[derive(Debug)]
pub struct ExecutionController {
    current: Option<Execution>,
    speed_ms: u64,
    min_speed_ms: u64,
    max_speed_ms: u64,
}

impl ExecutionController {
    pub fn new(default_speed_ms: u64, min_speed_ms: u64, max_speed_ms: u64) -> Self {
        let (min_speed_ms, max_speed_ms) = if min_speed_ms <= max_speed_ms {
            (min_speed_ms, max_speed_ms)
        } else {
            tracing::warn!(
                "Speed bounds {}..{} are reversed; swapping",
                min_speed_ms,
                max_speed_ms
            );
            (max_speed_ms, min_speed_ms)
        };
        Self {
            current: None,
            speed_ms: default_speed_ms.clamp(min_speed_ms, max_speed_ms),
            min_speed_ms,
            max_speed_ms,
        }
    }

    pub fn current(&self) -> Option<&Execution> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<&ExecutionId> {
        self.current.as_ref().map(|e| &e.id)
    }

    pub fn status(&self) -> ExecutionStatus {
        self.current
            .as_ref()
            .map_or(ExecutionStatus::Idle, |e| e.status)
    }

    pub fn speed_ms(&self) -> u64 {
        self.speed_ms
    }

    /// Store a playback speed for the next run; returns the clamped value
    pub fn set_speed(&mut self, speed_ms: u64) -> u64 {
        self.speed_ms = speed_ms.clamp(self.min_speed_ms, self.max_speed_ms);
        self.speed_ms
    }

    /// Replace the current execution with a fresh one.
    ///
    /// Rejected while an execution is running or paused.
    pub fn start(&mut self, speed_ms: Option<u64>) -> Result<ExecutionId, Ignored> {
        let status = self.status();
        if status.is_active() {
            return Err(Ignored::InvalidState(format!(
                "cannot start while {:?}",
                status
            )));
        }
        if let Some(speed_ms) = speed_ms {
            self.set_speed(speed_ms);
        }

        let execution = Execution::new(self.speed_ms);
        let id = execution.id.clone();
        if let Some(previous) = self.current.replace(execution) {
            tracing::debug!("Execution {} superseded by {}", previous.id, id);
        }
        tracing::info!("Starting execution {} at {}ms per step", id, self.speed_ms);
        Ok(id)
    }

    /// The start command never reached the transport
    pub fn fail_start(&mut self, execution_id: &ExecutionId, message: impl Into<String>) {
        if let Some(execution) = self.current.as_mut().filter(|e| &e.id == execution_id) {
            execution.status = ExecutionStatus::Error;
            execution.error = Some(message.into());
            execution.finished = true;
        }
    }

    pub fn pause(&mut self) -> Result<ExecutionId, Ignored> {
        let execution = self.current.as_mut().ok_or(Ignored::NoExecution)?;
        if execution.status != ExecutionStatus::Running {
            return Err(Ignored::InvalidState(format!(
                "cannot pause while {:?}",
                execution.status
            )));
        }
        execution.status = ExecutionStatus::Paused;
        execution.pending = Some(ControlRequest::Pause);
        Ok(execution.id.clone())
    }

    pub fn resume(&mut self) -> Result<ExecutionId, Ignored> {
        let execution = self.current.as_mut().ok_or(Ignored::NoExecution)?;
        if execution.status != ExecutionStatus::Paused {
            return Err(Ignored::InvalidState(format!(
                "cannot resume while {:?}",
                execution.status
            )));
        }
        execution.status = ExecutionStatus::Running;
        execution.pending = Some(ControlRequest::Resume);
        Ok(execution.id.clone())
    }

    /// Optimistic stop: nothing executing, trail kept for inspection
    pub fn stop(&mut self) -> Result<ExecutionId, Ignored> {
        let execution = self.current.as_mut().ok_or(Ignored::NoExecution)?;
        if !execution.status.is_active() {
            return Err(Ignored::InvalidState(format!(
                "cannot stop while {:?}",
                execution.status
            )));
        }
        execution.trail.executing_node_id = None;
        execution.status = ExecutionStatus::Stopped;
        execution.pending = Some(ControlRequest::Stop);
        Ok(execution.id.clone())
    }

    /// Undo an optimistic pause or resume whose command never left.
    ///
    /// Only the request still pending is undone; a newer one stays. A stop
    /// is not undone: the user asked for it and the trail is kept.
    pub fn rollback(&mut self, execution_id: &ExecutionId, request: ControlRequest) {
        let Some(execution) = self.current.as_mut().filter(|e| &e.id == execution_id) else {
            return;
        };
        if execution.pending != Some(request) {
            return;
        }
        match request {
            ControlRequest::Pause => execution.status = ExecutionStatus::Running,
            ControlRequest::Resume => execution.status = ExecutionStatus::Paused,
            ControlRequest::Stop => return,
        }
        tracing::debug!("Rolled back {:?} on execution {}", execution.pending, execution.id);
        execution.pending = None;
    }

    pub fn on_started(&mut self, event: &ExecutionRef) -> Outcome {
        let execution = self.admit(&event.execution_id)?;
        if execution.confirmed {
            return Err(Ignored::Duplicate);
        }
        execution.confirmed = true;
        tracing::info!("Execution {} confirmed by server", execution.id);
        Ok(())
    }

    pub fn on_step(&mut self, event: &ExecutionStep) -> Outcome {
        let execution = self.admit(&event.execution_id)?;
        if !execution.status.is_active() {
            return Err(Ignored::NotActive);
        }
        if let Some(index) = event.step_index {
            if execution.last_step_index.map_or(false, |last| index <= last) {
                return Err(Ignored::Duplicate);
            }
            execution.last_step_index = Some(index);
        }
        execution.trail.advance(event.node_id.clone());
        Ok(())
    }

    pub fn on_paused(&mut self, event: &ExecutionAck) -> Outcome {
        let execution = self.admit(&event.execution_id)?;
        if !execution.status.is_active() {
            return Err(Ignored::NotActive);
        }
        match execution.pending {
            Some(ControlRequest::Pause) => {
                execution.pending = None;
                Ok(())
            }
            Some(_) => Err(Ignored::Superseded),
            None if execution.status == ExecutionStatus::Running => {
                tracing::info!("Execution {} paused by server", execution.id);
                execution.status = ExecutionStatus::Paused;
                Ok(())
            }
            None => Err(Ignored::Duplicate),
        }
    }

    pub fn on_resumed(&mut self, event: &ExecutionAck) -> Outcome {
        let execution = self.admit(&event.execution_id)?;
        if !execution.status.is_active() {
            return Err(Ignored::NotActive);
        }
        match execution.pending {
            Some(ControlRequest::Resume) => {
                execution.pending = None;
                Ok(())
            }
            Some(_) => Err(Ignored::Superseded),
            None if execution.status == ExecutionStatus::Paused => {
                tracing::info!("Execution {} resumed by server", execution.id);
                execution.status = ExecutionStatus::Running;
                Ok(())
            }
            None => Err(Ignored::Duplicate),
        }
    }

    pub fn on_complete(&mut self, event: &ExecutionComplete) -> Outcome {
        let execution = self.admit(&event.execution_id)?;
        if execution.finished {
            return Err(Ignored::Duplicate);
        }
        execution.finish();
        if event.success {
            execution.output = event.output.clone();
            tracing::info!("Execution {} completed", execution.id);
        } else {
            let error = event
                .error
                .clone()
                .unwrap_or_else(|| "Execution failed".to_string());
            tracing::warn!("Execution {} failed: {}", execution.id, error);
            execution.error = Some(error);
            execution.output = event.output.clone();
        }
        Ok(())
    }

    pub fn on_error(&mut self, event: &ExecutionFailure) -> Outcome {
        let execution = self.admit(&event.execution_id)?;
        if execution.finished {
            return Err(Ignored::Duplicate);
        }
        execution.finish();
        execution.error = Some(event.error.clone());
        tracing::warn!("Execution {} errored: {}", execution.id, event.error);
        Ok(())
    }

    /// Identity filter for execution-scoped events
    pub fn admit(&mut self, execution_id: &ExecutionId) -> Result<&mut Execution, Ignored> {
        match self.current.as_mut() {
            Some(execution) if &execution.id == execution_id => Ok(execution),
            Some(execution) => Err(Ignored::StaleExecution {
                event: execution_id.to_string(),
                current: execution.id.to_string(),
            }),
            None => Err(Ignored::NoExecution),
        }
    }
}
