//! Chat-task identity, cancellation and streamed-text aggregation.

use crate::outcome::{Ignored, Outcome};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use synccore::{
    AgentComplete, AgentError, AgentQuestion, ChatProgress, ChatResponse, ChatStream,
    ConversationId, MessageId, TaskId, TaskRef,
};

const THINKING: &str = "Thinking…";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Cancelled,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Error,
}

/// One entry of the chat transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Partial output flushed by a cancellation or error
    pub interrupted: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: MessageRole, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            image: None,
            tool_calls: None,
            task_id: None,
            interrupted: false,
            created_at: now,
        }
    }
}

/// What `begin` handed out
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStart {
    pub task_id: TaskId,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Copy)]
struct Retired {
    status: TaskStatus,
    at: DateTime<Utc>,
}

/// Owns the current task pointer, the TTL-bounded set of retired task ids,
/// the streaming buffer and the chat transcript.
#[derive(Debug)]
pub struct TaskRegistry {
    ttl: Duration,
    current: Option<Task>,
    retired: HashMap<TaskId, Retired>,
    conversation_id: Option<ConversationId>,
    streaming: bool,
    buffer: String,
    processing_status: Option<String>,
    messages: Vec<ChatMessage>,
}

impl TaskRegistry {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            current: None,
            retired: HashMap::new(),
            conversation_id: None,
            streaming: false,
            buffer: String::new(),
            processing_status: None,
            messages: Vec::new(),
        }
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    pub fn current_task_id(&self) -> Option<&TaskId> {
        self.current.as_ref().map(|t| &t.id)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn stream_buffer(&self) -> &str {
        &self.buffer
    }

    pub fn processing_status(&self) -> Option<&str> {
        self.processing_status.as_deref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// Whether `task_id` is still suppressed at `now`
    pub fn is_cancelled(&self, task_id: &TaskId, now: DateTime<Utc>) -> bool {
        self.retired
            .get(task_id)
            .map_or(false, |r| r.status == TaskStatus::Cancelled && now - r.at < self.ttl)
    }

    /// Number of retired ids still held. Expired ones are dropped lazily.
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Start a new task for an outgoing user message.
    ///
    /// The caller is responsible for cancelling a task that is still current.
    pub fn begin(&mut self, text: &str, image: Option<String>, now: DateTime<Utc>) -> TaskStart {
        let task_id = TaskId::generate();
        let conversation_id = self
            .conversation_id
            .get_or_insert_with(ConversationId::generate)
            .clone();

        let mut message = ChatMessage::new(MessageRole::User, text, now);
        message.image = image;
        message.task_id = Some(task_id.clone());
        self.messages.push(message);

        self.current = Some(Task {
            id: task_id.clone(),
            created_at: now,
            status: TaskStatus::Active,
        });
        self.buffer.clear();
        self.streaming = false;
        self.processing_status = Some(THINKING.to_string());

        tracing::info!("Started task {} in conversation {}", task_id, conversation_id);
        TaskStart {
            task_id,
            conversation_id,
        }
    }

    /// Record a local cancellation. Returns true if `task_id` was current,
    /// in which case the caller should tell the server.
    pub fn cancel(&mut self, task_id: &TaskId, now: DateTime<Utc>) -> bool {
        self.prune(now);
        // An id that is already retired keeps its first timestamp.
        self.retired.entry(task_id.clone()).or_insert(Retired {
            status: TaskStatus::Cancelled,
            at: now,
        });

        if self.current_task_id() != Some(task_id) {
            tracing::debug!("Cancelled task {} is not current", task_id);
            return false;
        }

        self.flush_partial(now);
        self.clear_current();
        tracing::info!("Cancelled task {}", task_id);
        true
    }

    /// Identity filter applied to every task-scoped event.
    ///
    /// Untagged events pass. Tagged events pass only if they belong to the
    /// current task; with no current task the id is adopted.
    pub fn admit(&mut self, task_id: Option<&TaskId>, now: DateTime<Utc>) -> Outcome {
        self.prune(now);
        let Some(task_id) = task_id else {
            return Ok(());
        };

        if self.retired.contains_key(task_id) {
            return Err(Ignored::CancelledTask(task_id.to_string()));
        }

        match &self.current {
            Some(current) if &current.id != task_id => Err(Ignored::StaleTask {
                event: task_id.to_string(),
                current: current.id.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                tracing::info!("Adopting task {} from server event", task_id);
                self.current = Some(Task {
                    id: task_id.clone(),
                    created_at: now,
                    status: TaskStatus::Active,
                });
                Ok(())
            }
        }
    }

    /// Like `admit`, but an untagged event also needs a current task to
    /// land on. Keeps the streaming flag from outliving every task.
    fn admit_owned(&mut self, task_id: Option<&TaskId>, now: DateTime<Utc>) -> Outcome {
        self.admit(task_id, now)?;
        if self.current.is_none() {
            return Err(Ignored::NoTask);
        }
        Ok(())
    }

    pub fn on_progress(&mut self, event: &ChatProgress, now: DateTime<Utc>) -> Outcome {
        self.admit_owned(event.task_id.as_ref(), now)?;
        let text = match (&event.status, &event.tool) {
            (Some(status), _) => status.clone(),
            (None, Some(tool)) => format!("Running {}…", tool),
            (None, None) => event.event.clone(),
        };
        self.processing_status = Some(text);
        Ok(())
    }

    pub fn on_stream(&mut self, event: &ChatStream, now: DateTime<Utc>) -> Outcome {
        self.admit_owned(event.task_id.as_ref(), now)?;
        if !self.streaming {
            tracing::debug!("First stream chunk for task {:?}", self.current_task_id());
            self.streaming = true;
        }
        self.buffer.push_str(&event.chunk);
        Ok(())
    }

    /// Finalize the current task. Streamed text, when there is any, wins
    /// over the response field.
    pub fn on_response(&mut self, event: &ChatResponse, now: DateTime<Utc>) -> Outcome {
        self.admit(event.task_id.as_ref(), now)?;
        if self.conversation_id.is_none() {
            self.conversation_id = event.conversation_id.clone();
        }
        self.finalize(&event.response, event.tool_calls.clone(), now);
        Ok(())
    }

    /// Server-side cancellation of the current task
    pub fn on_server_cancelled(&mut self, event: &TaskRef, now: DateTime<Utc>) -> Outcome {
        self.admit(event.task_id.as_ref(), now)?;
        let Some(task_id) = self.current_task_id().cloned() else {
            return Err(Ignored::NoTask);
        };
        self.flush_partial(now);
        self.retire(&task_id, TaskStatus::Cancelled, now);
        self.clear_current();
        tracing::info!("Server cancelled task {}", task_id);
        Ok(())
    }

    pub fn on_question(&mut self, event: &AgentQuestion, now: DateTime<Utc>) -> Outcome {
        self.admit(event.task_id.as_ref(), now)?;
        if !self.buffer.is_empty() {
            let text = std::mem::take(&mut self.buffer);
            self.push_assistant(text, None, false, now);
        }
        self.finalize(&event.question, None, now);
        Ok(())
    }

    /// Only closes a task that is still open; a completed task already got
    /// its message from `chat_response`.
    pub fn on_agent_complete(&mut self, event: &AgentComplete, now: DateTime<Utc>) -> Outcome {
        self.admit(event.task_id.as_ref(), now)?;
        if self.current.is_none() {
            return Err(Ignored::NoTask);
        }
        self.finalize(&event.message, None, now);
        Ok(())
    }

    pub fn on_agent_error(&mut self, event: &AgentError, now: DateTime<Utc>) -> Outcome {
        self.admit(event.task_id.as_ref(), now)?;
        self.flush_partial(now);
        let mut message = ChatMessage::new(MessageRole::Error, event.error.clone(), now);
        message.task_id = self.current_task_id().cloned();
        self.messages.push(message);
        if let Some(task) = self.current.take() {
            self.retire(&task.id, TaskStatus::Finalized, now);
            tracing::warn!("Task {} failed: {}", task.id, event.error);
        }
        self.clear_current();
        Ok(())
    }

    fn finalize(&mut self, fallback: &str, tool_calls: Option<Vec<Value>>, now: DateTime<Utc>) {
        let content = if self.buffer.is_empty() {
            fallback.to_string()
        } else {
            std::mem::take(&mut self.buffer)
        };
        self.push_assistant(content, tool_calls, false, now);
        if let Some(task) = self.current.take() {
            self.retire(&task.id, TaskStatus::Finalized, now);
            tracing::info!("Finalized task {}", task.id);
        }
        self.clear_current();
    }

    fn flush_partial(&mut self, now: DateTime<Utc>) {
        if self.buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buffer);
        self.push_assistant(text, None, true, now);
    }

    fn push_assistant(
        &mut self,
        content: String,
        tool_calls: Option<Vec<Value>>,
        interrupted: bool,
        now: DateTime<Utc>,
    ) {
        let mut message = ChatMessage::new(MessageRole::Assistant, content, now);
        message.tool_calls = tool_calls;
        message.task_id = self.current_task_id().cloned();
        message.interrupted = interrupted;
        self.messages.push(message);
    }

    fn retire(&mut self, task_id: &TaskId, status: TaskStatus, now: DateTime<Utc>) {
        self.retired
            .entry(task_id.clone())
            .or_insert(Retired { status, at: now });
    }

    fn clear_current(&mut self) {
        self.current = None;
        self.buffer.clear();
        self.streaming = false;
        self.processing_status = None;
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.retired.retain(|_, r| now - r.at < ttl);
    }
}
