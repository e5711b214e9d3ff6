//! Append-only execution log with engine-computed nesting.

use serde::Serialize;
use serde_json::{Map, Value};
use synccore::{LogRecord, NodeId};

pub const SUBFLOW_START: &str = "subflow_start";
pub const SUBFLOW_COMPLETE: &str = "subflow_complete";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionLogEntry {
    pub id: String,
    pub log_type: String,
    pub node_id: Option<NodeId>,
    pub node_label: Option<String>,
    pub subworkflow_id: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    /// Enclosing subworkflow ids, outermost first
    pub subworkflow_stack: Vec<String>,
}

impl ExecutionLogEntry {
    pub fn depth(&self) -> usize {
        self.subworkflow_stack.len()
    }
}

#[derive(Debug, Default)]
pub struct ExecutionLogRecorder {
    entries: Vec<ExecutionLogEntry>,
    stack: Vec<String>,
    next_seq: u64,
}

impl ExecutionLogRecorder {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub fn entries(&self) -> &[ExecutionLogEntry] {
        &self.entries
    }
    
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
    
    /// Append one record, annotating it from the recorder's own stack.
    ///
    /// `subflow_start` is annotated before the push and `subflow_complete`
    /// after the pop, so only the entries between them are indented.
    pub fn append(&mut self, record: LogRecord) -> &ExecutionLogEntry {
        if let Some(reported) = &record.subworkflow_stack {
            if reported != &self.stack {
                tracing::debug!(
                    "Server nesting {:?} differs from local {:?}; using local",
                    reported,
                    self.stack
                );
            }
        }
        
        let annotation = match record.log_type.as_str() {
            SUBFLOW_START => {
                let before = self.stack.clone();
                if let Some(id) = &record.subworkflow_id {
                    self.stack.push(id.clone());
                }
                before
            }
            SUBFLOW_COMPLETE => {
                self.stack.pop();
                self.stack.clone()
            }
            _ => self.stack.clone(),
        };
        
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(ExecutionLogEntry {
            id: record.id.unwrap_or_else(|| format!("log-{}", seq)),
            log_type: record.log_type,
            node_id: record.node_id,
            node_label: record.node_label,
            subworkflow_id: record.subworkflow_id,
            payload: record.payload,
            subworkflow_stack: annotation,
        });
        &self.entries[self.entries.len() - 1]
    }
    
    pub fn clear(&mut self) {
        self.entries.clear();
        self.stack.clear();
        self.next_seq = 0;
    }
}
