//! Nested subworkflow visualization frames.

use crate::outcome::{Ignored, Outcome};
use crate::trail::Trail;
use serde::Serialize;
use synccore::{NodeId, SubflowStart, SubflowStep, SubworkflowId, WorkflowEdge, WorkflowNode};

/// Visualization state for one nested subworkflow invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubflowFrame {
    pub parent_node_id: NodeId,
    pub subworkflow_id: SubworkflowId,
    pub subworkflow_name: String,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    #[serde(flatten)]
    pub trail: Trail,
    #[serde(skip)]
    last_step_index: Option<u64>,
}

/// Index 0 is the outermost frame. Renderers draw one overlay per depth.
#[derive(Debug, Default)]
pub struct SubflowStack {
    frames: Vec<SubflowFrame>,
}

impl SubflowStack {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub fn frames(&self) -> &[SubflowFrame] {
        &self.frames
    }
    
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
    
    pub fn top(&self) -> Option<&SubflowFrame> {
        self.frames.last()
    }
    
    pub fn push(&mut self, event: &SubflowStart) {
        tracing::debug!(
            "Entering subflow {} ({}) from node {} at depth {}",
            event.subworkflow_name,
            event.subworkflow_id,
            event.parent_node_id,
            self.frames.len() + 1
        );
        self.frames.push(SubflowFrame {
            parent_node_id: event.parent_node_id.clone(),
            subworkflow_id: event.subworkflow_id.clone(),
            subworkflow_name: event.subworkflow_name.clone(),
            nodes: event.nodes.clone(),
            edges: event.edges.clone(),
            trail: Trail::default(),
            last_step_index: None,
        });
    }
    
    /// Trail-before-swap, scoped to the innermost frame
    pub fn step(&mut self, event: &SubflowStep) -> Outcome {
        let frame = self.frames.last_mut().ok_or(Ignored::EmptySubflowStack)?;
        if let Some(index) = event.step_index {
            if frame.last_step_index.map_or(false, |last| index <= last) {
                return Err(Ignored::Duplicate);
            }
            frame.last_step_index = Some(index);
        }
        frame.trail.advance(event.node_id.clone());
        Ok(())
    }
    
    /// Pop the innermost frame. LIFO order wins over a mismatched id.
    pub fn pop(&mut self, subworkflow_id: Option<&str>) -> Result<SubflowFrame, Ignored> {
        let frame = self.frames.pop().ok_or(Ignored::EmptySubflowStack)?;
        if let Some(expected) = subworkflow_id {
            if expected != frame.subworkflow_id {
                tracing::warn!(
                    "subflow_complete for {} closed frame {}",
                    expected,
                    frame.subworkflow_id
                );
            }
        }
        Ok(frame)
    }
    
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
