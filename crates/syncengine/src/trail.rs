use serde::Serialize;
use synccore::NodeId;

/// Highlight state for one graph being stepped through.
///
/// A node only enters the executed trail when the next one is installed, so
/// discrete step events render as a continuous path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trail {
    pub executing_node_id: Option<NodeId>,
    /// Append-only and duplicate-free
    pub executed_node_ids: Vec<NodeId>,
    /// Every node passed through, in order, repeats included
    pub path: Vec<NodeId>,
}

impl Trail {
    /// Move the executing node (if any) into the trail, then install `node_id`
    pub fn advance(&mut self, node_id: NodeId) {
        self.settle();
        self.executing_node_id = Some(node_id);
    }
    
    /// Move the executing node into the trail and leave nothing executing
    pub fn settle(&mut self) {
        if let Some(previous) = self.executing_node_id.take() {
            if !self.executed_node_ids.contains(&previous) {
                self.executed_node_ids.push(previous.clone());
            }
            self.path.push(previous);
        }
    }
    
    pub fn is_executed(&self, node_id: &str) -> bool {
        self.executed_node_ids.iter().any(|n| n == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_trail_before_swap() {
        let mut trail = Trail::default();
        trail.advance("n1".to_string());
        assert!(trail.executed_node_ids.is_empty());
        
        trail.advance("n2".to_string());
        assert_eq!(trail.executed_node_ids, vec!["n1"]);
        assert_eq!(trail.executing_node_id.as_deref(), Some("n2"));
    }
    
    #[test]
    fn test_loops_repeat_in_path_only() {
        let mut trail = Trail::default();
        for node in ["a", "b", "a", "b", "c"] {
            trail.advance(node.to_string());
        }
        trail.settle();
        assert_eq!(trail.executed_node_ids, vec!["a", "b", "c"]);
        assert_eq!(trail.path, vec!["a", "b", "a", "b", "c"]);
        assert!(trail.executing_node_id.is_none());
    }
}
