// crates/synccore/tests/protocol_test.rs

use serde_json::{json, Value};
use std::collections::HashMap;
use synccore::{
    ClientCommand, ExecutableWorkflow, ExecuteWorkflowCommand, ExecutionId, ServerEvent, TaskId,
    WorkflowContext, WorkflowNode,
};

fn parse(frame: &str) -> Value {
    serde_json::from_str(frame).unwrap()
}

#[test]
fn test_cancel_task_frame() {
    let command = ClientCommand::CancelTask {
        task_id: TaskId::from("task_1"),
    };
    let frame = parse(&command.to_frame().unwrap());

    assert_eq!(
        frame,
        json!({"event": "cancel_task", "data": {"task_id": "task_1"}})
    );
}

#[test]
fn test_execute_workflow_frame_carries_snapshot() {
    let mut context = WorkflowContext::new();
    context.add_node(WorkflowNode::new("a", "start"));
    context.add_node(WorkflowNode::new("b", "end"));
    context.connect("a", "b");

    let mut inputs = HashMap::new();
    inputs.insert("topic".to_string(), json!("rust"));
    let command = ClientCommand::ExecuteWorkflow(ExecuteWorkflowCommand {
        execution_id: ExecutionId::from("exec_1"),
        workflow: context.executable(),
        inputs,
        speed_ms: 250,
    });
    let frame = parse(&command.to_frame().unwrap());

    assert_eq!(frame["event"], "execute_workflow");
    assert_eq!(frame["data"]["execution_id"], "exec_1");
    assert_eq!(frame["data"]["speed_ms"], 250);
    assert_eq!(frame["data"]["inputs"]["topic"], "rust");
    assert_eq!(frame["data"]["workflow"]["nodes"][1]["type"], "end");
    assert_eq!(frame["data"]["workflow"]["edges"][0]["source"], "a");
}

#[test]
fn test_command_frame_parses_back() {
    let command = ClientCommand::PauseExecution {
        execution_id: ExecutionId::from("exec_9"),
    };
    let decoded: ClientCommand = serde_json::from_str(&command.to_frame().unwrap()).unwrap();
    assert_eq!(decoded, command);
    assert_eq!(decoded.name(), "pause_execution");
}

#[test]
fn test_empty_executable_workflow() {
    let workflow = ExecutableWorkflow::default();
    let value = serde_json::to_value(&workflow).unwrap();
    assert_eq!(value["nodes"], json!([]));
    assert_eq!(value["edges"], json!([]));
}

#[test]
fn test_server_frame_round_trips_through_name() {
    let frame = r#"{"event":"execution_paused","data":{"execution_id":"exec_1","current_node_id":"n2"}}"#;
    let event = ServerEvent::from_frame(frame).unwrap().unwrap();
    assert_eq!(event.name(), "execution_paused");

    let reframed = parse(&event.to_frame().unwrap());
    assert_eq!(reframed["event"], "execution_paused");
    assert_eq!(reframed["data"]["current_node_id"], "n2");
}

#[test]
fn test_malformed_frame_is_an_error() {
    assert!(ServerEvent::from_frame("not json").is_err());
    assert!(ServerEvent::from_frame(r#"{"data":{}}"#).is_err());
}
