// crates/syncengine/tests/properties_test.rs

use chrono::Duration;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use synccore::{ClientCommand, TaskId};
use syncengine::{
    Clock, EngineConfig, EngineSignal, ExecutionStatus, Ignored, ManualClock, MessageRole,
    RecordingSink, Session,
};

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

fn create_test_session() -> (Session, RecordingSink, ManualClock) {
    init_tracing();
    let sink = RecordingSink::new();
    let clock = ManualClock::default();
    let session = Session::with_clock(
        EngineConfig::default(),
        Box::new(sink.clone()),
        Arc::new(clock.clone()),
    );
    (session, sink, clock)
}

fn frame(event: &str, data: serde_json::Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

fn step(execution_id: &str, node_id: &str, index: u64) -> String {
    frame(
        "execution_step",
        json!({
            "execution_id": execution_id,
            "node_id": node_id,
            "node_type": "action",
            "node_label": node_id.to_uppercase(),
            "step_index": index,
        }),
    )
}

fn log_entry(execution_id: &str, entry: serde_json::Value) -> String {
    frame("execution_log", json!({ "execution_id": execution_id, "entry": entry }))
}

fn assistant_texts(session: &Session) -> Vec<String> {
    session
        .tasks()
        .messages()
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .map(|m| m.content.clone())
        .collect()
}

#[test]
fn test_scenario_stream_then_response() {
    let (mut session, _sink, _clock) = create_test_session();
    let task = session.send_message("Hi", None);

    session
        .apply_frame(&frame("chat_stream", json!({"chunk": "Hel", "task_id": task})))
        .unwrap();
    session
        .apply_frame(&frame("chat_stream", json!({"chunk": "lo", "task_id": task})))
        .unwrap();
    session
        .apply_frame(&frame("chat_response", json!({"response": "unused", "task_id": task})))
        .unwrap();

    assert_eq!(assistant_texts(&session), vec!["Hello"]);
    assert!(session.tasks().current_task_id().is_none());
    assert!(!session.tasks().is_streaming());
}

#[test]
fn test_scenario_stale_step_never_reaches_trail() {
    let (mut session, _sink, _clock) = create_test_session();
    let e1 = session.start_execution(HashMap::new(), None).unwrap();

    session.apply_frame(&step(e1.as_str(), "n1", 0)).unwrap();
    let stale = session.apply_frame(&step("E0", "n99", 1));
    assert!(matches!(stale, Err(Ignored::StaleExecution { .. })));

    let execution = session.execution().current().unwrap();
    assert_eq!(execution.trail.executing_node_id.as_deref(), Some("n1"));
    assert!(!execution.trail.is_executed("n99"));
    assert!(!execution.trail.path.contains(&"n99".to_string()));
}

#[test]
fn test_scenario_two_steps() {
    let (mut session, _sink, _clock) = create_test_session();
    let e1 = session.start_execution(HashMap::new(), None).unwrap();

    session.apply_frame(&step(e1.as_str(), "n1", 0)).unwrap();
    session.apply_frame(&step(e1.as_str(), "n2", 1)).unwrap();

    let execution = session.execution().current().unwrap();
    assert_eq!(execution.trail.executed_node_ids, vec!["n1"]);
    assert_eq!(execution.trail.executing_node_id.as_deref(), Some("n2"));
}

#[test]
fn test_scenario_cancel_window_expires() {
    let (mut session, sink, clock) = create_test_session();
    let t1 = session.send_message("Hi", None);
    session.cancel_task(&t1).unwrap();
    assert_eq!(sink.names(), vec!["chat", "cancel_task"]);

    let late = frame("chat_response", json!({"response": "late", "task_id": t1}));

    clock.advance(Duration::seconds(2));
    assert_eq!(
        session.apply_frame(&late),
        Err(Ignored::CancelledTask(t1.to_string()))
    );
    assert!(assistant_texts(&session).is_empty());

    // Known limitation: suppression is only as long as the TTL.
    clock.advance(Duration::seconds(59));
    session.apply_frame(&late).unwrap();
    assert_eq!(assistant_texts(&session), vec!["late"]);
}

#[test]
fn test_scenario_log_annotations() {
    let (mut session, _sink, _clock) = create_test_session();
    let e1 = session.start_execution(HashMap::new(), None).unwrap();
    let id = e1.as_str();

    session
        .apply_frame(&log_entry(id, json!({"log_type": "start", "node_id": "s", "node_label": "Start"})))
        .unwrap();
    session
        .apply_frame(&log_entry(id, json!({"log_type": "subflow_start", "subworkflow_id": "A"})))
        .unwrap();
    session
        .apply_frame(&log_entry(
            id,
            json!({"log_type": "decision", "node_id": "d", "subworkflow_stack": ["bogus", "nesting"]}),
        ))
        .unwrap();
    session
        .apply_frame(&log_entry(id, json!({"log_type": "subflow_complete"})))
        .unwrap();

    let annotations: Vec<Vec<String>> = session
        .execution_log()
        .entries()
        .iter()
        .map(|e| e.subworkflow_stack.clone())
        .collect();
    let expected: Vec<Vec<String>> = vec![vec![], vec![], vec!["A".to_string()], vec![]];
    assert_eq!(annotations, expected);
}

#[test]
fn test_task_isolation() {
    let (mut session, _sink, _clock) = create_test_session();
    let a = session.send_message("A", None);
    let b = TaskId::from("task_b");

    let before = session.snapshot();
    for event in [
        frame("chat_stream", json!({"chunk": "x", "task_id": b})),
        frame("chat_progress", json!({"event": "tool", "status": "busy", "task_id": b})),
        frame("chat_response", json!({"response": "r", "task_id": b})),
        frame("agent_error", json!({"error": "e", "task_id": b})),
        frame("chat_cancelled", json!({"task_id": b})),
        frame("workflow_modified", json!({"task_id": b, "nodes": []})),
    ] {
        assert!(matches!(
            session.apply_frame(&event),
            Err(Ignored::StaleTask { .. })
        ));
    }
    assert_eq!(session.snapshot(), before);
    assert_eq!(session.tasks().current_task_id(), Some(&a));
    assert!(session.drain_signals().is_empty());
}

#[test]
fn test_cancellation_is_idempotent() {
    let (mut session, sink, _clock) = create_test_session();
    let task = session.send_message("Hi", None);
    session
        .apply_frame(&frame("chat_stream", json!({"chunk": "part", "task_id": task})))
        .unwrap();

    session.cancel_task(&task).unwrap();
    let once = session.snapshot();
    let sent_once = sink.sent().len();

    assert_eq!(session.cancel_task(&task), Err(Ignored::NoTask));
    assert_eq!(session.snapshot(), once);
    assert_eq!(sink.sent().len(), sent_once);
    assert_eq!(assistant_texts(&session), vec!["part"]);
}

#[test]
fn test_stream_precedence_with_tool_calls() {
    let (mut session, _sink, _clock) = create_test_session();
    let task = session.send_message("Build it", None);
    for chunk in ["A", "B", "C"] {
        session
            .apply_frame(&frame("chat_stream", json!({"chunk": chunk, "task_id": task})))
            .unwrap();
    }
    session
        .apply_frame(&frame(
            "chat_response",
            json!({
                "response": "different",
                "tool_calls": [{"name": "add_node"}],
                "conversation_id": "conv-server",
                "task_id": task,
            }),
        ))
        .unwrap();

    let last = session.tasks().messages().last().unwrap();
    assert_eq!(last.content, "ABC");
    assert_eq!(last.tool_calls.as_ref().map(Vec::len), Some(1));
    // The client already minted a conversation id on send.
    assert_ne!(session.tasks().conversation_id().unwrap().as_str(), "conv-server");
}

#[test]
fn test_trail_is_monotonic_and_unique() {
    let (mut session, _sink, _clock) = create_test_session();
    let id = session.start_execution(HashMap::new(), None).unwrap();
    let id = id.as_str();

    let mut previous: Vec<String> = Vec::new();
    let sequence = ["a", "b", "a", "c", "b", "d"];
    for (index, node) in sequence.iter().enumerate() {
        session.apply_frame(&step(id, node, index as u64)).unwrap();
        // redelivery of the same step
        assert_eq!(
            session.apply_frame(&step(id, node, index as u64)),
            Err(Ignored::Duplicate)
        );

        let trail = session.execution().current().unwrap().trail.executed_node_ids.clone();
        assert!(trail.starts_with(&previous), "Trail must only grow");
        let mut unique = trail.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), trail.len(), "Trail must be duplicate-free");
        previous = trail;
    }
    assert_eq!(previous, vec!["a", "b", "c"]);
}

#[test]
fn test_prior_execution_is_stale_after_restart() {
    let (mut session, _sink, _clock) = create_test_session();
    let e1 = session.start_execution(HashMap::new(), None).unwrap();
    session.apply_frame(&step(e1.as_str(), "n1", 0)).unwrap();
    session.stop_execution().unwrap();

    let e2 = session.start_execution(HashMap::new(), None).unwrap();
    assert_ne!(e1, e2);
    let before = session.snapshot();

    let old = e1.as_str();
    for event in [
        frame("execution_started", json!({"execution_id": old})),
        step(old, "n2", 1),
        frame("execution_paused", json!({"execution_id": old})),
        frame("execution_resumed", json!({"execution_id": old})),
        frame("execution_complete", json!({"execution_id": old, "success": true, "output": 1})),
        frame("execution_error", json!({"execution_id": old, "error": "late"})),
        frame(
            "subflow_start",
            json!({"execution_id": old, "parent_node_id": "p", "subworkflow_id": "S"}),
        ),
        frame("subflow_step", json!({"execution_id": old, "node_id": "s1"})),
        frame("subflow_complete", json!({"execution_id": old})),
        log_entry(old, json!({"log_type": "node"})),
    ] {
        assert!(
            matches!(session.apply_frame(&event), Err(Ignored::StaleExecution { .. })),
            "{} should be stale",
            event
        );
    }
    assert_eq!(session.snapshot(), before);
    assert!(session.drain_signals().is_empty());
}

#[test]
fn test_log_bracketing_nested() {
    let (mut session, _sink, _clock) = create_test_session();
    let id = session.start_execution(HashMap::new(), None).unwrap();
    let id = id.as_str();

    let types = [
        ("start", None),
        ("subflow_start", Some("A")),
        ("node", None),
        ("subflow_start", Some("B")),
        ("node", None),
        ("subflow_complete", None),
        ("decision", None),
        ("subflow_complete", None),
        ("end", None),
    ];
    for (log_type, subworkflow) in types {
        let mut entry = json!({ "log_type": log_type });
        if let Some(sw) = subworkflow {
            entry["subworkflow_id"] = json!(sw);
        }
        session.apply_frame(&log_entry(id, entry)).unwrap();
    }

    let entries = session.execution_log().entries();
    let depths: Vec<usize> = entries.iter().map(|e| e.depth()).collect();
    assert_eq!(depths, vec![0, 0, 1, 1, 2, 1, 1, 0, 0]);
    // start/complete pairs share an annotation
    assert_eq!(entries[1].subworkflow_stack, entries[7].subworkflow_stack);
    assert_eq!(entries[3].subworkflow_stack, entries[5].subworkflow_stack);
    assert_eq!(entries[4].subworkflow_stack, vec!["A", "B"]);
}

#[test]
fn test_nested_subflow_visualization() {
    let (mut session, _sink, _clock) = create_test_session();
    let id = session.start_execution(HashMap::new(), None).unwrap();
    let id = id.as_str();

    session.apply_frame(&step(id, "call", 0)).unwrap();
    session
        .apply_frame(&frame(
            "subflow_start",
            json!({
                "execution_id": id,
                "parent_node_id": "call",
                "subworkflow_id": "sw-outer",
                "subworkflow_name": "Outer",
                "nodes": [{"id": "o1", "type": "action"}, {"id": "o2", "type": "action"}],
                "edges": [{"id": "e", "source": "o1", "target": "o2"}],
            }),
        ))
        .unwrap();
    session
        .apply_frame(&frame("subflow_step", json!({"execution_id": id, "node_id": "o1"})))
        .unwrap();
    session
        .apply_frame(&frame(
            "subflow_start",
            json!({"execution_id": id, "parent_node_id": "o1", "subworkflow_id": "sw-inner"}),
        ))
        .unwrap();
    session
        .apply_frame(&frame("subflow_step", json!({"execution_id": id, "node_id": "i1"})))
        .unwrap();
    session
        .apply_frame(&frame("subflow_step", json!({"execution_id": id, "node_id": "i2"})))
        .unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.subflow_stack.len(), 2);
    assert_eq!(snapshot.subflow_stack[0].subworkflow_name, "Outer");
    assert_eq!(snapshot.subflow_stack[0].nodes.len(), 2);
    assert_eq!(snapshot.subflow_stack[1].trail.executed_node_ids, vec!["i1"]);
    // the outer execution's highlight is untouched by subflow steps
    let execution = snapshot.execution.as_ref().unwrap();
    assert_eq!(execution.trail.executing_node_id.as_deref(), Some("call"));

    session
        .apply_frame(&frame(
            "subflow_complete",
            json!({"execution_id": id, "subworkflow_id": "sw-inner"}),
        ))
        .unwrap();
    assert_eq!(session.subflows().depth(), 1);
    assert_eq!(session.subflows().top().unwrap().subworkflow_id, "sw-outer");

    session
        .apply_frame(&frame(
            "execution_complete",
            json!({"execution_id": id, "success": true, "output": {"ok": true}}),
        ))
        .unwrap();
    assert_eq!(session.subflows().depth(), 0);
}

#[test]
fn test_execution_error_reopens_results() {
    let (mut session, sink, _clock) = create_test_session();
    let id = session.start_execution(HashMap::new(), Some(250)).unwrap();

    let sent = sink.sent();
    let ClientCommand::ExecuteWorkflow(command) = &sent[0] else {
        panic!("Expected execute_workflow");
    };
    assert_eq!(command.speed_ms, 250);
    assert_eq!(command.execution_id, id);

    session.apply_frame(&step(id.as_str(), "n1", 0)).unwrap();
    session
        .apply_frame(&frame(
            "execution_error",
            json!({"execution_id": id, "error": "node n1 exploded"}),
        ))
        .unwrap();

    let execution = session.execution().current().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Stopped);
    assert_eq!(execution.error.as_deref(), Some("node n1 exploded"));
    assert_eq!(execution.trail.executed_node_ids, vec!["n1"]);
    assert_eq!(
        session.drain_signals(),
        vec![EngineSignal::OpenResults { execution_id: id }]
    );
}

#[test]
fn test_pause_resume_round_trip() {
    let (mut session, sink, _clock) = create_test_session();
    let id = session.start_execution(HashMap::new(), None).unwrap();

    session.pause_execution().unwrap();
    assert_eq!(session.execution().status(), ExecutionStatus::Paused);
    session
        .apply_frame(&frame("execution_paused", json!({"execution_id": id, "current_node_id": "n1"})))
        .unwrap();

    assert!(matches!(session.pause_execution(), Err(Ignored::InvalidState(_))));
    session.resume_execution().unwrap();
    session
        .apply_frame(&frame("execution_resumed", json!({"execution_id": id})))
        .unwrap();
    assert_eq!(
        session.apply_frame(&frame("execution_resumed", json!({"execution_id": id}))),
        Err(Ignored::Duplicate)
    );
    assert_eq!(session.execution().status(), ExecutionStatus::Running);
    assert_eq!(
        sink.names(),
        vec!["execute_workflow", "pause_execution", "resume_execution"]
    );
}

#[test]
fn test_workflow_mutation_is_forwarded() {
    let (mut session, _sink, _clock) = create_test_session();
    let task = session.send_message("add a node", None);
    session
        .apply_frame(&frame(
            "workflow_update",
            json!({"task_id": task, "nodes": [{"id": "n1"}], "edges": []}),
        ))
        .unwrap();

    let signals = session.drain_signals();
    assert_eq!(signals.len(), 1);
    match &signals[0] {
        EngineSignal::WorkflowMutation { payload, .. } => {
            assert!(payload.contains_key("nodes"));
            assert_eq!(payload.get("task_id"), Some(&json!(task)));
        }
        other => panic!("Unexpected signal: {:?}", other),
    }
}

#[test]
fn test_agent_question_closes_task() {
    let (mut session, _sink, _clock) = create_test_session();
    let task = session.send_message("make it", None);
    session
        .apply_frame(&frame("chat_stream", json!({"chunk": "Let me check. ", "task_id": task})))
        .unwrap();
    session
        .apply_frame(&frame(
            "agent_question",
            json!({"question": "Which API key?", "task_id": task}),
        ))
        .unwrap();

    assert_eq!(assistant_texts(&session), vec!["Let me check. ", "Which API key?"]);
    assert!(session.tasks().current_task_id().is_none());
    assert!(session.tasks().processing_status().is_none());
}

#[test]
fn test_server_cancel_flushes_partial_without_echo() {
    let (mut session, sink, clock) = create_test_session();
    let task = session.send_message("long job", None);
    session
        .apply_frame(&frame("chat_stream", json!({"chunk": "Working on", "task_id": task})))
        .unwrap();

    session
        .apply_frame(&frame("chat_cancelled", json!({"task_id": task})))
        .unwrap();

    let last = session.tasks().messages().last().unwrap();
    assert_eq!(last.content, "Working on");
    assert!(last.interrupted);
    assert_eq!(last.task_id.as_ref(), Some(&task));
    assert!(session.tasks().current_task_id().is_none());
    assert!(!session.tasks().is_streaming());
    assert!(session.tasks().is_cancelled(&task, clock.now()));
    // the server already knows; nothing goes back out
    assert_eq!(sink.names(), vec!["chat"]);

    let late = session.apply_frame(&frame("chat_stream", json!({"chunk": "!", "task_id": task})));
    assert_eq!(late, Err(Ignored::CancelledTask(task.to_string())));
}

#[test]
fn test_agent_complete_finalizes_open_task() {
    let (mut session, _sink, _clock) = create_test_session();
    let task = session.send_message("build it", None);
    session
        .apply_frame(&frame("chat_stream", json!({"chunk": "Built ", "task_id": task})))
        .unwrap();
    session
        .apply_frame(&frame("chat_stream", json!({"chunk": "3 nodes.", "task_id": task})))
        .unwrap();

    session
        .apply_frame(&frame(
            "agent_complete",
            json!({"message": "Done", "result": {"nodes": 3}, "task_id": task}),
        ))
        .unwrap();

    assert_eq!(assistant_texts(&session), vec!["Built 3 nodes."]);
    assert!(session.tasks().current_task_id().is_none());
    assert!(session.tasks().stream_buffer().is_empty());

    // a second completion finds nothing open
    let again = session.apply_frame(&frame(
        "agent_complete",
        json!({"message": "Done", "task_id": task}),
    ));
    assert!(again.is_err());
    assert_eq!(assistant_texts(&session).len(), 1);
}

#[test]
fn test_agent_complete_without_stream_uses_message() {
    let (mut session, _sink, _clock) = create_test_session();
    let task = session.send_message("build it", None);
    session
        .apply_frame(&frame("agent_complete", json!({"message": "Done", "task_id": task})))
        .unwrap();
    assert_eq!(assistant_texts(&session), vec!["Done"]);
}
