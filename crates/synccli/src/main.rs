// crates/synccli/src/main.rs

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use synccore::{ExecutionId, TaskId, WorkflowContext, WorkflowNode};
use syncengine::{EngineConfig, ManualClock, RecordingSink, Session};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowsync")]
#[command(about = "Task & execution sync engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL transcript of UI actions and server frames
    Replay {
        /// Path to transcript file
        #[arg(short, long)]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Print every command the engine emitted
        #[arg(long)]
        commands: bool,
    },

    /// Create an example transcript
    Init {
        /// Output file path
        #[arg(short, long, default_value = "transcript.jsonl")]
        output: PathBuf,
    },
}

/// A UI action line in a transcript
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    SendMessage {
        text: String,
        #[serde(default)]
        image: Option<String>,
    },
    CancelTask {
        /// Defaults to the most recently generated task
        #[serde(default)]
        task_id: Option<TaskId>,
    },
    SetWorkflow {
        workflow: WorkflowContext,
    },
    SyncWorkflow {
        #[serde(default = "default_source")]
        source: String,
    },
    StartExecution {
        #[serde(default)]
        inputs: HashMap<String, Value>,
        #[serde(default)]
        speed_ms: Option<u64>,
    },
    Pause,
    Resume,
    Stop,
    SetSpeed {
        speed_ms: u64,
    },
    AdvanceMs {
        ms: i64,
    },
}

fn default_source() -> String {
    "editor".to_string()
}

/// Ids the transcript placeholders resolve to
#[derive(Default)]
struct Placeholders {
    task: Option<TaskId>,
    execution: Option<ExecutionId>,
}

impl Placeholders {
    fn substitute(&self, value: &mut Value) {
        match value {
            Value::String(s) if s == "$task" => {
                if let Some(task) = &self.task {
                    *s = task.to_string();
                }
            }
            Value::String(s) if s == "$execution" => {
                if let Some(execution) = &self.execution {
                    *s = execution.to_string();
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.substitute(item)),
            Value::Object(map) => map.values_mut().for_each(|item| self.substitute(item)),
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            file,
            verbose,
            commands,
        } => {
            // Initialize logging; RUST_LOG wins over -v
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_log_level(verbose))),
                )
                .init();

            replay(file, commands)?;
        }

        Commands::Init { output } => {
            create_example_transcript(output)?;
        }
    }

    Ok(())
}

fn default_log_level(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn replay(file: PathBuf, print_commands: bool) -> Result<()> {
    println!("🚀 Replaying transcript: {}", file.display());

    let transcript = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let clock = ManualClock::new(Utc::now());
    let sink = RecordingSink::new();
    let mut session = Session::with_clock(
        EngineConfig::from_env(),
        Box::new(sink.clone()),
        Arc::new(clock.clone()),
    );
    let mut ids = Placeholders::default();

    for (index, line) in transcript.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = index + 1;
        tracing::debug!("Replaying line {}", lineno);
        let mut value: Value = serde_json::from_str(line)
            .with_context(|| format!("Line {} is not valid JSON", lineno))?;

        if value.get("action").is_some() {
            let action: Action = serde_json::from_value(value)
                .with_context(|| format!("Line {} is not a valid action", lineno))?;
            run_action(&mut session, &clock, &mut ids, action);
        } else {
            ids.substitute(&mut value);
            let name = value
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string();
            match session.apply_frame(&value.to_string()) {
                Ok(()) => println!("  📥 {}", name),
                Err(reason) => println!("  💤 {} ignored: {}", name, reason),
            }
        }

        for signal in session.drain_signals() {
            println!("  🔔 {}", serde_json::to_string(&signal)?);
        }
    }

    if print_commands {
        println!();
        println!("📤 Emitted commands:");
        for command in sink.sent() {
            println!("   {}", command.to_frame()?);
        }
    }

    println!();
    println!("📊 Final state:");
    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);

    Ok(())
}

fn run_action(session: &mut Session, clock: &ManualClock, ids: &mut Placeholders, action: Action) {
    match action {
        Action::SendMessage { text, image } => {
            let task_id = session.send_message(&text, image);
            println!("  💬 send_message -> {}", task_id);
            ids.task = Some(task_id);
        }
        Action::CancelTask { task_id } => {
            let Some(task_id) = task_id.or_else(|| ids.task.clone()) else {
                println!("  ⚠️  cancel_task: no task to cancel");
                return;
            };
            report("cancel_task", session.cancel_task(&task_id));
        }
        Action::SetWorkflow { workflow } => {
            println!("  📋 set_workflow ({} nodes)", workflow.nodes.len());
            session.set_workflow(workflow);
        }
        Action::SyncWorkflow { source } => report("sync_workflow", session.sync_workflow(&source)),
        Action::StartExecution { inputs, speed_ms } => {
            match session.start_execution(inputs, speed_ms) {
                Ok(execution_id) => {
                    println!("  ▶️  start_execution -> {}", execution_id);
                    ids.execution = Some(execution_id);
                }
                Err(reason) => println!("  ⚠️  start_execution declined: {}", reason),
            }
        }
        Action::Pause => report("pause", session.pause_execution()),
        Action::Resume => report("resume", session.resume_execution()),
        Action::Stop => report("stop", session.stop_execution()),
        Action::SetSpeed { speed_ms } => {
            let applied = session.set_speed(speed_ms);
            println!("  ⏱️  set_speed -> {}ms", applied);
        }
        Action::AdvanceMs { ms } => {
            clock.advance_ms(ms);
            println!("  ⏩ advanced clock by {}ms", ms);
        }
    }
}

fn report(name: &str, outcome: syncengine::Outcome) {
    match outcome {
        Ok(()) => println!("  ✅ {}", name),
        Err(reason) => println!("  ⚠️  {} declined: {}", name, reason),
    }
}

fn create_example_transcript(output: PathBuf) -> Result<()> {
    let mut workflow = WorkflowContext::new();
    workflow.add_node(
        WorkflowNode::new("start", "start")
            .with_label("Start")
            .with_position(100.0, 100.0),
    );
    workflow.add_node(
        WorkflowNode::new("review", "llm")
            .with_label("Review")
            .with_position(300.0, 100.0),
    );
    workflow.add_node(
        WorkflowNode::new("end", "end")
            .with_label("End")
            .with_position(500.0, 100.0),
    );
    workflow.connect("start", "review");
    workflow.connect("review", "end");

    let lines = vec![
        json!({"action": "set_workflow", "workflow": workflow}),
        json!({"action": "send_message", "text": "Add a review step"}),
        json!({"event": "chat_progress", "data": {"event": "tool_start", "tool": "add_node", "task_id": "$task"}}),
        json!({"event": "chat_stream", "data": {"chunk": "Added ", "task_id": "$task"}}),
        json!({"event": "chat_stream", "data": {"chunk": "the review node.", "task_id": "$task"}}),
        json!({"event": "chat_response", "data": {"response": "Added the review node.", "conversation_id": "conv_demo", "task_id": "$task"}}),
        json!({"action": "start_execution", "inputs": {"topic": "demo"}}),
        json!({"event": "execution_started", "data": {"execution_id": "$execution"}}),
        json!({"event": "execution_step", "data": {"execution_id": "$execution", "node_id": "start", "step_index": 0}}),
        json!({"event": "execution_step", "data": {"execution_id": "$execution", "node_id": "review", "step_index": 1}}),
        json!({"event": "execution_log", "data": {"execution_id": "$execution", "entry": {"log_type": "node_output", "node_id": "review", "output": "looks good"}}}),
        json!({"event": "execution_step", "data": {"execution_id": "$execution", "node_id": "end", "step_index": 2}}),
        json!({"event": "execution_complete", "data": {"execution_id": "$execution", "success": true, "output": "looks good"}}),
    ];

    let mut transcript = String::new();
    for line in lines {
        transcript.push_str(&serde_json::to_string(&line)?);
        transcript.push('\n');
    }
    std::fs::write(&output, transcript)?;

    println!("✨ Created example transcript: {}", output.display());
    println!();
    println!("Replay it with:");
    println!("  flowsync replay --file {} --commands", output.display());

    Ok(())
}
