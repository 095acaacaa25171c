//! Scripted turn used by `agent-turn demo`.
//!
//! The master agent spawns sub-agents, asks for one approval, then waits on
//! every sub-agent. UI events go to stdout as JSON lines.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use super::{ApprovalMode, DemoArgs};
use crate::approval::{ApprovalKind, ApprovalResponse};
use crate::config::RuntimeConfig;
use crate::context::TurnIdentity;
use crate::error::Result;
use crate::events::{SinkChannel, UiEvent, UiEventSink};
use crate::subagent::{AgentExecutors, ScriptedExecutor};
use crate::tools::{AgentToolParameters, ApprovalGatedTool, ToolCall, ToolCallResult};
use crate::turn::{Turn, TurnRegistry};

const APPROVAL_TOOL: &str = "apply_changes";
const APPROVAL_CALL_ID: &str = "call-approval";
const ANSWER_DELAY: Duration = Duration::from_millis(100);

/// Final tool results of a demo run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DemoReport {
    pub request_id: String,
    pub spawned: Vec<ToolCallResult>,
    pub approval: ToolCallResult,
    pub wait: ToolCallResult,
}

/// Run the scripted turn, sending every UI event to `sink`.
pub async fn run_demo(args: &DemoArgs, mut config: RuntimeConfig, sink: UiEventSink) -> Result<DemoReport> {
    config.approval_ttl_ms = args.approval_ttl_ms;
    config.max_active_sub_agents = config.max_active_sub_agents.max(args.agents);
    config.validate()?;

    let identity = TurnIdentity::builder()
        .session_id(format!("session-{}", Uuid::new_v4()))
        .workspace_id("demo")
        .tab_id("tab-1")
        .request_id(format!("req-{}", Uuid::new_v4()))
        .build();
    let executors = AgentExecutors::new(Arc::new(
        ScriptedExecutor::builder()
            .steps(args.steps)
            .step_delay(Duration::from_millis(args.step_ms))
            .build(),
    ));

    let registry = TurnRegistry::new();
    let turn = Turn::start(identity, Arc::new(SinkChannel::new(sink)), executors, config);
    registry.register(turn.clone());

    let mut dispatcher = turn.dispatcher();
    dispatcher.register(Arc::new(ApprovalGatedTool::new(
        APPROVAL_TOOL,
        "Apply the sub-agents' changes after user approval",
        AgentToolParameters::object()
            .string("summary", "What will change", true)
            .build(),
        ApprovalKind::FileChange,
        turn.bridge().clone(),
    )));

    let answerer = spawn_answer(registry.clone(), args.approval_mode());

    let wait_ms = args.wait_ms;
    let agents = args.agents;
    let report = turn
        .run(async move {
            let spawn_calls = (0..agents)
                .map(|i| {
                    ToolCall::new(
                        format!("call-spawn-{i}"),
                        "spawn_agent",
                        json!({ "task": format!("research topic {i}"), "name": format!("research-{i}") }),
                    )
                })
                .collect();
            let spawned = dispatcher.execute_all(spawn_calls).await;
            let ids: Vec<serde_json::Value> = spawned
                .iter()
                .filter_map(|result| result.result.get("agent_id").cloned())
                .collect();

            let mut results = dispatcher
                .execute_all(vec![
                    ToolCall::new(
                        APPROVAL_CALL_ID,
                        APPROVAL_TOOL,
                        json!({ "summary": "merge research notes" }),
                    ),
                    ToolCall::new("call-wait", "wait", json!({ "ids": ids, "timeout_ms": wait_ms })),
                ])
                .await
                .into_iter();
            let (approval, wait) = (results.next(), results.next());
            (spawned, approval, wait)
        })
        .await;

    answerer.abort();
    let outcome = match report {
        Ok((spawned, Some(approval), Some(wait))) => Ok(DemoReport {
            request_id: turn.request_id().to_string(),
            spawned,
            approval,
            wait,
        }),
        Ok(_) => Err(crate::error::TurnError::InvalidState(
            "dispatcher returned fewer results than calls".into(),
        )),
        Err(err) => Err(err),
    };
    turn.finish().await;
    registry.remove(turn.request_id());
    outcome
}

fn spawn_answer(registry: TurnRegistry, mode: ApprovalMode) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if mode == ApprovalMode::NoAnswer {
            return;
        }
        loop {
            tokio::time::sleep(ANSWER_DELAY).await;
            let answered = match mode {
                ApprovalMode::Approve => {
                    registry.resolve_approval(APPROVAL_CALL_ID, ApprovalResponse::accept())
                }
                ApprovalMode::Deny => registry.reject_approval(APPROVAL_CALL_ID, "denied from CLI"),
                ApprovalMode::NoAnswer => true,
            };
            if answered {
                break;
            }
        }
    })
}

/// Sink writing each event as one JSON line on stdout.
pub fn stdout_sink() -> UiEventSink {
    Arc::new(|event: UiEvent| match serde_json::to_string(&event) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::warn!(error = %err, "failed to serialize ui event"),
    })
}
