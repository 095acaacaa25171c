//! Built-in tools bound to a turn: sub-agent control and plan updates.
//!
//! Each tool is constructed via [`AgentTool::new`] and returned as
//! `Arc<dyn Tool>`. Sub-agent tools resolve the calling agent's context from
//! the [`ToolExecutionContext`] so nested spawns extend the right path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::context::plan::{PlanItemInput, PlanPatch, PlanPatchOutcome};
use crate::error::TurnError;
use crate::events::UiEventPayload;
use crate::subagent::{SpawnRequest, SubAgentManager};
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;

/// Every built-in turn tool.
pub fn turn_tools(manager: &SubAgentManager) -> Vec<Arc<dyn Tool>> {
    vec![
        spawn_agent_tool(manager.clone()),
        send_input_tool(manager.clone()),
        wait_tool(manager.clone()),
        close_agent_tool(manager.clone()),
        resume_agent_tool(manager.clone()),
        update_plan_tool(),
    ]
}

/// Create the `spawn_agent` tool; returns the new agent id immediately.
pub fn spawn_agent_tool(manager: SubAgentManager) -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "spawn_agent",
        "Start a sub-agent on a task; it runs in the background",
        AgentToolParameters::object()
            .string("task", "Initial instruction for the sub-agent", true)
            .string("name", "Sub-agent name", true)
            .string("agent_type", "Executor type; defaults to 'default'", false)
            .string("parent_message_id", "Message that triggered the spawn", false)
            .build(),
        move |args, ctx: ToolExecutionContext| {
            let manager = manager.clone();
            async move {
                let turn = ctx.turn_context()?;
                let request = SpawnRequest::builder()
                    .task(args.get_str("task")?)
                    .name(args.get_str("name")?)
                    .maybe_agent_type(args.get_str_opt("agent_type"))
                    .maybe_parent_message_id(args.get_str_opt("parent_message_id"))
                    .build();
                let agent_id = manager.spawn(request, &turn).await?;
                Ok(json!({ "agent_id": agent_id }))
            }
        },
    ))
}

/// Create the `send_input` tool.
pub fn send_input_tool(manager: SubAgentManager) -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "send_input",
        "Send a message to a running sub-agent",
        AgentToolParameters::object()
            .string("agent_id", "Target sub-agent id", true)
            .string("message", "Message to deliver", true)
            .boolean(
                "interrupt",
                "Cancel the agent's current generation before delivering",
                false,
            )
            .build(),
        move |args, _ctx: ToolExecutionContext| {
            let manager = manager.clone();
            async move {
                let submission_id = manager
                    .send_input(
                        args.get_str("agent_id")?,
                        args.get_str("message")?,
                        args.get_bool_or("interrupt", false),
                    )
                    .await?;
                Ok(json!({ "submission_id": submission_id }))
            }
        },
    ))
}

/// Create the `wait` tool. Always bounded: a missing `timeout_ms` uses the
/// configured default.
pub fn wait_tool(manager: SubAgentManager) -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "wait",
        "Wait for sub-agents to finish their current work",
        AgentToolParameters::object()
            .array("ids", "Sub-agent ids to wait on", json!({ "type": "string" }), true)
            .integer("timeout_ms", "Maximum time to wait in milliseconds", false)
            .build(),
        move |args, _ctx: ToolExecutionContext| {
            let manager = manager.clone();
            async move {
                let ids = args.get_str_list("ids")?;
                let timeout = args.get_u64_opt("timeout_ms")?.map(Duration::from_millis);
                let result = manager.wait(&ids, timeout).await;
                Ok(serde_json::to_value(result)?)
            }
        },
    ))
}

/// Create the `close_agent` tool. Unknown ids report `not_found`.
pub fn close_agent_tool(manager: SubAgentManager) -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "close_agent",
        "Stop a sub-agent",
        AgentToolParameters::object()
            .string("agent_id", "Sub-agent id", true)
            .build(),
        move |args, _ctx: ToolExecutionContext| {
            let manager = manager.clone();
            async move {
                let status = manager.close(args.get_str("agent_id")?).await;
                Ok(json!({ "status": status }))
            }
        },
    ))
}

/// Create the `resume_agent` tool.
pub fn resume_agent_tool(manager: SubAgentManager) -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "resume_agent",
        "Reactivate a closed sub-agent with its conversation intact",
        AgentToolParameters::object()
            .string("agent_id", "Sub-agent id", true)
            .build(),
        move |args, _ctx: ToolExecutionContext| {
            let manager = manager.clone();
            async move {
                let status = manager.resume(args.get_str("agent_id")?).await?;
                Ok(json!({ "status": status }))
            }
        },
    ))
}

/// Create the `update_plan` tool.
///
/// `full` replaces the caller's plan; `patch` changes statuses by 1-based
/// index and does nothing until a full plan exists. Entries that do not
/// decode are dropped one by one instead of failing the call.
pub fn update_plan_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "update_plan",
        "Record or update the current step-by-step plan",
        AgentToolParameters::object()
            .string_enum("mode", "Replace the plan or patch statuses", &["full", "patch"], true)
            .array(
                "plan",
                "Plan items (mode=full)",
                json!({
                    "type": "object",
                    "properties": { "step": { "type": "string" }, "status": { "type": "string" } },
                }),
                false,
            )
            .array(
                "patches",
                "Status changes by 1-based index (mode=patch)",
                json!({
                    "type": "object",
                    "properties": { "index": { "type": "integer" }, "status": { "type": "string" } },
                }),
                false,
            )
            .build(),
        |args, ctx: ToolExecutionContext| async move {
            let turn = ctx.turn_context()?;
            match args.get_str("mode")? {
                "full" => {
                    let raw: Vec<serde_json::Value> = args.get_as("plan")?;
                    let items: Vec<PlanItemInput> =
                        raw.into_iter().filter_map(PlanItemInput::from_value).collect();
                    let snapshot = turn.apply_plan_full(items);
                    turn.writer_or_detached().emit(UiEventPayload::PlanUpdated {
                        plan: snapshot.clone(),
                    });
                    Ok(json!({ "mode": "full", "items": snapshot.len() }))
                }
                "patch" => {
                    let (patches, malformed) = PlanPatch::decode_all(args.get_as("patches")?);
                    let outcome = turn.apply_plan_patch(&patches).with_malformed(malformed);
                    if let PlanPatchOutcome::Applied { applied, .. } = outcome {
                        if applied > 0 {
                            if let Some(plan) = turn.plan_snapshot() {
                                turn.writer_or_detached()
                                    .emit(UiEventPayload::PlanUpdated { plan });
                            }
                        }
                    }
                    Ok(serde_json::to_value(outcome)?)
                }
                other => Err(TurnError::InvalidArgument(format!(
                    "mode must be 'full' or 'patch', got '{other}'"
                ))),
            }
        },
    ))
}
