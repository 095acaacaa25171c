mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::Instant;

use agent_turn::config::RuntimeConfig;
use agent_turn::context::{self, plan::PlanStatus};
use agent_turn::error::TurnError;
use agent_turn::events::{TurnLifecycle, UiEvent, UiEventPayload};
use agent_turn::subagent::{AgentStatus, WaitStatus};
use agent_turn::tools::ToolCall;

use common::{assert_elapsed_about, recording, start_turn};

fn lifecycle(events: &[UiEvent]) -> Vec<TurnLifecycle> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            UiEventPayload::Lifecycle { state } => Some(state.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn abort_ends_a_pending_wait_immediately() {
    let (executors, _runs) = recording(Duration::from_secs(60));
    let (turn, log) = start_turn("req-abort", RuntimeConfig::default(), executors);
    let manager = turn.sub_agents().clone();
    let id = manager
        .spawn(
            agent_turn::subagent::SpawnRequest::builder()
                .task("slow")
                .name("slow")
                .build(),
            turn.context(),
        )
        .await
        .unwrap();

    let aborting = turn.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        aborting.abort("user pressed stop").await;
    });

    let started = Instant::now();
    let result = manager.wait(&[id.clone()], Some(Duration::from_secs(10))).await;
    assert_elapsed_about(started.elapsed(), Duration::from_millis(50));
    assert_eq!(result.status, WaitStatus::Aborted);
    assert!(!result.timed_out);

    // Let the abort finish shutting the agent down.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(turn.is_aborted());
    assert_eq!(manager.status(&id).await, AgentStatus::Closed);
    assert_eq!(
        lifecycle(&log.events()),
        vec![
            TurnLifecycle::Started,
            TurnLifecycle::Aborted {
                reason: "user pressed stop".into()
            }
        ]
    );

    // Aborting twice and finishing afterwards are no-ops.
    turn.abort("again").await;
    turn.finish().await;
    assert_eq!(lifecycle(&log.events()).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn run_resolves_to_turn_aborted() {
    let (executors, _runs) = recording(Duration::from_millis(10));
    let (turn, _log) = start_turn("req-run", RuntimeConfig::default(), executors);

    let aborting = turn.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        aborting.abort("shutting down").await;
    });

    let outcome = turn
        .run(async {
            let request_id = context::current_request_id();
            tokio::time::sleep(Duration::from_secs(60)).await;
            request_id
        })
        .await;
    assert!(matches!(outcome, Err(TurnError::TurnAborted(ref reason)) if reason == "shutting down"));

    let again = turn.run(async { 1 }).await;
    assert!(matches!(again, Err(TurnError::TurnAborted(_))));
}

#[tokio::test(start_paused = true)]
async fn run_exposes_the_master_context() {
    let (executors, _runs) = recording(Duration::from_millis(10));
    let (turn, log) = start_turn("req-master", RuntimeConfig::default(), executors);

    let seen = turn
        .run(async { context::require().map(|ctx| ctx.agent_frame().name.clone()) })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, "master");

    turn.finish().await;
    assert_eq!(
        lifecycle(&log.events()),
        vec![TurnLifecycle::Started, TurnLifecycle::Completed]
    );
    assert!(!turn.is_aborted());
    assert!(matches!(
        turn.sub_agents().spawn(
            agent_turn::subagent::SpawnRequest::builder().task("t").name("late").build(),
            turn.context(),
        )
        .await,
        Err(TurnError::TurnAborted(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn finished_turn_is_not_reported_as_aborted() {
    let (executors, _runs) = recording(Duration::from_secs(60));
    let (turn, log) = start_turn("req-finish", RuntimeConfig::default(), executors);
    let manager = turn.sub_agents().clone();
    let id = manager
        .spawn(
            agent_turn::subagent::SpawnRequest::builder()
                .task("slow")
                .name("slow")
                .build(),
            turn.context(),
        )
        .await
        .unwrap();

    turn.finish().await;
    assert!(!turn.is_aborted());
    assert_eq!(manager.status(&id).await, AgentStatus::Closed);
    assert_eq!(turn.run(async { 7 }).await.unwrap(), 7);

    // Aborting after a normal finish changes nothing.
    turn.abort("too late").await;
    assert!(!turn.is_aborted());
    assert_eq!(
        lifecycle(&log.events()),
        vec![TurnLifecycle::Started, TurnLifecycle::Completed]
    );
}

#[tokio::test(start_paused = true)]
async fn plan_tool_drops_malformed_entries_one_by_one() {
    let (executors, _runs) = recording(Duration::from_millis(10));
    let (turn, _log) = start_turn("req-plan-loose", RuntimeConfig::default(), executors);
    let dispatcher = turn.dispatcher();

    let full = dispatcher
        .execute_all(vec![ToolCall::new(
            "call-1",
            "update_plan",
            json!({
                "mode": "full",
                "plan": [
                    { "step": "a", "status": "bogus" },
                    { "step": "b" },
                    { "step": "c", "status": "blocked" },
                ],
            }),
        )])
        .await;
    assert!(!full[0].is_error, "{}", full[0].result);
    assert_eq!(full[0].result, json!({ "mode": "full", "items": 2 }));

    let patched = dispatcher
        .execute_all(vec![ToolCall::new(
            "call-2",
            "update_plan",
            json!({
                "mode": "patch",
                "patches": [
                    { "index": "1", "status": "done" },
                    { "index": 2, "status": "someday" },
                    { "index": 1, "status": "in_progress" },
                    { "index": 2, "status": "done" },
                ],
            }),
        )])
        .await;
    assert_eq!(
        patched[0].result,
        json!({ "outcome": "applied", "applied": 2, "skipped": 2 })
    );

    let plan = turn.context().plan_snapshot().unwrap();
    let items: Vec<(&str, PlanStatus)> = plan
        .items
        .iter()
        .map(|item| (item.step.as_str(), item.status))
        .collect();
    assert_eq!(
        items,
        vec![("b", PlanStatus::InProgress), ("c", PlanStatus::Done)]
    );
}

#[tokio::test(start_paused = true)]
async fn plan_tool_replaces_then_patches() {
    let (executors, _runs) = recording(Duration::from_millis(10));
    let (turn, log) = start_turn("req-plan", RuntimeConfig::default(), executors);
    let dispatcher = turn.dispatcher();

    let early = dispatcher
        .execute_all(vec![ToolCall::new(
            "call-0",
            "update_plan",
            json!({ "mode": "patch", "patches": [{ "index": 1, "status": "done" }] }),
        )])
        .await;
    assert_eq!(early[0].result, json!({ "outcome": "no_snapshot" }));

    let full = dispatcher
        .execute_all(vec![ToolCall::new(
            "call-1",
            "update_plan",
            json!({
                "mode": "full",
                "plan": [
                    { "step": "read the code", "status": "in_progress" },
                    { "step": "   " },
                    { "step": "write the fix" },
                ],
            }),
        )])
        .await;
    assert_eq!(full[0].result, json!({ "mode": "full", "items": 2 }));

    let patched = dispatcher
        .execute_all(vec![ToolCall::new(
            "call-2",
            "update_plan",
            json!({
                "mode": "patch",
                "patches": [
                    { "index": 1, "status": "completed" },
                    { "index": 0, "status": "done" },
                    { "index": 9, "status": "done" },
                ],
            }),
        )])
        .await;
    assert_eq!(
        patched[0].result,
        json!({ "outcome": "applied", "applied": 1, "skipped": 2 })
    );

    let plan = turn.context().plan_snapshot().unwrap();
    let statuses: Vec<PlanStatus> = plan.items.iter().map(|item| item.status).collect();
    assert_eq!(statuses, vec![PlanStatus::Done, PlanStatus::Pending]);
    assert_eq!(plan.items[1].step, "write the fix");

    let updates = log
        .events()
        .iter()
        .filter(|event| matches!(event.payload, UiEventPayload::PlanUpdated { .. }))
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test(start_paused = true)]
async fn tool_results_are_streamed_for_every_call() {
    let (executors, _runs) = recording(Duration::from_millis(10));
    let (turn, log) = start_turn("req-stream", RuntimeConfig::default(), executors);

    let results = turn
        .dispatcher()
        .execute_all(vec![
            ToolCall::new("call-1", "close_agent", json!({ "agent_id": "ghost" })),
            ToolCall::new("call-2", "send_input", json!({ "agent_id": "ghost", "message": "hi" })),
            ToolCall::new("call-3", "wait", json!({ "ids": "not-a-list" })),
        ])
        .await;

    assert_eq!(results[0].result, json!({ "status": "not_found" }));
    assert_eq!(results[1].result["error"]["kind"], "not_found");
    assert_eq!(results[2].result["error"]["kind"], "invalid_argument");

    let events = log.events();
    let started = events
        .iter()
        .filter(|event| matches!(event.payload, UiEventPayload::ToolCallStarted { .. }))
        .count();
    let finished: Vec<&str> = events
        .iter()
        .filter_map(|event| match &event.payload {
            UiEventPayload::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, 3);
    assert_eq!(finished.len(), 3);

    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), seqs.len());
}
