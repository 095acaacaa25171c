//! Turn context: per-request identity and turn-scoped mutable slots,
//! propagated to every future polled inside [`run_in_turn`].
//!
//! Propagation uses a tokio task-local, so two turns running concurrently on
//! the same runtime never observe each other's context. Task-locals are not
//! inherited by `tokio::spawn`; use [`spawn_in_turn`] to carry the context
//! into a new task.

pub mod plan;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::task::JoinHandle;

use crate::error::{Result, TurnError};
use crate::events::{EventSource, UiWriter};

use plan::{PlanItemInput, PlanPatch, PlanPatchOutcome, PlanSnapshot};

tokio::task_local! {
    static CURRENT_TURN: TurnContext;
}

/// Request identity, immutable for the life of the turn.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnIdentity {
    #[builder(into)]
    pub session_id: String,
    #[builder(into)]
    pub workspace_id: String,
    #[builder(into)]
    pub tab_id: String,
    #[builder(into)]
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentKind {
    Master,
    Sub,
}

/// Which agent the current code is running for, and how it got there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentFrame {
    pub kind: AgentKind,
    pub name: String,
    pub agent_id: String,
    /// Sub-agent names this agent may spawn; empty allows any.
    pub allowed_sub_agents: Vec<String>,
    pub max_depth: usize,
    /// Agent names from the master down to this agent.
    pub path: Vec<String>,
}

impl AgentFrame {
    pub fn master(name: impl Into<String>, max_depth: usize) -> Self {
        let name = name.into();
        Self {
            kind: AgentKind::Master,
            agent_id: name.clone(),
            path: vec![name.clone()],
            name,
            allowed_sub_agents: Vec::new(),
            max_depth,
        }
    }

    pub fn with_allowed_sub_agents(mut self, allowed: Vec<String>) -> Self {
        self.allowed_sub_agents = allowed;
        self
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn event_source(&self) -> EventSource {
        EventSource {
            agent_id: self.agent_id.clone(),
            agent_name: self.name.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Default)]
struct TurnSlots {
    ui_writer: Option<UiWriter>,
    plan: Option<PlanSnapshot>,
    approval_payloads: HashMap<String, serde_json::Value>,
}

/// Shared handle to one agent's view of a turn.
///
/// Cloning is cheap; all clones see the same mutable slots.
#[derive(Debug, Clone)]
pub struct TurnContext {
    identity: Arc<TurnIdentity>,
    frame: Arc<AgentFrame>,
    slots: Arc<Mutex<TurnSlots>>,
}

impl TurnContext {
    pub fn new(identity: TurnIdentity, frame: AgentFrame) -> Self {
        Self {
            identity: Arc::new(identity),
            frame: Arc::new(frame),
            slots: Arc::new(Mutex::new(TurnSlots::default())),
        }
    }

    pub fn with_ui_writer(self, writer: UiWriter) -> Self {
        self.set_ui_writer(Some(writer));
        self
    }

    pub fn identity(&self) -> &TurnIdentity {
        &self.identity
    }

    pub fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    pub fn workspace_id(&self) -> &str {
        &self.identity.workspace_id
    }

    pub fn tab_id(&self) -> &str {
        &self.identity.tab_id
    }

    pub fn request_id(&self) -> &str {
        &self.identity.request_id
    }

    pub fn agent_frame(&self) -> &AgentFrame {
        &self.frame
    }

    /// Context for a sub-agent spawned from this one.
    ///
    /// Shares identity and the UI channel (re-tagged with the sub-agent's
    /// identity); plan and approval slots start empty.
    pub fn derive_for_sub_agent(
        &self,
        sub_agent_name: &str,
        agent_id: impl Into<String>,
    ) -> Result<TurnContext> {
        let depth = self.frame.path.len() + 1;
        if depth > self.frame.max_depth {
            return Err(TurnError::RecursionDepthExceeded {
                depth,
                max_depth: self.frame.max_depth,
            });
        }
        if !self.frame.allowed_sub_agents.is_empty()
            && !self
                .frame
                .allowed_sub_agents
                .iter()
                .any(|allowed| allowed == sub_agent_name)
        {
            return Err(TurnError::SubAgentNotAllowed(sub_agent_name.to_string()));
        }

        let mut path = self.frame.path.clone();
        path.push(sub_agent_name.to_string());
        let frame = AgentFrame {
            kind: AgentKind::Sub,
            name: sub_agent_name.to_string(),
            agent_id: agent_id.into(),
            allowed_sub_agents: Vec::new(),
            max_depth: self.frame.max_depth,
            path,
        };
        let writer = self
            .ui_writer()
            .map(|parent| parent.for_source(frame.event_source()));
        let child = TurnContext::new((*self.identity).clone(), frame);
        child.set_ui_writer(writer);
        Ok(child)
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, TurnSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ui_writer(&self) -> Option<UiWriter> {
        self.slots().ui_writer.clone()
    }

    /// Writer for this agent, or a detached one when no client is attached.
    pub fn writer_or_detached(&self) -> UiWriter {
        self.ui_writer().unwrap_or_else(|| {
            UiWriter::detached(self.request_id().to_string(), self.frame.event_source())
        })
    }

    pub fn set_ui_writer(&self, writer: Option<UiWriter>) {
        self.slots().ui_writer = writer;
    }

    pub fn plan_snapshot(&self) -> Option<PlanSnapshot> {
        self.slots().plan.clone()
    }

    /// Replace the plan wholesale; items without a step are dropped.
    pub fn apply_plan_full(&self, items: Vec<PlanItemInput>) -> PlanSnapshot {
        let snapshot = PlanSnapshot::from_inputs(items);
        self.slots().plan = Some(snapshot.clone());
        snapshot
    }

    /// Patch statuses against the last full plan; a no-op when none exists.
    pub fn apply_plan_patch(&self, patches: &[PlanPatch]) -> PlanPatchOutcome {
        let mut slots = self.slots();
        match slots.plan.as_mut() {
            None => PlanPatchOutcome::NoSnapshot,
            Some(plan) => {
                let (applied, skipped) = plan.apply_patches(patches);
                PlanPatchOutcome::Applied { applied, skipped }
            }
        }
    }

    pub fn set_approval_payload(&self, tool_call_id: impl Into<String>, payload: serde_json::Value) {
        self.slots()
            .approval_payloads
            .insert(tool_call_id.into(), payload);
    }

    pub fn approval_payload(&self, tool_call_id: &str) -> Option<serde_json::Value> {
        self.slots().approval_payloads.get(tool_call_id).cloned()
    }

    pub fn take_approval_payload(&self, tool_call_id: &str) -> Option<serde_json::Value> {
        self.slots().approval_payloads.remove(tool_call_id)
    }

    pub fn pending_approval_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots().approval_payloads.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Run `future` with `ctx` as the ambient turn context.
pub async fn run_in_turn<F>(ctx: TurnContext, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_TURN.scope(ctx, future).await
}

/// The ambient turn context, if any.
pub fn current() -> Option<TurnContext> {
    CURRENT_TURN.try_with(Clone::clone).ok()
}

/// The ambient turn context, or `ContextMissing`.
pub fn require() -> Result<TurnContext> {
    current().ok_or_else(|| TurnError::context_missing("no turn is active on this task"))
}

pub fn current_request_id() -> Option<String> {
    CURRENT_TURN
        .try_with(|ctx| ctx.request_id().to_string())
        .ok()
}

/// `tokio::spawn` that keeps the caller's turn context (if any).
pub fn spawn_in_turn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(ctx) => tokio::spawn(run_in_turn(ctx, future)),
        None => tokio::spawn(future),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn identity(request_id: &str) -> TurnIdentity {
        TurnIdentity::builder()
            .session_id("session")
            .workspace_id("workspace")
            .tab_id("tab")
            .request_id(request_id)
            .build()
    }

    fn master(request_id: &str, max_depth: usize) -> TurnContext {
        TurnContext::new(identity(request_id), AgentFrame::master("master", max_depth))
    }

    #[tokio::test]
    async fn current_is_absent_outside_a_turn() {
        assert!(current().is_none());
        assert!(matches!(require(), Err(TurnError::ContextMissing(_))));
    }

    #[tokio::test]
    async fn context_survives_await_points() {
        let seen = run_in_turn(master("req-a", 3), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            current_request_id()
        })
        .await;
        assert_eq!(seen.as_deref(), Some("req-a"));
    }

    #[tokio::test]
    async fn spawn_in_turn_carries_context_into_new_task() {
        let handle = run_in_turn(master("req-b", 3), async {
            spawn_in_turn(async { current_request_id() })
        })
        .await;
        assert_eq!(handle.await.unwrap().as_deref(), Some("req-b"));

        let bare = run_in_turn(master("req-c", 3), async {
            tokio::spawn(async { current_request_id() })
        })
        .await;
        assert_eq!(bare.await.unwrap(), None);
    }

    #[test]
    fn derive_extends_path_until_max_depth() {
        let root = master("req", 3);
        let first = root.derive_for_sub_agent("research", "a1").unwrap();
        let second = first.derive_for_sub_agent("summarize", "a2").unwrap();

        assert_eq!(second.agent_frame().path, vec!["master", "research", "summarize"]);
        assert_eq!(second.agent_frame().kind, AgentKind::Sub);
        assert_eq!(second.session_id(), "session");

        let err = second.derive_for_sub_agent("deeper", "a3").unwrap_err();
        assert!(matches!(
            err,
            TurnError::RecursionDepthExceeded { depth: 4, max_depth: 3 }
        ));
    }

    #[test]
    fn derive_honors_allow_list() {
        let frame = AgentFrame::master("master", 3).with_allowed_sub_agents(vec!["research".into()]);
        let root = TurnContext::new(identity("req"), frame);

        assert!(root.derive_for_sub_agent("research", "a1").is_ok());
        assert!(matches!(
            root.derive_for_sub_agent("shell", "a2"),
            Err(TurnError::SubAgentNotAllowed(name)) if name == "shell"
        ));
    }

    #[test]
    fn derived_context_has_its_own_plan() {
        let root = master("req", 3);
        root.apply_plan_full(vec![PlanItemInput {
            step: Some("parent step".into()),
            status: None,
        }]);
        let child = root.derive_for_sub_agent("research", "a1").unwrap();

        assert!(child.plan_snapshot().is_none());
        assert_eq!(root.plan_snapshot().unwrap().len(), 1);
    }

    #[test]
    fn patch_before_full_is_a_no_op() {
        let ctx = master("req", 3);
        let outcome = ctx.apply_plan_patch(&[PlanPatch {
            index: 1,
            status: plan::PlanStatus::Done,
        }]);
        assert_eq!(outcome, PlanPatchOutcome::NoSnapshot);
        assert!(ctx.plan_snapshot().is_none());
    }

    #[test]
    fn approval_payload_slots_round_trip() {
        let ctx = master("req", 3);
        ctx.set_approval_payload("call-2", serde_json::json!({"cmd": "rm"}));
        ctx.set_approval_payload("call-1", serde_json::json!(true));

        assert_eq!(ctx.pending_approval_ids(), vec!["call-1", "call-2"]);
        assert_eq!(ctx.take_approval_payload("call-2"), Some(serde_json::json!({"cmd": "rm"})));
        assert!(ctx.approval_payload("call-2").is_none());
    }
}
