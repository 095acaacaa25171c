//! One request's runtime bundle and the registry routing external answers to
//! the turn that is waiting for them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalResponse, ToolApprovalBridge};
use crate::config::RuntimeConfig;
use crate::context::{run_in_turn, AgentFrame, TurnContext, TurnIdentity};
use crate::error::{Result, TurnError};
use crate::events::{TurnLifecycle, UiEventChannel, UiEventPayload, UiWriter};
use crate::subagent::{AgentExecutors, SubAgentManager};
use crate::tools::builtin::turn_tools;
use crate::tools::{Tool, ToolDispatcher};

/// Name of the top-level agent in every turn.
pub const MASTER_AGENT: &str = "master";

struct TurnInner {
    context: TurnContext,
    bridge: ToolApprovalBridge,
    sub_agents: SubAgentManager,
    config: Arc<RuntimeConfig>,
    abort: CancellationToken,
    abort_reason: Mutex<Option<String>>,
    finished: Mutex<bool>,
}

/// A running turn. Cloning yields another handle to the same turn.
#[derive(Clone)]
pub struct Turn {
    inner: Arc<TurnInner>,
}

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turn")
            .field("request_id", &self.request_id())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl Turn {
    /// Build the master context, approval bridge and sub-agent manager, and
    /// announce the turn on `channel`.
    pub fn start(
        identity: TurnIdentity,
        channel: Arc<dyn UiEventChannel>,
        executors: AgentExecutors,
        config: RuntimeConfig,
    ) -> Self {
        let config = Arc::new(config);
        let abort = CancellationToken::new();
        let frame = AgentFrame::master(MASTER_AGENT, config.max_depth);
        let writer = UiWriter::new(channel, identity.request_id.clone(), frame.event_source());
        let context = TurnContext::new(identity, frame).with_ui_writer(writer.clone());

        let turn = Self {
            inner: Arc::new(TurnInner {
                bridge: ToolApprovalBridge::new(config.clone(), abort.clone()),
                sub_agents: SubAgentManager::new(executors, config.clone(), abort.child_token()),
                context,
                config,
                abort,
                abort_reason: Mutex::new(None),
                finished: Mutex::new(false),
            }),
        };
        tracing::info!(
            request_id = turn.request_id(),
            session_id = turn.inner.context.session_id(),
            "turn started"
        );
        writer.emit(UiEventPayload::Lifecycle {
            state: TurnLifecycle::Started,
        });
        turn
    }

    pub fn request_id(&self) -> &str {
        self.inner.context.request_id()
    }

    pub fn context(&self) -> &TurnContext {
        &self.inner.context
    }

    pub fn bridge(&self) -> &ToolApprovalBridge {
        &self.inner.bridge
    }

    pub fn sub_agents(&self) -> &SubAgentManager {
        &self.inner.sub_agents
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Built-in turn tools bound to this turn's sub-agent manager.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        turn_tools(&self.inner.sub_agents)
    }

    /// Dispatcher over the built-in tools, running as the master agent.
    pub fn dispatcher(&self) -> ToolDispatcher {
        ToolDispatcher::new(self.tools(), self.inner.context.clone())
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_cancelled()
    }

    fn abort_reason(&self) -> String {
        self.inner
            .abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "turn aborted".to_string())
    }

    /// Run the top-level agent inside this turn's context.
    ///
    /// Resolves to `TurnAborted` as soon as the turn is aborted.
    pub async fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        if self.is_aborted() {
            return Err(TurnError::TurnAborted(self.abort_reason()));
        }
        tokio::select! {
            biased;
            _ = self.inner.abort.cancelled() => Err(TurnError::TurnAborted(self.abort_reason())),
            output = run_in_turn(self.inner.context.clone(), future) => Ok(output),
        }
    }

    /// Abort the turn: fail waits and pending operations, stop sub-agents.
    pub async fn abort(&self, reason: &str) {
        if !self.mark_finished() {
            return;
        }
        *self
            .inner
            .abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
        let canceled = self.inner.bridge.abort(reason);
        self.inner.abort.cancel();
        let forced = self
            .inner
            .sub_agents
            .shutdown(self.inner.config.shutdown_grace())
            .await;
        tracing::info!(
            request_id = self.request_id(),
            reason,
            canceled,
            forced,
            "turn aborted"
        );
        self.inner
            .context
            .writer_or_detached()
            .emit(UiEventPayload::Lifecycle {
                state: TurnLifecycle::Aborted {
                    reason: reason.to_string(),
                },
            });
    }

    /// Normal completion: release pending operations and stop sub-agents.
    pub async fn finish(&self) {
        if !self.mark_finished() {
            return;
        }
        self.inner.bridge.cancel_all("turn finished");
        self.inner
            .sub_agents
            .shutdown(self.inner.config.shutdown_grace())
            .await;
        tracing::info!(request_id = self.request_id(), "turn finished");
        self.inner
            .context
            .writer_or_detached()
            .emit(UiEventPayload::Lifecycle {
                state: TurnLifecycle::Completed,
            });
    }

    /// Returns false if the turn was already finished or aborted.
    fn mark_finished(&self) -> bool {
        let mut finished = self
            .inner
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        !std::mem::replace(&mut *finished, true)
    }
}

/// Live turns by request id.
///
/// External actors answer by tool call id only; the registry finds whichever
/// turn has that call pending.
#[derive(Debug, Clone, Default)]
pub struct TurnRegistry {
    turns: Arc<Mutex<HashMap<String, Turn>>>,
}

impl TurnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Vec<Turn> {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn register(&self, turn: Turn) {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(turn.request_id().to_string(), turn);
    }

    pub fn remove(&self, request_id: &str) -> Option<Turn> {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id)
    }

    pub fn get(&self, request_id: &str) -> Option<Turn> {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn route(&self, tool_call_id: &str, settle: impl Fn(&ToolApprovalBridge) -> bool) -> bool {
        let routed = self
            .snapshot()
            .iter()
            .any(|turn| turn.bridge().has_pending(tool_call_id) && settle(turn.bridge()));
        if !routed {
            tracing::debug!(tool_call_id, "no turn is waiting on this tool call");
        }
        routed
    }

    pub fn resolve_approval(&self, tool_call_id: &str, response: ApprovalResponse) -> bool {
        self.route(tool_call_id, |bridge| {
            bridge.resolve_approval(tool_call_id, response.clone())
        })
    }

    pub fn reject_approval(&self, tool_call_id: &str, reason: &str) -> bool {
        self.route(tool_call_id, |bridge| bridge.reject_approval(tool_call_id, reason))
    }

    pub fn report_frontend_success(&self, tool_call_id: &str, result: serde_json::Value) -> bool {
        self.route(tool_call_id, |bridge| {
            bridge.report_frontend_success(tool_call_id, result.clone())
        })
    }

    pub fn report_frontend_error(&self, tool_call_id: &str, message: &str) -> bool {
        self.route(tool_call_id, |bridge| {
            bridge.report_frontend_error(tool_call_id, message)
        })
    }

    /// Abort every registered turn and empty the registry.
    pub async fn abort_all(&self, reason: &str) {
        let turns: Vec<Turn> = self
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, turn)| turn)
            .collect();
        for turn in turns {
            turn.abort(reason).await;
        }
    }
}
