//! Human approval and frontend-executed tool calls.
//!
//! [`ToolApprovalBridge`] turns a tool call that needs an out-of-band answer
//! into an awaitable, TTL-bounded completion keyed by the tool call id.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::context::TurnContext;
use crate::error::{Result, TurnError};
use crate::events::UiEventPayload;
use crate::pending::{PendingOperationRegistry, PendingOutcome};

/// Approval request type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    CommandExecution,
    FileChange,
    Other,
}

/// An approval request shown to the user. `id` is the tool call id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub kind: ApprovalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Approval decision for a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Accept,
    AcceptForSession,
    Decline,
    Cancel,
}

impl ApprovalDecision {
    pub fn is_accept(self) -> bool {
        matches!(self, Self::Accept | Self::AcceptForSession)
    }
}

/// The user's answer to an [`ApprovalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalResponse {
    pub decision: ApprovalDecision,
    /// Edited payload; absent means "approve as requested".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ApprovalResponse {
    pub fn accept() -> Self {
        Self {
            decision: ApprovalDecision::Accept,
            payload: None,
        }
    }

    pub fn accept_with(payload: serde_json::Value) -> Self {
        Self {
            decision: ApprovalDecision::Accept,
            payload: Some(payload),
        }
    }

    pub fn decline() -> Self {
        Self {
            decision: ApprovalDecision::Decline,
            payload: None,
        }
    }
}

/// Outcome reported by the client after executing a frontend tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FrontendReport {
    Success(serde_json::Value),
    Error(String),
}

/// Suspends tool calls until a human or the client UI answers.
#[derive(Debug, Clone)]
pub struct ToolApprovalBridge {
    approvals: PendingOperationRegistry<ApprovalResponse>,
    frontend: PendingOperationRegistry<FrontendReport>,
    config: Arc<RuntimeConfig>,
    abort: CancellationToken,
    abort_reason: Arc<Mutex<Option<String>>>,
}

impl ToolApprovalBridge {
    /// `abort` is the owning turn's cancellation token.
    pub fn new(config: Arc<RuntimeConfig>, abort: CancellationToken) -> Self {
        Self {
            approvals: PendingOperationRegistry::new("approval"),
            frontend: PendingOperationRegistry::new("frontend_tool"),
            config,
            abort,
            abort_reason: Arc::default(),
        }
    }

    /// Ask for approval and suspend until answered.
    ///
    /// Returns the approved payload: the response's payload when present,
    /// otherwise the payload recorded with the request.
    pub async fn await_approval(
        &self,
        ctx: &TurnContext,
        request: ApprovalRequest,
    ) -> Result<serde_json::Value> {
        if self.abort.is_cancelled() {
            return Err(TurnError::TurnAborted(
                "turn aborted before approval was requested".into(),
            ));
        }

        let key = request.id.clone();
        let ttl = self.config.approval_ttl();
        let handle = self.approvals.create_or_await(&key, ttl);
        if handle.is_new() {
            ctx.set_approval_payload(key.clone(), request.payload.clone());
            tracing::debug!(
                request_id = ctx.request_id(),
                tool_call_id = %key,
                tool_name = %request.tool_name,
                "approval requested"
            );
            ctx.writer_or_detached().emit(UiEventPayload::ApprovalRequired {
                request: request.clone(),
            });
        }

        let outcome = tokio::select! {
            biased;
            outcome = handle.wait() => outcome,
            _ = self.abort.cancelled() => PendingOutcome::Canceled(self.abort_reason()),
        };
        let recorded = ctx.take_approval_payload(&key).unwrap_or(request.payload);

        match outcome {
            PendingOutcome::Resolved(response) if response.decision.is_accept() => {
                Ok(response.payload.filter(|p| !p.is_null()).unwrap_or(recorded))
            }
            PendingOutcome::Resolved(response) => {
                let reason = match response.decision {
                    ApprovalDecision::Cancel => "approval canceled by user",
                    _ => "approval declined by user",
                };
                Err(TurnError::rejected(key, reason))
            }
            PendingOutcome::Rejected(reason) => Err(TurnError::rejected(key, reason)),
            PendingOutcome::TimedOut => Err(TurnError::timeout(key, ttl)),
            PendingOutcome::Canceled(reason) => Err(TurnError::TurnAborted(reason)),
        }
    }

    /// Ask the client to run a tool and suspend until it reports back.
    pub async fn execute_on_frontend(
        &self,
        ctx: &TurnContext,
        tool_call_id: &str,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if self.abort.is_cancelled() {
            return Err(TurnError::TurnAborted(
                "turn aborted before frontend tool was requested".into(),
            ));
        }

        let ttl = self.config.frontend_tool_ttl();
        let handle = self.frontend.create_or_await(tool_call_id, ttl);
        if handle.is_new() {
            tracing::debug!(
                request_id = ctx.request_id(),
                tool_call_id,
                tool_name,
                "frontend tool requested"
            );
            ctx.writer_or_detached()
                .emit(UiEventPayload::FrontendToolRequested {
                    tool_call_id: tool_call_id.to_string(),
                    tool_name: tool_name.to_string(),
                    args,
                });
        }

        let outcome = tokio::select! {
            biased;
            outcome = handle.wait() => outcome,
            _ = self.abort.cancelled() => PendingOutcome::Canceled(self.abort_reason()),
        };
        match outcome {
            PendingOutcome::Resolved(FrontendReport::Success(value)) => Ok(value),
            PendingOutcome::Resolved(FrontendReport::Error(message)) => {
                Err(TurnError::rejected(tool_call_id, message))
            }
            PendingOutcome::Rejected(reason) => Err(TurnError::rejected(tool_call_id, reason)),
            PendingOutcome::TimedOut => Err(TurnError::timeout(tool_call_id, ttl)),
            PendingOutcome::Canceled(reason) => Err(TurnError::TurnAborted(reason)),
        }
    }

    pub fn resolve_approval(&self, tool_call_id: &str, response: ApprovalResponse) -> bool {
        self.approvals.resolve(tool_call_id, response)
    }

    pub fn reject_approval(&self, tool_call_id: &str, reason: impl Into<String>) -> bool {
        self.approvals.reject(tool_call_id, reason)
    }

    pub fn report_frontend_success(&self, tool_call_id: &str, result: serde_json::Value) -> bool {
        self.frontend
            .resolve(tool_call_id, FrontendReport::Success(result))
    }

    pub fn report_frontend_error(&self, tool_call_id: &str, message: impl Into<String>) -> bool {
        self.frontend
            .resolve(tool_call_id, FrontendReport::Error(message.into()))
    }

    /// Record why the turn is being aborted and cancel everything pending
    /// with that reason. Call before firing the abort token.
    pub fn abort(&self, reason: &str) -> usize {
        *self
            .abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
        self.cancel_all(reason)
    }

    fn abort_reason(&self) -> String {
        self.abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "turn aborted".to_string())
    }

    /// Settle every outstanding approval and frontend call as canceled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        self.approvals.cancel_all(reason) + self.frontend.cancel_all(reason)
    }

    pub fn has_pending(&self, tool_call_id: &str) -> bool {
        self.approvals.contains(tool_call_id) || self.frontend.contains(tool_call_id)
    }

    pub fn pending_approvals(&self) -> Vec<String> {
        self.approvals.keys()
    }

    pub fn pending_frontend_calls(&self) -> Vec<String> {
        self.frontend.keys()
    }
}
