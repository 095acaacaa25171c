//! Tools whose result comes from outside the server: a human approval or the
//! client UI.

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::AgentToolParameters;
use crate::approval::{ApprovalKind, ApprovalRequest, ToolApprovalBridge};
use crate::error::TurnError;

/// Suspends until a human approves the call, then returns the approved
/// payload. Runs no business logic of its own.
#[derive(Debug, Clone)]
pub struct ApprovalGatedTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    kind: ApprovalKind,
    bridge: ToolApprovalBridge,
}

impl ApprovalGatedTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        kind: ApprovalKind,
        bridge: ToolApprovalBridge,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            kind,
            bridge,
        }
    }
}

#[async_trait]
impl Tool for ApprovalGatedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, TurnError> {
        let turn = ctx.turn_context()?;
        let request = ApprovalRequest {
            id: ctx.tool_call_id.clone(),
            tool_name: self.name.clone(),
            kind: self.kind,
            reason: args.get_str_opt("reason").map(str::to_string),
            payload: args.raw().clone(),
        };
        let approved = self.bridge.await_approval(&turn, request).await?;
        Ok(serde_json::json!({ "approved": true, "payload": approved }))
    }
}

/// Forwards the call to the client UI and returns what it reports.
#[derive(Debug, Clone)]
pub struct FrontendTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    bridge: ToolApprovalBridge,
}

impl FrontendTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        bridge: ToolApprovalBridge,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            bridge,
        }
    }
}

#[async_trait]
impl Tool for FrontendTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, TurnError> {
        let turn = ctx.turn_context()?;
        self.bridge
            .execute_on_frontend(&turn, &ctx.tool_call_id, &self.name, args.raw().clone())
            .await
    }
}
