//! The `Tool` trait and `AgentTool`, a tool built from a closure.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use super::arguments::ToolArguments;
use super::types::{AgentToolParameters, ToolDefinition};
use crate::context::{self, TurnContext};
use crate::error::{Result, TurnError};

/// Per-call data handed to [`Tool::execute`].
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Context of the calling agent; wins over the ambient one.
    pub turn: Option<TurnContext>,
    pub metadata: serde_json::Value,
}

impl ToolExecutionContext {
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            ..Self::default()
        }
    }

    pub fn with_turn(mut self, turn: TurnContext) -> Self {
        self.turn = Some(turn);
        self
    }

    /// The explicit context, else the ambient one, else `ContextMissing`.
    pub fn turn_context(&self) -> Result<TurnContext> {
        if let Some(turn) = &self.turn {
            return Ok(turn.clone());
        }
        context::current().ok_or_else(|| {
            TurnError::context_missing(format!("tool '{}' must run inside a turn", self.tool_name))
        })
    }
}

/// A capability the model can call during a turn.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &AgentToolParameters;

    /// Declaration advertised to the model runtime.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<serde_json::Value>;
}

type Handler =
    dyn Fn(ToolArguments, ToolExecutionContext) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync;

/// Tool whose behavior is a closure; used for every built-in.
#[derive(Clone)]
pub struct AgentTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    handler: Arc<Handler>,
}

impl AgentTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| handler(args, ctx).boxed()),
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<serde_json::Value> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{run_in_turn, AgentFrame, TurnIdentity};
    use serde_json::json;

    fn turn() -> TurnContext {
        let identity = TurnIdentity::builder()
            .session_id("s")
            .workspace_id("w")
            .tab_id("t")
            .request_id("req-ambient")
            .build();
        TurnContext::new(identity, AgentFrame::master("master", 3))
    }

    #[tokio::test]
    async fn turn_context_falls_back_to_ambient() {
        let ctx = ToolExecutionContext::new("c1", "probe");
        assert!(matches!(ctx.turn_context(), Err(TurnError::ContextMissing(_))));

        let found = run_in_turn(turn(), async { ctx.turn_context().map(|t| t.request_id().to_string()) })
            .await
            .unwrap();
        assert_eq!(found, "req-ambient");
    }

    #[test]
    fn definition_carries_the_schema() {
        let tool = AgentTool::new(
            "echo",
            "Echo the input",
            AgentToolParameters::object().string("text", "Text to echo", true).build(),
            |args, _ctx| async move { Ok(json!({ "text": args.get_str("text")? })) },
        );
        let definition = tool.definition();
        assert_eq!(definition.name, "echo");
        assert_eq!(definition.parameters["required"], json!(["text"]));
    }
}
