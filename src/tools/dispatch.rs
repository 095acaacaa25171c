//! Concurrent execution of one batch of tool calls inside a turn.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::{ToolCall, ToolCallResult, ToolDefinition};
use crate::context::{run_in_turn, TurnContext};
use crate::error::TurnError;
use crate::events::UiEventPayload;

/// Runs tool calls for one agent, surfacing failures as structured results.
#[derive(Clone)]
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
    context: TurnContext,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.tool_names())
            .field("request_id", &self.context.request_id())
            .finish()
    }
}

impl ToolDispatcher {
    pub fn new(tools: Vec<Arc<dyn Tool>>, context: TurnContext) -> Self {
        let tools = tools
            .into_iter()
            .map(|tool| (tool.name().to_string(), tool))
            .collect();
        Self { tools, context }
    }

    /// Add or replace a tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Same tools, running as another agent (e.g. inside a sub-agent).
    pub fn for_context(&self, context: TurnContext) -> Self {
        Self {
            tools: self.tools.clone(),
            context,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Declarations of every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|tool| tool.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn context(&self) -> &TurnContext {
        &self.context
    }

    /// Execute `calls` concurrently. Results come back in call order; a
    /// failure never prevents the other calls from completing.
    pub async fn execute_all(&self, calls: Vec<ToolCall>) -> Vec<ToolCallResult> {
        let runs = calls.into_iter().map(|call| self.execute_one(call));
        run_in_turn(self.context.clone(), join_all(runs)).await
    }

    async fn execute_one(&self, call: ToolCall) -> ToolCallResult {
        let writer = self.context.writer_or_detached();
        writer.emit(UiEventPayload::ToolCallStarted {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args: call.arguments.clone(),
        });

        let outcome = match self.tools.get(&call.name) {
            Some(tool) => {
                let ctx = ToolExecutionContext::new(call.id.clone(), call.name.clone())
                    .with_turn(self.context.clone());
                tool.execute(&ToolArguments::new(call.arguments), &ctx).await
            }
            None => Err(TurnError::InvalidArgument(format!(
                "unknown tool '{}'",
                call.name
            ))),
        };

        let (result, is_error) = match outcome {
            Ok(value) => (value, false),
            Err(err) => {
                if err.is_wiring() {
                    tracing::warn!(
                        request_id = self.context.request_id(),
                        tool_call_id = %call.id,
                        tool_name = %call.name,
                        error = %err,
                        "tool call aborted by wiring error"
                    );
                } else {
                    tracing::debug!(
                        tool_call_id = %call.id,
                        tool_name = %call.name,
                        error = %err,
                        "tool call failed"
                    );
                }
                (err.to_tool_failure().to_value(), true)
            }
        };

        writer.emit(UiEventPayload::ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: result.clone(),
            is_error,
        });
        ToolCallResult {
            tool_call_id: call.id,
            tool_name: call.name,
            result,
            is_error,
        }
    }
}
