//! Convenience re-exports.

pub use crate::approval::{
    ApprovalDecision, ApprovalKind, ApprovalRequest, ApprovalResponse, ToolApprovalBridge,
};
pub use crate::config::{InterruptPolicy, RuntimeConfig};
pub use crate::context::plan::{PlanItem, PlanPatch, PlanSnapshot, PlanStatus};
pub use crate::context::{current, require, run_in_turn, spawn_in_turn, AgentFrame, TurnContext, TurnIdentity};
pub use crate::error::{Result, TurnError};
pub use crate::events::{MpscChannel, SinkChannel, UiEvent, UiEventChannel, UiEventPayload, UiWriter};
pub use crate::pending::{PendingOperationRegistry, PendingOutcome};
pub use crate::subagent::{
    AgentExecutor, AgentExecutors, AgentStatus, ScriptedExecutor, SpawnRequest, SubAgentManager,
    WaitResult, WaitStatus,
};
pub use crate::tools::{AgentTool, Tool, ToolArguments, ToolCall, ToolDispatcher, ToolExecutionContext};
pub use crate::turn::{Turn, TurnRegistry};
