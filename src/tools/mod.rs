//! Tool system for function calling.

pub mod arguments;
pub mod builtin;
pub mod dispatch;
pub mod gated;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use dispatch::ToolDispatcher;
pub use gated::{ApprovalGatedTool, FrontendTool};
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::{AgentToolParameters, ToolCall, ToolCallResult, ToolDefinition};
