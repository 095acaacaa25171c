//! Error types for the agent-turn runtime.

pub mod unified;

pub use unified::{ErrorCategory, ToolFailure, ToolFailureKind};

use thiserror::Error;

/// Primary error type for all turn-runtime operations.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Turn context required: {0}")]
    ContextMissing(String),

    #[error("Sub-agent recursion depth exceeded: depth {depth} > max {max_depth}")]
    RecursionDepthExceeded { depth: usize, max_depth: usize },

    #[error("Sub-agent '{0}' is not allowed from this agent")]
    SubAgentNotAllowed(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Operation '{key}' timed out after {timeout_ms}ms")]
    OperationTimeout { key: String, timeout_ms: u64 },

    #[error("Operation '{key}' rejected: {reason}")]
    OperationRejected { key: String, reason: String },

    #[error("Turn aborted: {0}")]
    TurnAborted(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Executor error: {0}")]
    Executor(String),
}

impl TurnError {
    pub fn context_missing(what: impl Into<String>) -> Self {
        Self::ContextMissing(what.into())
    }

    pub fn rejected(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OperationRejected {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(key: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::OperationTimeout {
            key: key.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ContextMissing(_)
            | Self::RecursionDepthExceeded { .. }
            | Self::SubAgentNotAllowed(_) => ErrorCategory::Wiring,
            Self::AgentNotFound(_) => ErrorCategory::NotFound,
            Self::OperationTimeout { .. } => ErrorCategory::Timeout,
            Self::OperationRejected { .. } => ErrorCategory::Rejected,
            Self::TurnAborted(_) => ErrorCategory::Aborted,
            Self::InvalidArgument(_) => ErrorCategory::InvalidInput,
            Self::InvalidState(_) => ErrorCategory::InvalidState,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) | Self::ToolExecution { .. } | Self::Executor(_) => {
                ErrorCategory::Execution
            }
        }
    }

    /// Whether the calling agent may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Timeout)
    }

    /// Context/wiring errors abort the current tool call and are never retried.
    pub fn is_wiring(&self) -> bool {
        matches!(self.category(), ErrorCategory::Wiring)
    }

    /// Convert into the structured failure surfaced to the model runtime.
    pub fn to_tool_failure(&self) -> ToolFailure {
        let kind = match self {
            Self::ContextMissing(_) => ToolFailureKind::ContextMissing,
            Self::RecursionDepthExceeded { .. } => ToolFailureKind::RecursionDepthExceeded,
            Self::SubAgentNotAllowed(_) => ToolFailureKind::NotAllowed,
            Self::AgentNotFound(_) => ToolFailureKind::NotFound,
            Self::OperationTimeout { .. } => ToolFailureKind::Timeout,
            Self::OperationRejected { .. } => ToolFailureKind::Rejected,
            Self::TurnAborted(_) => ToolFailureKind::Aborted,
            Self::InvalidArgument(_) | Self::Serialization(_) => ToolFailureKind::InvalidArgument,
            Self::InvalidState(_) | Self::Configuration(_) => ToolFailureKind::InvalidState,
            Self::Io(_) | Self::ToolExecution { .. } | Self::Executor(_) => {
                ToolFailureKind::Execution
            }
        };
        ToolFailure::new(kind, self.to_string(), self.is_retryable())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TurnError>;
