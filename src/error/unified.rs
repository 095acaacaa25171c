//! Unified error classification and structured tool failures.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Ambient turn data is missing or a structural limit was hit.
    Wiring,
    NotFound,
    Timeout,
    Rejected,
    Aborted,
    InvalidInput,
    InvalidState,
    Configuration,
    Serialization,
    Execution,
}

/// Machine-readable failure kind surfaced to the model runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    ContextMissing,
    RecursionDepthExceeded,
    NotAllowed,
    NotFound,
    Timeout,
    Rejected,
    Aborted,
    InvalidArgument,
    InvalidState,
    Execution,
}

/// Structured tool failure returned to the orchestrating agent.
///
/// Timeouts and rejections carry distinct kinds so the agent can decide
/// whether to retry, ask again, or give up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
    pub retryable: bool,
}

impl ToolFailure {
    pub fn new(kind: ToolFailureKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// JSON body placed in the tool result.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
                "retryable": self.retryable,
            }
        })
    }
}
