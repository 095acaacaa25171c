//! Seam to the model runtime that actually runs an agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::context::TurnContext;
use crate::error::{Result, TurnError};
use crate::events::UiWriter;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Agent,
}

/// One message in a sub-agent's conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationEntry {
    pub role: ConversationRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn user(content: impl Into<String>, submission_id: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::User,
            content: content.into(),
            submission_id: Some(submission_id.into()),
            at: Utc::now(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::Agent,
            content: content.into(),
            submission_id: None,
            at: Utc::now(),
        }
    }
}

/// Everything an executor needs for one run.
#[derive(Debug, Clone)]
pub struct AgentRunRequest {
    pub agent_id: String,
    pub name: String,
    pub agent_type: String,
    pub submission_id: String,
    pub input: String,
    /// Conversation before `input`.
    pub history: Vec<ConversationEntry>,
    pub context: TurnContext,
    /// Writer tagged with this sub-agent's identity.
    pub writer: UiWriter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunOutput {
    pub output: String,
}

/// Runs one agent generation.
///
/// Implementations should return promptly once `cancel` fires; the manager
/// records the run as interrupted regardless of what is returned.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        request: AgentRunRequest,
        cancel: CancellationToken,
    ) -> Result<AgentRunOutput>;
}

/// Executors keyed by agent type, with a fallback.
#[derive(Clone)]
pub struct AgentExecutors {
    default: Arc<dyn AgentExecutor>,
    by_type: HashMap<String, Arc<dyn AgentExecutor>>,
}

impl AgentExecutors {
    pub const DEFAULT_TYPE: &'static str = "default";

    pub fn new(default: Arc<dyn AgentExecutor>) -> Self {
        Self {
            default,
            by_type: HashMap::new(),
        }
    }

    pub fn with(mut self, agent_type: impl Into<String>, executor: Arc<dyn AgentExecutor>) -> Self {
        self.by_type.insert(agent_type.into(), executor);
        self
    }

    pub fn resolve(&self, agent_type: &str) -> Arc<dyn AgentExecutor> {
        self.by_type
            .get(agent_type)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn agent_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.by_type.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for AgentExecutors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentExecutors")
            .field("agent_types", &self.agent_types())
            .finish()
    }
}

/// Deterministic executor: emits `steps` progress events `step_delay` apart,
/// waits `finish_delay`, then answers (or fails with `fail_with`).
#[derive(Debug, Clone, Builder)]
pub struct ScriptedExecutor {
    #[builder(default = 3)]
    steps: usize,
    #[builder(default = Duration::from_millis(500))]
    step_delay: Duration,
    #[builder(default = Duration::ZERO)]
    finish_delay: Duration,
    #[builder(into)]
    fail_with: Option<String>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ScriptedExecutor {
    async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(TurnError::TurnAborted("generation interrupted".into())),
        }
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        request: AgentRunRequest,
        cancel: CancellationToken,
    ) -> Result<AgentRunOutput> {
        for step in 1..=self.steps {
            Self::pause(self.step_delay, &cancel).await?;
            request
                .writer
                .progress(format!("{}: step {step}/{}", request.name, self.steps));
        }
        Self::pause(self.finish_delay, &cancel).await?;

        if let Some(error) = &self.fail_with {
            return Err(TurnError::Executor(error.clone()));
        }
        Ok(AgentRunOutput {
            output: format!(
                "{} finished '{}' after {} prior messages",
                request.name,
                request.input,
                request.history.len()
            ),
        })
    }
}
