//! Sub-agent lifecycle: spawn, feed input, wait, interrupt, close, resume.

pub mod executor;
pub mod manager;
mod record;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use executor::{
    AgentExecutor, AgentExecutors, AgentRunOutput, AgentRunRequest, ConversationEntry,
    ConversationRole, ScriptedExecutor,
};
pub use manager::SubAgentManager;

/// Lifecycle state of a sub-agent.
///
/// `spawned -> running <-> waiting_for_input -> closed`; `closed` is left only
/// through `resume`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubAgentState {
    Spawned,
    Running,
    WaitingForInput,
    Closed,
}

/// Status reported to callers; adds `not_found` for unknown ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    Spawned,
    Running,
    WaitingForInput,
    Closed,
    NotFound,
}

impl AgentStatus {
    /// Whether a `wait` on this agent is satisfied.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::WaitingForInput | Self::Closed | Self::NotFound)
    }
}

impl From<SubAgentState> for AgentStatus {
    fn from(state: SubAgentState) -> Self {
        match state {
            SubAgentState::Spawned => Self::Spawned,
            SubAgentState::Running => Self::Running,
            SubAgentState::WaitingForInput => Self::WaitingForInput,
            SubAgentState::Closed => Self::Closed,
        }
    }
}

/// Result of the most recent run of a sub-agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { output: String },
    Failed { error: String },
    Interrupted,
}

/// Parameters for [`SubAgentManager::spawn`].
#[derive(Debug, Clone, bon::Builder, Serialize, Deserialize)]
pub struct SpawnRequest {
    #[builder(into)]
    pub task: String,
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub agent_type: Option<String>,
    #[builder(into)]
    pub parent_message_id: Option<String>,
}

/// Read-only view of one sub-agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatusReport {
    pub agent_id: String,
    pub name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<RunOutcome>,
    pub queued_inputs: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Aggregate outcome of a `wait` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WaitStatus {
    /// Every listed agent settled.
    Completed,
    /// Some, not all, settled before the timeout.
    Partial,
    /// None settled before the timeout.
    Incomplete,
    /// The turn was aborted while waiting.
    Aborted,
}

/// Per-agent entry of a [`WaitResult`], in request order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitEntry {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitResult {
    pub status: WaitStatus,
    pub timed_out: bool,
    pub agents: Vec<WaitEntry>,
}

impl WaitResult {
    pub fn entry(&self, agent_id: &str) -> Option<&WaitEntry> {
        self.agents.iter().find(|entry| entry.agent_id == agent_id)
    }
}
