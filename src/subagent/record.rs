use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::executor::{AgentExecutor, ConversationEntry};
use super::{AgentStatus, AgentStatusReport, RunOutcome, SubAgentState};
use crate::context::TurnContext;
use crate::events::{UiEventPayload, UiWriter};

/// Published on every state change; `wait` subscribes to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusUpdate {
    pub status: AgentStatus,
    pub outcome: Option<RunOutcome>,
}

#[derive(Debug, Clone)]
pub(crate) struct QueuedInput {
    pub submission_id: String,
    pub message: String,
}

pub(crate) struct SubAgentRecord {
    pub agent_id: String,
    pub name: String,
    pub agent_type: String,
    pub task: String,
    pub parent_message_id: Option<String>,
    pub state: SubAgentState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub last_outcome: Option<RunOutcome>,
    pub history: Vec<ConversationEntry>,
    pub queue: VecDeque<QueuedInput>,
    pub context: TurnContext,
    pub executor: Arc<dyn AgentExecutor>,
    /// Permit-style wakeup for the worker when input is queued.
    pub wake: Arc<Notify>,
    /// Stops the worker; child of the turn's root token.
    pub stop: CancellationToken,
    /// Cancels the in-flight run only; child of `stop`.
    pub generation: CancellationToken,
    /// Bumped on resume so a previous worker can no longer touch the record.
    pub epoch: u64,
    pub status_tx: watch::Sender<StatusUpdate>,
    pub worker: Option<JoinHandle<()>>,
    pub closed_at: Option<Instant>,
}

impl SubAgentRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: String,
        name: String,
        agent_type: String,
        task: String,
        parent_message_id: Option<String>,
        context: TurnContext,
        executor: Arc<dyn AgentExecutor>,
        stop: CancellationToken,
    ) -> Self {
        let now = Utc::now();
        let (status_tx, _) = watch::channel(StatusUpdate {
            status: AgentStatus::Spawned,
            outcome: None,
        });
        Self {
            agent_id,
            name,
            agent_type,
            task,
            parent_message_id,
            state: SubAgentState::Spawned,
            created_at: now,
            last_activity_at: now,
            last_outcome: None,
            history: Vec::new(),
            queue: VecDeque::new(),
            context,
            executor,
            wake: Arc::new(Notify::new()),
            generation: stop.child_token(),
            stop,
            epoch: 0,
            status_tx,
            worker: None,
            closed_at: None,
        }
    }

    pub fn writer(&self) -> UiWriter {
        self.context.writer_or_detached()
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Transition and publish. Returns false when already in `state`.
    pub fn set_state(&mut self, state: SubAgentState) -> bool {
        if self.state == state {
            return false;
        }
        tracing::debug!(
            request_id = self.context.request_id(),
            agent_id = %self.agent_id,
            from = %self.state,
            to = %state,
            "sub-agent state change"
        );
        self.state = state;
        self.touch();
        self.publish();
        true
    }

    /// Push the current status to watchers and the UI channel.
    pub fn publish(&self) {
        let update = StatusUpdate {
            status: self.state.into(),
            outcome: self.last_outcome.clone(),
        };
        self.writer().emit(UiEventPayload::SubAgentStatus {
            agent_id: self.agent_id.clone(),
            status: update.status,
            outcome: update.outcome.clone(),
        });
        self.status_tx.send_replace(update);
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    pub fn report(&self) -> AgentStatusReport {
        AgentStatusReport {
            agent_id: self.agent_id.clone(),
            name: self.name.clone(),
            agent_type: self.agent_type.clone(),
            status: self.state.into(),
            parent_message_id: self.parent_message_id.clone(),
            task: self.task.clone(),
            last_outcome: self.last_outcome.clone(),
            queued_inputs: self.queue.len(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }
}
