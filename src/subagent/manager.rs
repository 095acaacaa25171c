//! Owner of every sub-agent spawned during one turn.
//!
//! Bookkeeping lives behind a single async mutex; agent execution runs in a
//! worker task per agent, outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::executor::{AgentExecutor, AgentExecutors, AgentRunRequest, ConversationEntry};
use super::record::{QueuedInput, StatusUpdate, SubAgentRecord};
use super::{
    AgentStatus, AgentStatusReport, RunOutcome, SpawnRequest, SubAgentState, WaitEntry,
    WaitResult, WaitStatus,
};
use crate::config::{InterruptPolicy, RuntimeConfig};
use crate::context::{run_in_turn, TurnContext};
use crate::error::{Result, TurnError};
use crate::events::UiEventPayload;

#[derive(Default)]
struct Registry {
    active: HashMap<String, SubAgentRecord>,
    /// Closed agents that can still be resumed.
    retained: HashMap<String, SubAgentRecord>,
}

impl Registry {
    fn evict_expired(&mut self, retention: Duration) {
        let expired: Vec<String> = self
            .retained
            .iter()
            .filter(|(_, record)| {
                record
                    .closed_at
                    .is_some_and(|closed_at| closed_at.elapsed() >= retention)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(mut record) = self.retained.remove(&id) {
                if let Some(worker) = record.worker.take() {
                    worker.abort();
                }
                tracing::debug!(agent_id = %id, "evicted closed sub-agent");
            }
        }
    }

    fn find(&self, agent_id: &str) -> Option<&SubAgentRecord> {
        self.active
            .get(agent_id)
            .or_else(|| self.retained.get(agent_id))
    }

    /// The record a worker of `epoch` may still update.
    fn find_for_worker(&mut self, agent_id: &str, epoch: u64) -> Option<&mut SubAgentRecord> {
        if self.active.get(agent_id).is_some_and(|r| r.epoch == epoch) {
            return self.active.get_mut(agent_id);
        }
        self.retained
            .get_mut(agent_id)
            .filter(|record| record.epoch == epoch)
    }
}

struct Shared {
    registry: Mutex<Registry>,
    executors: AgentExecutors,
    config: Arc<RuntimeConfig>,
    root: CancellationToken,
}

/// Spawns, feeds, waits on, closes and resumes sub-agents.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct SubAgentManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SubAgentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgentManager")
            .field("executors", &self.shared.executors)
            .field("aborted", &self.shared.root.is_cancelled())
            .finish()
    }
}

impl SubAgentManager {
    /// `root` is the owning turn's cancellation token.
    pub fn new(executors: AgentExecutors, config: Arc<RuntimeConfig>, root: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                executors,
                config,
                root,
            }),
        }
    }

    async fn registry(&self) -> MutexGuard<'_, Registry> {
        let mut registry = self.shared.registry.lock().await;
        registry.evict_expired(self.shared.config.sub_agent_retention());
        registry
    }

    fn ensure_live(&self) -> Result<()> {
        if self.shared.root.is_cancelled() {
            return Err(TurnError::TurnAborted("turn is no longer running".into()));
        }
        Ok(())
    }

    fn ensure_capacity(&self, registry: &Registry) -> Result<()> {
        let max = self.shared.config.max_active_sub_agents;
        if registry.active.len() >= max {
            return Err(TurnError::InvalidState(format!(
                "sub-agent limit reached ({max} active)"
            )));
        }
        Ok(())
    }

    /// Start a sub-agent on `request.task` and return its id immediately.
    pub async fn spawn(&self, request: SpawnRequest, parent: &TurnContext) -> Result<String> {
        self.ensure_live()?;
        let agent_id = Uuid::new_v4().to_string();
        let context = parent.derive_for_sub_agent(&request.name, agent_id.clone())?;
        let agent_type = request
            .agent_type
            .unwrap_or_else(|| AgentExecutors::DEFAULT_TYPE.to_string());
        let executor = self.shared.executors.resolve(&agent_type);

        let mut registry = self.registry().await;
        self.ensure_capacity(&registry)?;

        let mut record = SubAgentRecord::new(
            agent_id.clone(),
            request.name.clone(),
            agent_type.clone(),
            request.task.clone(),
            request.parent_message_id,
            context,
            executor,
            self.shared.root.child_token(),
        );
        record.queue.push_back(QueuedInput {
            submission_id: Uuid::new_v4().to_string(),
            message: request.task.clone(),
        });

        parent.writer_or_detached().emit(UiEventPayload::SubAgentSpawned {
            agent_id: agent_id.clone(),
            name: request.name.clone(),
            agent_type: agent_type.clone(),
            task: request.task,
        });
        record.worker = Some(self.start_worker(&record));
        registry.active.insert(agent_id.clone(), record);

        tracing::debug!(
            request_id = parent.request_id(),
            agent_id = %agent_id,
            name = %request.name,
            agent_type = %agent_type,
            "sub-agent spawned"
        );
        Ok(agent_id)
    }

    fn start_worker(&self, record: &SubAgentRecord) -> JoinHandle<()> {
        tokio::spawn(run_worker(
            self.shared.clone(),
            record.agent_id.clone(),
            record.epoch,
            record.wake.clone(),
            record.stop.clone(),
        ))
    }

    /// Queue `message` for a live agent and return its submission id.
    ///
    /// With `interrupt`, the in-flight run is canceled first; what happens to
    /// inputs queued before this one follows [`InterruptPolicy`].
    pub async fn send_input(&self, agent_id: &str, message: &str, interrupt: bool) -> Result<String> {
        self.ensure_live()?;
        let mut registry = self.registry().await;
        let record = registry
            .active
            .get_mut(agent_id)
            .ok_or_else(|| TurnError::AgentNotFound(agent_id.to_string()))?;

        if interrupt {
            record.generation.cancel();
            if self.shared.config.interrupt_policy == InterruptPolicy::DiscardQueued {
                let dropped = record.queue.len();
                record.queue.clear();
                if dropped > 0 {
                    tracing::debug!(agent_id, dropped, "interrupt discarded queued inputs");
                }
            }
        }

        let submission_id = Uuid::new_v4().to_string();
        record.queue.push_back(QueuedInput {
            submission_id: submission_id.clone(),
            message: message.to_string(),
        });
        record.touch();
        record.set_state(SubAgentState::Running);
        record.wake.notify_one();
        tracing::debug!(agent_id, submission_id = %submission_id, interrupt, "sub-agent input queued");
        Ok(submission_id)
    }

    /// Block until every listed agent is waiting for input or closed, the
    /// timeout elapses, or the turn is aborted.
    ///
    /// `None` uses the configured default; every timeout is clamped to the
    /// configured maximum. Agents keep running after a timeout.
    pub async fn wait(&self, agent_ids: &[String], timeout: Option<Duration>) -> WaitResult {
        let config = &self.shared.config;
        let timeout = timeout
            .unwrap_or_else(|| config.default_wait_timeout())
            .min(config.max_wait_timeout());
        let deadline = Instant::now() + timeout;

        let receivers: Vec<(String, Option<watch::Receiver<StatusUpdate>>)> = {
            let registry = self.registry().await;
            agent_ids
                .iter()
                .map(|id| (id.clone(), registry.find(id).map(SubAgentRecord::subscribe)))
                .collect()
        };

        let (timed_out, aborted) = if self.shared.root.is_cancelled() {
            (false, true)
        } else {
            let mut pending: FuturesUnordered<_> = receivers
                .iter()
                .filter_map(|(_, rx)| rx.clone())
                .map(|mut rx| async move {
                    // A dropped sender means the agent was evicted: settled.
                    let _ = rx.wait_for(|update| update.status.is_settled()).await;
                })
                .collect();
            let all_settled = async { while pending.next().await.is_some() {} };

            tokio::select! {
                biased;
                _ = self.shared.root.cancelled() => (false, true),
                result = tokio::time::timeout_at(deadline, all_settled) => (result.is_err(), false),
            }
        };

        let agents: Vec<WaitEntry> = receivers
            .into_iter()
            .map(|(agent_id, rx)| match rx {
                Some(rx) => {
                    let update = rx.borrow().clone();
                    WaitEntry {
                        agent_id,
                        status: update.status,
                        outcome: update.outcome,
                    }
                }
                None => WaitEntry {
                    agent_id,
                    status: AgentStatus::NotFound,
                    outcome: None,
                },
            })
            .collect();

        let status = if aborted {
            WaitStatus::Aborted
        } else {
            let settled = agents.iter().filter(|a| a.status.is_settled()).count();
            if settled == agents.len() {
                WaitStatus::Completed
            } else if settled > 0 {
                WaitStatus::Partial
            } else {
                WaitStatus::Incomplete
            }
        };
        if timed_out {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                status = %status,
                "wait on sub-agents timed out"
            );
        }

        WaitResult {
            status,
            timed_out,
            agents,
        }
    }

    /// Ask an agent to stop. Returns immediately; unknown ids report
    /// `not_found` and closing twice reports `closed` again.
    pub async fn close(&self, agent_id: &str) -> AgentStatus {
        let mut registry = self.registry().await;
        if let Some(mut record) = registry.active.remove(agent_id) {
            close_record(&mut record);
            registry.retained.insert(agent_id.to_string(), record);
            tracing::debug!(agent_id, "sub-agent closed");
            return AgentStatus::Closed;
        }
        if registry.retained.contains_key(agent_id) {
            return AgentStatus::Closed;
        }
        AgentStatus::NotFound
    }

    /// Reactivate a closed agent with its conversation intact.
    ///
    /// A live agent's status is returned unchanged. Fails with
    /// `AgentNotFound` once the agent has been evicted.
    pub async fn resume(&self, agent_id: &str) -> Result<AgentStatus> {
        self.ensure_live()?;
        let mut registry = self.registry().await;
        if let Some(record) = registry.active.get(agent_id) {
            return Ok(record.state.into());
        }
        if !registry.retained.contains_key(agent_id) {
            return Err(TurnError::AgentNotFound(agent_id.to_string()));
        }
        self.ensure_capacity(&registry)?;
        let Some(mut record) = registry.retained.remove(agent_id) else {
            return Err(TurnError::AgentNotFound(agent_id.to_string()));
        };

        if let Some(previous) = record.worker.take() {
            previous.abort();
        }
        record.epoch += 1;
        record.stop = self.shared.root.child_token();
        record.generation = record.stop.child_token();
        record.wake = Arc::new(Notify::new());
        record.closed_at = None;
        record.set_state(SubAgentState::Running);
        record.worker = Some(self.start_worker(&record));
        registry.active.insert(agent_id.to_string(), record);

        tracing::debug!(agent_id, "sub-agent resumed");
        Ok(AgentStatus::Running)
    }

    pub async fn status(&self, agent_id: &str) -> AgentStatus {
        self.registry()
            .await
            .find(agent_id)
            .map_or(AgentStatus::NotFound, |record| record.state.into())
    }

    pub async fn report(&self, agent_id: &str) -> Option<AgentStatusReport> {
        self.registry().await.find(agent_id).map(SubAgentRecord::report)
    }

    /// Conversation recorded so far for an active or retained agent.
    pub async fn history(&self, agent_id: &str) -> Option<Vec<ConversationEntry>> {
        self.registry()
            .await
            .find(agent_id)
            .map(|record| record.history.clone())
    }

    /// Every known agent, oldest first.
    pub async fn list(&self) -> Vec<AgentStatusReport> {
        let registry = self.registry().await;
        let mut reports: Vec<AgentStatusReport> = registry
            .active
            .values()
            .chain(registry.retained.values())
            .map(SubAgentRecord::report)
            .collect();
        reports.sort_by_key(|report| report.created_at);
        reports
    }

    pub async fn active_count(&self) -> usize {
        self.registry().await.active.len()
    }

    /// Stop every agent: cancel waits, signal workers, give them `grace`
    /// to exit, then abort the rest. Returns how many were force-aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.shared.root.cancel();
        let workers: Vec<JoinHandle<()>> = {
            let mut registry = self.shared.registry.lock().await;
            let active: Vec<String> = registry.active.keys().cloned().collect();
            for id in active {
                if let Some(mut record) = registry.active.remove(&id) {
                    close_record(&mut record);
                    registry.retained.insert(id, record);
                }
            }
            registry
                .retained
                .values_mut()
                .filter_map(|record| record.worker.take())
                .collect()
        };
        if workers.is_empty() {
            return 0;
        }

        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, futures::future::join_all(workers))
            .await
            .is_ok()
        {
            return 0;
        }
        let forced = aborts.iter().filter(|handle| !handle.is_finished()).count();
        for handle in &aborts {
            handle.abort();
        }
        tracing::warn!(
            forced,
            grace_ms = grace.as_millis() as u64,
            "sub-agent workers did not stop in time; aborted"
        );
        forced
    }
}

fn close_record(record: &mut SubAgentRecord) {
    record.stop.cancel();
    record.queue.clear();
    record.closed_at = Some(Instant::now());
    record.set_state(SubAgentState::Closed);
}

struct Job {
    request: AgentRunRequest,
    executor: Arc<dyn AgentExecutor>,
    cancel: CancellationToken,
}

async fn run_worker(
    shared: Arc<Shared>,
    agent_id: String,
    epoch: u64,
    wake: Arc<Notify>,
    stop: CancellationToken,
) {
    loop {
        let job = {
            let mut registry = shared.registry.lock().await;
            let Some(record) = registry.find_for_worker(&agent_id, epoch) else {
                break;
            };
            if stop.is_cancelled() || record.state == SubAgentState::Closed {
                break;
            }
            match record.queue.pop_front() {
                Some(input) => {
                    record.generation = stop.child_token();
                    record.set_state(SubAgentState::Running);
                    Some(Job {
                        request: AgentRunRequest {
                            agent_id: record.agent_id.clone(),
                            name: record.name.clone(),
                            agent_type: record.agent_type.clone(),
                            submission_id: input.submission_id,
                            input: input.message,
                            history: record.history.clone(),
                            context: record.context.clone(),
                            writer: record.writer(),
                        },
                        executor: record.executor.clone(),
                        cancel: record.generation.clone(),
                    })
                }
                None => {
                    record.set_state(SubAgentState::WaitingForInput);
                    None
                }
            }
        };

        let Some(job) = job else {
            tokio::select! {
                _ = wake.notified() => continue,
                _ = stop.cancelled() => break,
            }
        };

        let submission_id = job.request.submission_id.clone();
        let input = job.request.input.clone();
        let context = job.request.context.clone();
        let result = run_in_turn(context, job.executor.execute(job.request, job.cancel.clone())).await;

        let outcome = if job.cancel.is_cancelled() {
            RunOutcome::Interrupted
        } else {
            match result {
                Ok(output) => RunOutcome::Completed {
                    output: output.output,
                },
                Err(err) => {
                    tracing::warn!(agent_id = %agent_id, error = %err, "sub-agent run failed");
                    RunOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            }
        };

        let mut registry = shared.registry.lock().await;
        let Some(record) = registry.find_for_worker(&agent_id, epoch) else {
            break;
        };
        record.history.push(ConversationEntry::user(input, submission_id));
        if let RunOutcome::Completed { output } = &outcome {
            record.history.push(ConversationEntry::agent(output.clone()));
        }
        record.last_outcome = Some(outcome);
        record.touch();
        if record.state != SubAgentState::Closed {
            if record.queue.is_empty() {
                record.set_state(SubAgentState::WaitingForInput);
            } else {
                record.publish();
            }
        }
    }
    tracing::debug!(agent_id = %agent_id, epoch, "sub-agent worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AgentFrame, TurnIdentity};
    use crate::subagent::ScriptedExecutor;

    fn manager(config: RuntimeConfig) -> (SubAgentManager, TurnContext, CancellationToken) {
        let root = CancellationToken::new();
        let executors = AgentExecutors::new(Arc::new(
            ScriptedExecutor::builder()
                .steps(1)
                .step_delay(Duration::from_millis(10))
                .build(),
        ));
        let identity = TurnIdentity::builder()
            .session_id("s")
            .workspace_id("w")
            .tab_id("t")
            .request_id("r")
            .build();
        let ctx = TurnContext::new(identity, AgentFrame::master("master", config.max_depth));
        (
            SubAgentManager::new(executors, Arc::new(config), root.clone()),
            ctx,
            root,
        )
    }

    fn spawn_request(name: &str) -> SpawnRequest {
        SpawnRequest::builder().task("task").name(name).build()
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_agent_settles_waiting_for_input() {
        let (manager, ctx, _root) = manager(RuntimeConfig::default());
        let id = manager.spawn(spawn_request("research"), &ctx).await.unwrap();

        let result = manager.wait(&[id.clone()], Some(Duration::from_secs(1))).await;
        assert_eq!(result.status, WaitStatus::Completed);
        assert!(!result.timed_out);
        assert_eq!(result.agents[0].status, AgentStatus::WaitingForInput);
        assert!(matches!(result.agents[0].outcome, Some(RunOutcome::Completed { .. })));
        assert_eq!(manager.history(&id).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn active_limit_is_enforced() {
        let config = RuntimeConfig {
            max_active_sub_agents: 1,
            ..RuntimeConfig::default()
        };
        let (manager, ctx, _root) = manager(config);
        manager.spawn(spawn_request("a"), &ctx).await.unwrap();
        let err = manager.spawn(spawn_request("b"), &ctx).await.unwrap_err();
        assert!(matches!(err, TurnError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn send_input_to_closed_agent_is_not_found() {
        let (manager, ctx, _root) = manager(RuntimeConfig::default());
        let id = manager.spawn(spawn_request("a"), &ctx).await.unwrap();
        assert_eq!(manager.close(&id).await, AgentStatus::Closed);
        assert_eq!(manager.close(&id).await, AgentStatus::Closed);

        let err = manager.send_input(&id, "more", false).await.unwrap_err();
        assert!(matches!(err, TurnError::AgentNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_with_empty_list_completes_immediately() {
        let (manager, _ctx, _root) = manager(RuntimeConfig::default());
        let result = manager.wait(&[], None).await;
        assert_eq!(result.status, WaitStatus::Completed);
        assert!(!result.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_after_abort_are_rejected() {
        let (manager, ctx, root) = manager(RuntimeConfig::default());
        root.cancel();
        assert!(matches!(
            manager.spawn(spawn_request("a"), &ctx).await,
            Err(TurnError::TurnAborted(_))
        ));
        assert_eq!(manager.wait(&["x".to_string()], None).await.status, WaitStatus::Aborted);
    }
}
