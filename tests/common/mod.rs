//! Shared test helpers: recording channel, turn setup and test executors.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agent_turn::config::RuntimeConfig;
use agent_turn::context::TurnIdentity;
use agent_turn::error::{Result, TurnError};
use agent_turn::events::{UiEvent, UiEventChannel, UiEventPayload};
use agent_turn::subagent::{AgentExecutor, AgentExecutors, AgentRunOutput, AgentRunRequest};
use agent_turn::turn::Turn;

pub fn identity(request_id: &str) -> TurnIdentity {
    TurnIdentity::builder()
        .session_id(format!("session-{request_id}"))
        .workspace_id("workspace")
        .tab_id("tab")
        .request_id(request_id)
        .build()
}

/// Channel that keeps every event for later inspection.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<UiEvent>>>,
}

impl UiEventChannel for EventLog {
    fn write(&self, event: UiEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventLog {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn for_agent(&self, agent_id: &str) -> Vec<UiEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.source.agent_id == agent_id)
            .collect()
    }

    pub fn progress_count(&self, agent_id: &str) -> usize {
        self.for_agent(agent_id)
            .iter()
            .filter(|event| matches!(event.payload, UiEventPayload::Progress { .. }))
            .count()
    }
}

pub fn start_turn(request_id: &str, config: RuntimeConfig, executors: AgentExecutors) -> (Turn, EventLog) {
    let log = EventLog::default();
    let turn = Turn::start(identity(request_id), Arc::new(log.clone()), executors, config);
    (turn, log)
}

/// One observed run: the input and how much history preceded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRun {
    pub input: String,
    pub history_len: usize,
}

/// Records every run it starts; each run takes `delay` unless canceled.
#[derive(Clone)]
pub struct RecordingExecutor {
    runs: Arc<Mutex<Vec<ObservedRun>>>,
    delay: Duration,
}

impl RecordingExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            runs: Arc::new(Mutex::new(Vec::new())),
            delay,
        }
    }

    pub fn runs(&self) -> Vec<ObservedRun> {
        self.runs.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.runs().into_iter().map(|run| run.input).collect()
    }
}

#[async_trait]
impl AgentExecutor for RecordingExecutor {
    async fn execute(&self, request: AgentRunRequest, cancel: CancellationToken) -> Result<AgentRunOutput> {
        self.runs.lock().unwrap().push(ObservedRun {
            input: request.input.clone(),
            history_len: request.history.len(),
        });
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(AgentRunOutput {
                output: format!("done: {}", request.input),
            }),
            _ = cancel.cancelled() => Err(TurnError::TurnAborted("interrupted".into())),
        }
    }
}

/// Ignores cancellation entirely.
pub struct StubbornExecutor {
    pub delay: Duration,
}

#[async_trait]
impl AgentExecutor for StubbornExecutor {
    async fn execute(&self, request: AgentRunRequest, _cancel: CancellationToken) -> Result<AgentRunOutput> {
        tokio::time::sleep(self.delay).await;
        Ok(AgentRunOutput {
            output: request.input,
        })
    }
}

pub fn recording(delay: Duration) -> (AgentExecutors, RecordingExecutor) {
    let executor = RecordingExecutor::new(delay);
    (AgentExecutors::new(Arc::new(executor.clone())), executor)
}

pub fn assert_elapsed_about(elapsed: Duration, expected: Duration) {
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(10),
        "elapsed {elapsed:?}, expected about {expected:?}"
    );
}
