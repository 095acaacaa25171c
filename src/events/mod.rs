//! UI event stream: envelope types, the channel contract, and per-agent writers.
//!
//! The core only needs `write(event)`: delivered in order per writer, no
//! acknowledgment, no backpressure. Each [`UiWriter`] stamps a monotonic
//! sequence number for its agent; events from different agents interleave in
//! arrival order.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::approval::ApprovalRequest;
use crate::context::plan::PlanSnapshot;
use crate::context::AgentKind;
use crate::subagent::{AgentStatus, RunOutcome};

/// Stream category for events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStream {
    Lifecycle,
    Assistant,
    Tool,
    Plan,
    Approval,
    SubAgent,
    System,
}

/// Turn lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnLifecycle {
    Started,
    Completed,
    Aborted { reason: String },
}

/// Which agent emitted an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventSource {
    pub agent_id: String,
    pub agent_name: String,
    pub kind: AgentKind,
}

/// Concrete event payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEventPayload {
    Lifecycle {
        state: TurnLifecycle,
    },
    AssistantDelta {
        text: String,
    },
    Progress {
        message: String,
    },
    ToolCallStarted {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
        is_error: bool,
    },
    ApprovalRequired {
        request: ApprovalRequest,
    },
    FrontendToolRequested {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    PlanUpdated {
        plan: PlanSnapshot,
    },
    SubAgentSpawned {
        agent_id: String,
        name: String,
        agent_type: String,
        task: String,
    },
    SubAgentStatus {
        agent_id: String,
        status: AgentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outcome: Option<RunOutcome>,
    },
    Error {
        message: String,
    },
}

impl UiEventPayload {
    pub fn stream(&self) -> EventStream {
        match self {
            Self::Lifecycle { .. } => EventStream::Lifecycle,
            Self::AssistantDelta { .. } | Self::Progress { .. } => EventStream::Assistant,
            Self::ToolCallStarted { .. }
            | Self::ToolResult { .. }
            | Self::FrontendToolRequested { .. } => EventStream::Tool,
            Self::ApprovalRequired { .. } => EventStream::Approval,
            Self::PlanUpdated { .. } => EventStream::Plan,
            Self::SubAgentSpawned { .. } | Self::SubAgentStatus { .. } => EventStream::SubAgent,
            Self::Error { .. } => EventStream::System,
        }
    }
}

/// Envelope delivered to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiEvent {
    pub request_id: String,
    pub source: EventSource,
    /// Monotonic per source agent, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stream: EventStream,
    pub payload: UiEventPayload,
}

/// Push interface to the client. Implementations must serialize writes.
pub trait UiEventChannel: Send + Sync {
    fn write(&self, event: UiEvent);
}

/// Callback used for streaming UI events.
pub type UiEventSink = Arc<dyn Fn(UiEvent) + Send + Sync>;

/// Channel backed by a callback; writes are serialized by a mutex.
pub struct SinkChannel {
    sink: Mutex<UiEventSink>,
}

impl SinkChannel {
    pub fn new(sink: UiEventSink) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

impl UiEventChannel for SinkChannel {
    fn write(&self, event: UiEvent) {
        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        (sink)(event);
    }
}

/// Channel backed by an unbounded queue, consumed as a stream by the transport.
#[derive(Debug, Clone)]
pub struct MpscChannel {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl MpscChannel {
    pub fn new() -> (Self, UnboundedReceiverStream<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }
}

impl UiEventChannel for MpscChannel {
    fn write(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("ui event dropped: client stream closed");
        }
    }
}

/// Discards every event. Used when a turn has no client attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullChannel;

impl UiEventChannel for NullChannel {
    fn write(&self, _event: UiEvent) {}
}

/// Per-agent handle onto the turn's channel.
///
/// Clones share the sequence counter, so all clones of one writer emit a
/// single monotonic sequence.
#[derive(Clone)]
pub struct UiWriter {
    channel: Arc<dyn UiEventChannel>,
    request_id: String,
    source: EventSource,
    seq: Arc<Mutex<u64>>,
}

impl UiWriter {
    pub fn new(
        channel: Arc<dyn UiEventChannel>,
        request_id: impl Into<String>,
        source: EventSource,
    ) -> Self {
        Self {
            channel,
            request_id: request_id.into(),
            source,
            seq: Arc::new(Mutex::new(0)),
        }
    }

    /// Writer that drops everything.
    pub fn detached(request_id: impl Into<String>, source: EventSource) -> Self {
        Self::new(Arc::new(NullChannel), request_id, source)
    }

    /// Writer on the same channel tagged with another agent's identity.
    pub fn for_source(&self, source: EventSource) -> Self {
        Self::new(self.channel.clone(), self.request_id.clone(), source)
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    /// Emit an event and return its sequence number.
    pub fn emit(&self, payload: UiEventPayload) -> u64 {
        // Holding the counter lock across the write keeps channel order equal
        // to sequence order for concurrent emitters of the same agent.
        let mut seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq += 1;
        self.channel.write(UiEvent {
            request_id: self.request_id.clone(),
            source: self.source.clone(),
            seq: *seq,
            timestamp: Utc::now(),
            stream: payload.stream(),
            payload,
        });
        *seq
    }

    pub fn progress(&self, message: impl Into<String>) -> u64 {
        self.emit(UiEventPayload::Progress {
            message: message.into(),
        })
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.emit(UiEventPayload::Error {
            message: message.into(),
        })
    }
}

impl std::fmt::Debug for UiWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiWriter")
            .field("request_id", &self.request_id)
            .field("source", &self.source)
            .finish()
    }
}
