//! agent-turn: the runtime behind one assistant turn.
//!
//! A turn carries a request's identity and mutable state to every tool call
//! running inside it, owns the sub-agents those calls spawn, and suspends
//! tool calls that need a human approval or a client-side action until the
//! answer arrives or a timeout fires.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use agent_turn::prelude::*;
//!
//! # async fn example() -> agent_turn::error::Result<()> {
//! let identity = TurnIdentity::builder()
//!     .session_id("s-1")
//!     .workspace_id("w-1")
//!     .tab_id("t-1")
//!     .request_id("r-1")
//!     .build();
//! let (channel, _events) = MpscChannel::new();
//! let executors = AgentExecutors::new(Arc::new(ScriptedExecutor::default()));
//! let turn = Turn::start(identity, Arc::new(channel), executors, RuntimeConfig::from_env()?);
//!
//! let results = turn
//!     .run(turn.dispatcher().execute_all(vec![ToolCall::new(
//!         "call-1",
//!         "spawn_agent",
//!         serde_json::json!({ "task": "summarize the docs", "name": "research" }),
//!     )]))
//!     .await?;
//! println!("{}", results[0].result);
//! turn.finish().await;
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod pending;
pub mod prelude;
pub mod subagent;
pub mod tools;
pub mod turn;

#[cfg(feature = "cli")]
pub mod cli;
