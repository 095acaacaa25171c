//! CLI entry point for agent-turn.

pub mod demo;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::RuntimeConfig;
use crate::error::Result;

/// Env var holding the log filter (`tracing_subscriber::EnvFilter` syntax).
pub const LOG_ENV: &str = "AGENT_TURN_LOG";

/// agent-turn CLI
#[derive(Parser, Debug)]
#[command(name = "agent-turn", version, about = "Agent-turn runtime demo CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted turn and print every UI event as a JSON line
    Demo(DemoArgs),
    /// Print the resolved configuration as TOML
    Config(ConfigArgs),
}

/// How the demo answers its approval request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalMode {
    Approve,
    Deny,
    NoAnswer,
}

/// Arguments for `agent-turn demo`.
#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Number of sub-agents to spawn
    #[arg(long, default_value_t = 2)]
    pub agents: usize,

    /// Progress events per sub-agent
    #[arg(long, default_value_t = 3)]
    pub steps: usize,

    /// Delay between progress events in milliseconds
    #[arg(long, default_value_t = 200)]
    pub step_ms: u64,

    /// Timeout passed to the `wait` tool in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub wait_ms: u64,

    /// Approval TTL for the demo turn in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub approval_ttl_ms: u64,

    /// Approve the demo's gated tool call (default)
    #[arg(long, conflicts_with_all = ["deny", "no_answer"])]
    pub approve: bool,

    /// Decline the demo's gated tool call
    #[arg(long, conflicts_with = "no_answer")]
    pub deny: bool,

    /// Leave the approval unanswered so it times out
    #[arg(long)]
    pub no_answer: bool,
}

impl DemoArgs {
    pub fn approval_mode(&self) -> ApprovalMode {
        if self.deny {
            ApprovalMode::Deny
        } else if self.no_answer {
            ApprovalMode::NoAnswer
        } else {
            ApprovalMode::Approve
        }
    }
}

/// Arguments for `agent-turn config`.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file to load instead of the platform default
    #[arg(long)]
    pub path: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Install the global subscriber; the filter comes from `AGENT_TURN_LOG`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolve configuration for `path`, or the platform default location.
pub fn resolve_config(path: Option<&std::path::Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load(path),
        None => RuntimeConfig::load_default(),
    }
}
