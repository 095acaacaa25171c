//! Configuration system (layered: defaults > TOML file > env).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Result, TurnError};

/// What `send_input(interrupt = true)` does with inputs that were queued but
/// not yet picked up by the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InterruptPolicy {
    /// Cancel the in-flight generation and drop every queued input.
    #[default]
    DiscardQueued,
    /// Cancel the in-flight generation; queued inputs run before the new one.
    KeepQueued,
}

/// Runtime limits and timeouts for a turn.
///
/// Resolution order:
/// 1. Built-in defaults
/// 2. TOML file (`load` / `from_toml_str`)
/// 3. Environment variables (`apply_env_with`, `.env` honored)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub approval_ttl_ms: u64,
    pub frontend_tool_ttl_ms: u64,
    pub default_wait_timeout_ms: u64,
    pub max_wait_timeout_ms: u64,
    pub max_depth: usize,
    pub max_active_sub_agents: usize,
    /// How long a closed sub-agent stays resumable before eviction.
    pub sub_agent_retention_ms: u64,
    pub shutdown_grace_ms: u64,
    pub interrupt_policy: InterruptPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            approval_ttl_ms: 300_000,
            frontend_tool_ttl_ms: 60_000,
            default_wait_timeout_ms: 300_000,
            max_wait_timeout_ms: 1_800_000,
            max_depth: 3,
            max_active_sub_agents: 8,
            sub_agent_retention_ms: 600_000,
            shutdown_grace_ms: 2_000,
            interrupt_policy: InterruptPolicy::DiscardQueued,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with environment variables (`.env` loaded if present).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a TOML document; missing fields keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| TurnError::Configuration(format!("invalid config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then overlay the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Load from [`default_path`](Self::default_path) when it exists, else env-only.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Self::from_env(),
        }
    }

    /// Platform config location (`<config dir>/agent-turn/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "agent-turn", "agent-turn")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Overlay `AGENT_TURN_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay values from a key lookup (the process environment in production).
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis: [(&str, &mut u64); 6] = [
            ("AGENT_TURN_APPROVAL_TTL_MS", &mut self.approval_ttl_ms),
            ("AGENT_TURN_FRONTEND_TTL_MS", &mut self.frontend_tool_ttl_ms),
            ("AGENT_TURN_WAIT_TIMEOUT_MS", &mut self.default_wait_timeout_ms),
            ("AGENT_TURN_MAX_WAIT_TIMEOUT_MS", &mut self.max_wait_timeout_ms),
            ("AGENT_TURN_RETENTION_MS", &mut self.sub_agent_retention_ms),
            ("AGENT_TURN_SHUTDOWN_GRACE_MS", &mut self.shutdown_grace_ms),
        ];
        for (key, slot) in millis {
            if let Some(raw) = lookup(key) {
                *slot = parse_env(key, &raw)?;
            }
        }
        if let Some(raw) = lookup("AGENT_TURN_MAX_DEPTH") {
            self.max_depth = parse_env("AGENT_TURN_MAX_DEPTH", &raw)?;
        }
        if let Some(raw) = lookup("AGENT_TURN_MAX_SUB_AGENTS") {
            self.max_active_sub_agents = parse_env("AGENT_TURN_MAX_SUB_AGENTS", &raw)?;
        }
        if let Some(raw) = lookup("AGENT_TURN_INTERRUPT_POLICY") {
            self.interrupt_policy = parse_env("AGENT_TURN_INTERRUPT_POLICY", &raw)?;
        }
        self.validate()
    }

    /// Reject configurations that would make a suspension point unbounded or
    /// forbid every agent.
    pub fn validate(&self) -> Result<()> {
        if self.approval_ttl_ms == 0 || self.frontend_tool_ttl_ms == 0 {
            return Err(TurnError::Configuration(
                "pending operation TTLs must be greater than zero".into(),
            ));
        }
        if self.default_wait_timeout_ms == 0 || self.max_wait_timeout_ms == 0 {
            return Err(TurnError::Configuration(
                "wait timeouts must be greater than zero".into(),
            ));
        }
        if self.default_wait_timeout_ms > self.max_wait_timeout_ms {
            return Err(TurnError::Configuration(format!(
                "default_wait_timeout_ms ({}) exceeds max_wait_timeout_ms ({})",
                self.default_wait_timeout_ms, self.max_wait_timeout_ms
            )));
        }
        if self.max_depth == 0 {
            return Err(TurnError::Configuration(
                "max_depth must be at least 1 (the master agent)".into(),
            ));
        }
        if self.max_active_sub_agents == 0 {
            return Err(TurnError::Configuration(
                "max_active_sub_agents must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| TurnError::Configuration(format!("failed to serialize config: {e}")))
    }

    pub fn approval_ttl(&self) -> Duration {
        Duration::from_millis(self.approval_ttl_ms)
    }

    pub fn frontend_tool_ttl(&self) -> Duration {
        Duration::from_millis(self.frontend_tool_ttl_ms)
    }

    pub fn default_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.default_wait_timeout_ms)
    }

    pub fn max_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.max_wait_timeout_ms)
    }

    pub fn sub_agent_retention(&self) -> Duration {
        Duration::from_millis(self.sub_agent_retention_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| TurnError::Configuration(format!("invalid value for {key}: '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.interrupt_policy, InterruptPolicy::DiscardQueued);
        assert_eq!(config.approval_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn toml_overrides_only_listed_fields() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            max_depth = 5
            interrupt_policy = "keep_queued"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_depth, 5);
        assert_eq!(config.interrupt_policy, InterruptPolicy::KeepQueued);
        assert_eq!(config.approval_ttl_ms, RuntimeConfig::default().approval_ttl_ms);
    }

    #[test]
    fn env_overlay_wins_over_file_values() {
        let mut config = RuntimeConfig::from_toml_str("approval_ttl_ms = 1000").unwrap();
        config
            .apply_env_with(lookup_from(&[
                ("AGENT_TURN_APPROVAL_TTL_MS", "2500"),
                ("AGENT_TURN_MAX_SUB_AGENTS", "2"),
                ("AGENT_TURN_INTERRUPT_POLICY", "keep_queued"),
            ]))
            .unwrap();

        assert_eq!(config.approval_ttl_ms, 2500);
        assert_eq!(config.max_active_sub_agents, 2);
        assert_eq!(config.interrupt_policy, InterruptPolicy::KeepQueued);
    }

    #[test]
    fn malformed_env_value_is_a_configuration_error() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_env_with(lookup_from(&[("AGENT_TURN_MAX_DEPTH", "deep")]))
            .unwrap_err();
        assert!(matches!(err, TurnError::Configuration(_)));
    }

    #[test]
    fn validate_rejects_default_wait_above_max() {
        let err = RuntimeConfig::from_toml_str(
            "default_wait_timeout_ms = 10\nmax_wait_timeout_ms = 5",
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn validate_rejects_zero_ttl_and_depth() {
        assert!(RuntimeConfig::from_toml_str("approval_ttl_ms = 0").is_err());
        assert!(RuntimeConfig::from_toml_str("max_depth = 0").is_err());
    }

    #[test]
    fn validate_rejects_zero_active_sub_agents() {
        let err = RuntimeConfig::from_toml_str("max_active_sub_agents = 0").unwrap_err();
        assert!(matches!(err, TurnError::Configuration(_)));
        assert!(err.to_string().contains("max_active_sub_agents"));
    }

    #[test]
    fn written_file_round_trips_through_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut original = RuntimeConfig::default();
        original.shutdown_grace_ms = 750;
        std::fs::write(&path, original.to_toml_string().unwrap()).unwrap();

        let loaded = RuntimeConfig::from_toml_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = RuntimeConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, TurnError::Io(_)));
    }
}
