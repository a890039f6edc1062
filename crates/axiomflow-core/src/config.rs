use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AxiomError, Result};
use crate::types::BackoffStrategy;

/// Prefix for environment variables that override file settings.
pub const ENV_PREFIX: &str = "ORCHESTRATOR_";

/// Top-level AxiomFlow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Settings consumed read-only by the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum seconds a single workflow run may take.
    #[serde(default = "default_workflow_timeout")]
    pub workflow_timeout: u64,
    /// Agent used when a caller has no better choice.
    #[serde(default = "default_agent")]
    pub default_agent: String,
    /// Ordered task-type to agent pins.
    #[serde(default)]
    pub routing_policies: Vec<RoutingPolicy>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workflow_timeout: default_workflow_timeout(),
            default_agent: default_agent(),
            routing_policies: vec![],
            api_key: None,
        }
    }
}

/// Route every task of type `task` to `agent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub task: String,
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Retry policy applied to steps that declare none.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Deadline for a whole context handoff.
    #[serde(default = "default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,
    /// JSON document holding per-agent routing outcomes.
    #[serde(default)]
    pub metrics_path: Option<String>,
    /// Agents allowed to receive context handoffs.
    #[serde(default)]
    pub allowed_recipients: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            handoff_timeout_ms: default_handoff_timeout_ms(),
            metrics_path: None,
            allowed_recipients: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: BackoffStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_workflow_timeout() -> u64 {
    300
}

fn default_agent() -> String {
    "coder".to_string()
}

fn default_handoff_timeout_ms() -> u64 {
    200
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    1000
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion and
    /// `ORCHESTRATOR_*` overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AxiomError::ConfigNotFound(path.display().to_string()))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text after expanding `${ENV_VAR}` references.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| AxiomError::Config(e.to_string()))
    }

    /// Apply `ORCHESTRATOR_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, keyed by full variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(raw) = var("WORKFLOW_TIMEOUT") {
            self.orchestrator.workflow_timeout = raw.trim().parse().map_err(|_| {
                AxiomError::Config(format!(
                    "{}WORKFLOW_TIMEOUT is not an integer: {}",
                    ENV_PREFIX, raw
                ))
            })?;
        }
        if let Some(agent) = var("DEFAULT_AGENT") {
            self.orchestrator.default_agent = agent;
        }
        if let Some(key) = var("API_KEY") {
            self.orchestrator.api_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.workflow_timeout == 0 {
            return Err(AxiomError::Config(
                "orchestrator.workflow_timeout must be greater than 0".into(),
            ));
        }
        if self.runtime.retry.max_attempts == 0 {
            return Err(AxiomError::Config(
                "runtime.retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The agent pinned for a task type, if any policy names it.
    pub fn policy_for(&self, task_type: &str) -> Option<&str> {
        self.orchestrator
            .routing_policies
            .iter()
            .find(|p| p.task == task_type)
            .map(|p| p.agent.as_str())
    }
}

/// Shared, explicitly reloadable configuration.
///
/// Components take an `Arc<AppConfig>` snapshot at construction time;
/// `reload` and `reset` only affect snapshots taken afterwards.
pub struct ConfigHandle {
    source: Option<PathBuf>,
    current: RwLock<Arc<AppConfig>>,
}

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self {
            source: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Load from a file and remember the path for later reloads.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = AppConfig::load_or_default(&path)?;
        Ok(Self {
            source: Some(path),
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn get(&self) -> Arc<AppConfig> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-read the source file. Handles built with `new` keep their config.
    pub fn reload(&self) -> Result<Arc<AppConfig>> {
        let Some(path) = &self.source else {
            return Ok(self.get());
        };
        let fresh = Arc::new(AppConfig::load_or_default(path)?);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = fresh.clone();
        Ok(fresh)
    }

    /// Replace the current config outright.
    pub fn reset(&self, config: AppConfig) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_AXIOMFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_AXIOMFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_AXIOMFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_AXIOMFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_AXIOMFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.orchestrator.workflow_timeout, 300);
        assert_eq!(config.orchestrator.default_agent, "coder");
        assert!(config.orchestrator.routing_policies.is_empty());
        assert!(config.orchestrator.api_key.is_none());
        assert_eq!(config.runtime.retry.max_attempts, 3);
        assert_eq!(config.runtime.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.runtime.handoff_timeout_ms, 200);
    }

    #[test]
    fn test_routing_policies_keep_order() {
        let config = AppConfig::from_toml_str(
            r#"
[orchestrator]
workflow_timeout = 60

[[orchestrator.routing_policies]]
task = "review"
agent = "reviewer"

[[orchestrator.routing_policies]]
task = "review"
agent = "backup-reviewer"
"#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.routing_policies.len(), 2);
        assert_eq!(config.policy_for("review"), Some("reviewer"));
        assert_eq!(config.policy_for("deploy"), None);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("ORCHESTRATOR_WORKFLOW_TIMEOUT", "42"),
            ("ORCHESTRATOR_DEFAULT_AGENT", "planner"),
            ("ORCHESTRATOR_API_KEY", "sk-env"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.orchestrator.workflow_timeout, 42);
        assert_eq!(config.orchestrator.default_agent, "planner");
        assert_eq!(config.orchestrator.api_key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn test_bad_timeout_override() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|k| (k == "ORCHESTRATOR_WORKFLOW_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, AxiomError::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = AppConfig::from_toml_str("[orchestrator]\nworkflow_timeout = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(AxiomError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/axiomflow.toml")).unwrap_err();
        assert!(matches!(err, AxiomError::ConfigNotFound(_)));
    }

    #[test]
    fn test_handle_reload_and_reset() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "[orchestrator]\ndefault_agent = \"first\"\n").unwrap();

        let handle = ConfigHandle::open(tmp.path()).unwrap();
        let before = handle.get();
        assert_eq!(before.orchestrator.default_agent, "first");

        std::fs::write(tmp.path(), "[orchestrator]\ndefault_agent = \"second\"\n").unwrap();
        handle.reload().unwrap();
        assert_eq!(handle.get().orchestrator.default_agent, "second");
        // Earlier snapshots are untouched
        assert_eq!(before.orchestrator.default_agent, "first");

        handle.reset(AppConfig::default());
        assert_eq!(handle.get().orchestrator.default_agent, "coder");
    }
}
