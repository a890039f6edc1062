use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    #[default]
    Exponential,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}

/// Availability of an agent as reported by its owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Available,
    Busy,
    Offline,
}

/// An agent as seen by the router. Owned by the caller; never mutated by
/// the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    /// Current load, 0.0 (idle) to 1.0 (saturated).
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub policies: BTreeSet<String>,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            skills: BTreeSet::new(),
            load: 0.0,
            policies: BTreeSet::new(),
            status: AgentStatus::Available,
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.load = load;
        self
    }

    pub fn with_policies<I, S>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies = policies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.contains(skill)
    }
}

/// A unit of work to be routed to an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub required_skill: Option<String>,
    #[serde(default)]
    pub disallowed_policies: BTreeSet<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Correlates log lines for one routing decision across components.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl Task {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn requiring(mut self, skill: impl Into<String>) -> Self {
        self.required_skill = Some(skill.into());
        self
    }

    pub fn disallowing<I, S>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disallowed_policies = policies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// The caller's correlation id, or a fresh one.
    pub fn correlation_id_or_new(&self) -> String {
        self.correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Features handed to a learned scorer for one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreRequest {
    pub agent_id: String,
    pub task: Task,
    pub load: f64,
}

/// Outcome of a routed task, fed back to the scorer.
#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    pub agent_id: String,
    pub task: Task,
    pub result: bool,
}

/// Per-agent routing outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failure: u64,
}

impl AgentMetrics {
    pub fn record(&mut self, success: bool) {
        if success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure
    }
}

/// Agent id to outcome counters; the persisted metrics document.
pub type RoutingMetrics = BTreeMap<String, AgentMetrics>;

/// What the execution engine hands a step implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRequest {
    pub step_id: String,
    pub action: String,
    /// 1-based attempt number within the step's retry policy.
    pub attempt: u32,
    /// Declared input name to source (`workflow_input` or `step.output`).
    pub inputs: BTreeMap<String, String>,
}

/// Measured runtime and cost, reported by a step or summed over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub runtime: f64,
    pub cost: f64,
}

impl Usage {
    pub fn new(runtime: f64, cost: f64) -> Self {
        Self { runtime, cost }
    }

    /// Read `{runtime, cost}` out of a step's output. Any other shape
    /// reports nothing.
    pub fn from_output(output: &serde_json::Value) -> Option<Self> {
        let obj = output.as_object()?;
        let runtime = obj.get("runtime")?.as_f64()?;
        let cost = obj.get("cost")?.as_f64()?;
        Some(Self { runtime, cost })
    }

    pub fn to_output(self) -> serde_json::Value {
        serde_json::json!({ "runtime": self.runtime, "cost": self.cost })
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.runtime += rhs.runtime;
        self.cost += rhs.cost;
    }
}
