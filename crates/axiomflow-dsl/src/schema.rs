use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use axiomflow_core::error::{AxiomError, Result};
use axiomflow_core::types::{BackoffStrategy, Usage};

use crate::graph::Dag;

/// Fields every `workflow:` section must declare.
pub const REQUIRED_FIELDS: [&str; 6] = ["name", "version", "personas", "steps", "edges", "gates"];

/// Typed form of a workflow document.
///
/// ```yaml
/// workflow:
///   name: release
///   version: "1.0.0"
///   inputs:
///     - name: repo
///       type: string
///       required: true
///   personas:
///     - id: dev
///       capabilities: [code]
///   steps:
///     - id: build
///       persona: dev
///       action: compile
///       inputs:
///         source: repo
///       outputs:
///         artifact: string
///       retry:
///         max_attempts: 3
///         backoff_strategy: exponential
///       estimated_runtime: 1.0
///       estimated_cost: 10.0
///   edges:
///     - from: build
///       to: publish
///   gates: []
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,
    pub personas: Vec<Persona>,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    pub gates: Vec<Gate>,
}

impl Workflow {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Dependency graph over this workflow's steps and edges.
    pub fn dag(&self) -> Dag {
        Dag::new(self.steps.iter().map(|s| s.id.as_str()), &self.edges)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub name: String,
    #[serde(rename = "type", default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub persona: String,
    #[serde(default)]
    pub action: String,
    /// Input name to source: a workflow input name or `step_id.output_name`.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Output name to declared type.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Gate ids checked before this step runs.
    #[serde(default)]
    pub gates: Vec<String>,
    #[serde(default)]
    pub retry: Option<RetrySpec>,
    #[serde(default)]
    pub estimated_cpu: Option<f64>,
    #[serde(default)]
    pub estimated_memory: Option<f64>,
    #[serde(default)]
    pub estimated_runtime: Option<f64>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
}

impl Step {
    /// Parsed input sources, in input-name order.
    pub fn input_sources(&self) -> impl Iterator<Item = (&str, InputSource<'_>)> {
        self.inputs
            .iter()
            .map(|(name, raw)| (name.as_str(), InputSource::parse(raw)))
    }

    pub fn resource_estimate(&self) -> ResourceEstimate {
        ResourceEstimate {
            cpu: self.estimated_cpu.unwrap_or(0.0),
            memory: self.estimated_memory.unwrap_or(0.0),
        }
    }

    pub fn estimate(&self) -> Usage {
        Usage::new(
            self.estimated_runtime.unwrap_or(0.0),
            self.estimated_cost.unwrap_or(0.0),
        )
    }
}

/// Where a step input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource<'a> {
    WorkflowInput(&'a str),
    StepOutput { step: &'a str, output: &'a str },
}

impl<'a> InputSource<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.split_once('.') {
            Some((step, output)) => InputSource::StepOutput { step, output },
            None => InputSource::WorkflowInput(raw),
        }
    }
}

/// A step's retry block as written in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySpec {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Kept as written so validation can name the offending value.
    #[serde(default)]
    pub backoff_strategy: Option<String>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

impl RetrySpec {
    /// The validated strategy. Only meaningful after parsing succeeded.
    pub fn strategy(&self) -> Result<BackoffStrategy> {
        let raw = self.backoff_strategy.as_deref().unwrap_or("");
        raw.parse()
            .map_err(|s| AxiomError::Config(format!("invalid backoff strategy '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Pre-flight check referenced by steps. Evaluated outside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub id: String,
    #[serde(rename = "type", default)]
    pub gate_type: String,
    #[serde(default)]
    pub conditions: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub cpu: f64,
    pub memory: f64,
}

/// A validated workflow plus everything derived from it at parse time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedWorkflow {
    pub workflow: Workflow,
    pub resource_estimates: BTreeMap<String, ResourceEstimate>,
    pub estimates: Usage,
    /// Present only when parsed in dry-run mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<Vec<String>>,
}

impl ParsedWorkflow {
    /// Recompute a topological order from the step and edge data.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        self.workflow.dag().topological_order()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}
