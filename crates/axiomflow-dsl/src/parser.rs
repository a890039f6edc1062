use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::{debug, error};

use axiomflow_core::error::{AxiomError, Result, ValidationError};
use axiomflow_core::types::{BackoffStrategy, Usage};

use crate::schema::{InputSource, ParsedWorkflow, ResourceEstimate, Workflow, REQUIRED_FIELDS};

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Attach a deterministic `execution_order` to the result.
    pub dry_run: bool,
}

/// Parser for workflow DSL documents (YAML, or JSON as a YAML subset).
///
/// Validation runs as a fixed sequence of gates; the first failing gate
/// aborts the parse and no partial result is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> Result<ParsedWorkflow> {
        self.parse_with(text, ParseOptions::default())
    }

    pub fn parse_with(&self, text: &str, options: ParseOptions) -> Result<ParsedWorkflow> {
        debug!("Parsing workflow DSL");
        let document: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| {
            error!(error = %e, "Workflow syntax error");
            AxiomError::Syntax(e.to_string())
        })?;

        let workflow = extract_workflow(document).map_err(reject)?;
        validate_references(&workflow).map_err(reject)?;
        validate_retry(&workflow).map_err(reject)?;
        validate_inputs(&workflow).map_err(reject)?;
        validate_acyclic(&workflow).map_err(reject)?;

        let resource_estimates = estimate_step_resources(&workflow);
        let estimates = estimate_totals(&workflow);
        let execution_order = if options.dry_run {
            Some(workflow.dag().topological_order()?)
        } else {
            None
        };

        debug!(
            workflow = %workflow.name,
            steps = workflow.steps.len(),
            runtime = estimates.runtime,
            cost = estimates.cost,
            "Workflow parsed successfully"
        );
        Ok(ParsedWorkflow {
            workflow,
            resource_estimates,
            estimates,
            execution_order,
        })
    }
}

/// Load and validate a workflow definition from disk.
pub fn parse_workflow_file(path: impl AsRef<Path>, dry_run: bool) -> Result<ParsedWorkflow> {
    let text = std::fs::read_to_string(path.as_ref())?;
    WorkflowParser::new().parse_with(&text, ParseOptions { dry_run })
}

fn reject(err: ValidationError) -> AxiomError {
    error!(error = %err, "Workflow validation failed");
    AxiomError::Validation(err)
}

/// Structural gate: a `workflow` mapping carrying every required field.
fn extract_workflow(document: serde_yaml::Value) -> std::result::Result<Workflow, ValidationError> {
    let serde_yaml::Value::Mapping(mut root) = document else {
        return Err(ValidationError::MissingWorkflowSection);
    };
    let section = root
        .remove("workflow")
        .ok_or(ValidationError::MissingWorkflowSection)?;
    let serde_yaml::Value::Mapping(fields) = &section else {
        return Err(ValidationError::Schema("workflow section must be a mapping".into()));
    };

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|f| !fields.contains_key(**f))
        .map(|f| f.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing));
    }

    serde_yaml::from_value(section).map_err(|e| ValidationError::Schema(e.to_string()))
}

/// Referential integrity: unique step ids, known personas and gates, and
/// edges between declared steps.
fn validate_references(workflow: &Workflow) -> std::result::Result<(), ValidationError> {
    let personas: HashSet<&str> = workflow.personas.iter().map(|p| p.id.as_str()).collect();
    let gates: HashSet<&str> = workflow.gates.iter().map(|g| g.id.as_str()).collect();
    let mut seen = HashSet::new();

    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(ValidationError::DuplicateStep(step.id.clone()));
        }
        if !personas.contains(step.persona.as_str()) {
            return Err(ValidationError::UnknownPersona {
                step: step.id.clone(),
                persona: step.persona.clone(),
            });
        }
        if let Some(gate) = step.gates.iter().find(|g| !gates.contains(g.as_str())) {
            return Err(ValidationError::UnknownGate {
                step: step.id.clone(),
                gate: gate.clone(),
            });
        }
    }

    if let Some(ghost) = workflow.dag().undeclared().next() {
        return Err(ValidationError::UnknownEdgeEndpoint(ghost.to_string()));
    }
    Ok(())
}

fn validate_retry(workflow: &Workflow) -> std::result::Result<(), ValidationError> {
    for step in &workflow.steps {
        let Some(retry) = &step.retry else { continue };
        let raw = retry.backoff_strategy.as_deref().unwrap_or_default();
        if raw.parse::<BackoffStrategy>().is_err() {
            return Err(ValidationError::InvalidBackoffStrategy {
                step: step.id.clone(),
                strategy: raw.to_string(),
            });
        }
        if retry.max_attempts == 0 {
            return Err(ValidationError::Schema(format!(
                "retry.max_attempts must be at least 1 in step '{}'",
                step.id
            )));
        }
    }
    Ok(())
}

/// Input satisfaction: a `step.output` reference must name an upstream step
/// (by the edge graph) that declares that output; a bare name must be a
/// declared workflow input.
fn validate_inputs(workflow: &Workflow) -> std::result::Result<(), ValidationError> {
    let declared_inputs: HashSet<&str> = workflow.inputs.iter().map(|i| i.name.as_str()).collect();
    let dag = workflow.dag();

    for step in &workflow.steps {
        let upstream = dag.ancestors(&step.id);
        for raw in step.inputs.values() {
            let satisfied = match InputSource::parse(raw) {
                InputSource::WorkflowInput(name) => declared_inputs.contains(name),
                InputSource::StepOutput { step: producer, output } => {
                    upstream.contains(producer)
                        && workflow
                            .step(producer)
                            .is_some_and(|p| p.outputs.contains_key(output))
                }
            };
            if !satisfied {
                return Err(ValidationError::UnsatisfiedInput {
                    step: step.id.clone(),
                    reference: raw.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_acyclic(workflow: &Workflow) -> std::result::Result<(), ValidationError> {
    debug!("Checking workflow edges for cycles");
    match workflow.dag().find_cycle() {
        Some(node) => Err(ValidationError::CircularDependency(node.to_string())),
        None => Ok(()),
    }
}

fn estimate_step_resources(workflow: &Workflow) -> BTreeMap<String, ResourceEstimate> {
    workflow
        .steps
        .iter()
        .map(|s| (s.id.clone(), s.resource_estimate()))
        .collect()
}

fn estimate_totals(workflow: &Workflow) -> Usage {
    let mut total = Usage::default();
    for step in &workflow.steps {
        total += step.estimate();
    }
    total
}
