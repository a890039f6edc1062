use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use axiomflow_core::config::{AppConfig, RetryConfig};
use axiomflow_core::error::{AxiomError, Result};
use axiomflow_core::types::{StepRequest, Usage};
use axiomflow_dsl::schema::{ParsedWorkflow, Step, Workflow};

use crate::backoff::RetryPolicy;
use crate::recovery::{hooks, RecoveryError, RecoveryManager};
use crate::registry::StepRegistry;

/// Runs a parsed workflow's steps one at a time in dependency order.
///
/// Each step goes through the executor's [`RecoveryManager`] with the
/// step's own retry block, or the configured default policy. The whole
/// run is bounded by the configured workflow timeout.
pub struct WorkflowExecutor {
    recovery: RecoveryManager,
    retry_defaults: RetryConfig,
    workflow_timeout: Duration,
}

impl WorkflowExecutor {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            recovery: RecoveryManager::new(),
            retry_defaults: config.runtime.retry.clone(),
            workflow_timeout: Duration::from_secs(config.orchestrator.workflow_timeout),
        }
    }

    pub fn with_recovery(mut self, recovery: RecoveryManager) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = timeout;
        self
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// Retry policy for `step`: its own block if declared, else the default.
    pub fn policy_for(&self, step: &Step) -> Result<RetryPolicy> {
        match &step.retry {
            Some(spec) => RetryPolicy::from_spec(spec, &self.retry_defaults),
            None => Ok(RetryPolicy::from_config(&self.retry_defaults)),
        }
    }

    /// Execute every step and return the summed `{runtime, cost}` they
    /// report. A dry run computes the order and calls nothing.
    pub async fn run_workflow(
        &self,
        parsed: &ParsedWorkflow,
        registry: &StepRegistry,
        dry_run: bool,
    ) -> Result<Usage> {
        self.run_workflow_with_cancel(parsed, registry, dry_run, &CancellationToken::new())
            .await
    }

    /// Like [`run_workflow`](Self::run_workflow), also stopping when
    /// `cancel` fires. Cleanup hooks still run before this returns.
    pub async fn run_workflow_with_cancel(
        &self,
        parsed: &ParsedWorkflow,
        registry: &StepRegistry,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<Usage> {
        let workflow = &parsed.workflow;
        let order = parsed.topological_order()?;

        if dry_run {
            info!(
                workflow = %workflow.name,
                steps = order.len(),
                "Dry run, skipping step execution"
            );
            return Ok(Usage::default());
        }

        info!(workflow = %workflow.name, steps = order.len(), "Starting workflow run");
        let start = Instant::now();
        let run_cancel = cancel.child_token();
        let run = self.run_steps(workflow, &order, registry, &run_cancel);
        tokio::pin!(run);

        let result = tokio::select! {
            res = &mut run => res,
            _ = tokio::time::sleep(self.workflow_timeout) => {
                warn!(
                    workflow = %workflow.name,
                    timeout_secs = self.workflow_timeout.as_secs(),
                    "Workflow timed out, cancelling"
                );
                run_cancel.cancel();
                // Let in-flight cleanup finish before reporting
                let _ = run.await;
                Err(AxiomError::WorkflowTimeout {
                    timeout_secs: self.workflow_timeout.as_secs(),
                })
            }
        };

        match &result {
            Ok(total) => info!(
                workflow = %workflow.name,
                runtime = total.runtime,
                cost = total.cost,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Workflow completed"
            ),
            Err(e) => error!(workflow = %workflow.name, error = %e, "Workflow failed"),
        }
        result
    }

    async fn run_steps(
        &self,
        workflow: &Workflow,
        order: &[String],
        registry: &StepRegistry,
        cancel: &CancellationToken,
    ) -> Result<Usage> {
        let mut total = Usage::default();

        for step_id in order {
            let step = workflow.step(step_id).ok_or_else(|| {
                AxiomError::Execution(format!("step '{}' is not declared", step_id))
            })?;
            let handler = registry.get(step_id).ok_or_else(|| {
                error!(step = %step_id, "No implementation registered");
                AxiomError::MissingImplementation {
                    step: step_id.clone(),
                }
            })?;
            let policy = self.policy_for(step)?;

            info!(
                step = %step_id,
                action = %step.action,
                max_attempts = policy.max_attempts,
                "Executing step"
            );
            let step_start = Instant::now();
            let output = self
                .recovery
                .execute(
                    |attempt| {
                        handler.call(StepRequest {
                            step_id: step.id.clone(),
                            action: step.action.clone(),
                            attempt,
                            inputs: step.inputs.clone(),
                        })
                    },
                    &policy,
                    hooks::no_compensation,
                    hooks::no_cleanup,
                    cancel,
                )
                .await
                .map_err(|e| step_failure(step_id, e))?;

            let usage = Usage::from_output(&output).unwrap_or_default();
            total += usage;
            info!(
                step = %step_id,
                runtime = usage.runtime,
                cost = usage.cost,
                elapsed_ms = step_start.elapsed().as_millis() as u64,
                "Step completed"
            );
        }

        Ok(total)
    }

    /// Run any unit of work through this executor's recovery manager.
    /// `policy` defaults to the configured retry policy.
    pub async fn run_step<T, Op, OpFut, Comp, CompFut, Clean, CleanFut>(
        &self,
        op: Op,
        policy: Option<&RetryPolicy>,
        compensation: Comp,
        cleanup: Clean,
        cancel: &CancellationToken,
    ) -> std::result::Result<T, RecoveryError<AxiomError>>
    where
        Op: FnMut(u32) -> OpFut,
        OpFut: Future<Output = Result<T>>,
        Comp: FnMut(&AxiomError) -> CompFut,
        CompFut: Future<Output = ()>,
        Clean: FnOnce() -> CleanFut,
        CleanFut: Future<Output = ()>,
    {
        let default = RetryPolicy::from_config(&self.retry_defaults);
        let policy = policy.unwrap_or(&default);
        self.recovery
            .execute(op, policy, compensation, cleanup, cancel)
            .await
    }
}

fn step_failure(step: &str, err: RecoveryError<AxiomError>) -> AxiomError {
    if err.is_cancelled() {
        return AxiomError::Cancelled;
    }
    let attempts = err.attempts();
    match err.into_last() {
        Some(source) => AxiomError::StepFailed {
            step: step.to_string(),
            attempts,
            source: Box::new(source),
        },
        None => AxiomError::Execution(format!("step '{}' failed without an error", step)),
    }
}
