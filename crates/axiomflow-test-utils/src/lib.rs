pub mod fixtures;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use axiomflow_core::error::{AxiomError, Result};
use axiomflow_core::traits::{Scorer, StepHandler};
use axiomflow_core::types::{Agent, Feedback, ScoreRequest, StepRequest};

/// What a [`ScriptedScorer`] does when asked for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Never,
    Always,
    /// Fail the first `n` calls, then score normally.
    FirstCalls(usize),
}

/// Scorer returning fixed per-agent scores.
pub struct ScriptedScorer {
    scores: HashMap<String, f64>,
    default_score: f64,
    failure: FailureMode,
    calls: AtomicUsize,
    updates: Mutex<Vec<Feedback>>,
}

impl ScriptedScorer {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            default_score: 0.0,
            failure: FailureMode::Never,
            calls: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn with_score(mut self, agent_id: &str, score: f64) -> Self {
        self.scores.insert(agent_id.to_string(), score);
        self
    }

    pub fn with_default(mut self, score: f64) -> Self {
        self.default_score = score;
        self
    }

    pub fn failing(mut self, mode: FailureMode) -> Self {
        self.failure = mode;
        self
    }

    /// Number of `score` calls so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<Feedback> {
        self.updates.lock().unwrap().clone()
    }
}

impl Default for ScriptedScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer for ScriptedScorer {
    fn score(&self, request: ScoreRequest) -> BoxFuture<'_, Result<f64>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = match self.failure {
            FailureMode::Never => false,
            FailureMode::Always => true,
            FailureMode::FirstCalls(n) => call < n,
        };
        let score = self
            .scores
            .get(&request.agent_id)
            .copied()
            .unwrap_or(self.default_score);
        Box::pin(async move {
            if fail {
                Err(AxiomError::Scoring("scripted failure".into()))
            } else {
                Ok(score)
            }
        })
    }

    fn update(&self, feedback: Feedback) -> BoxFuture<'_, Result<()>> {
        self.updates.lock().unwrap().push(feedback);
        Box::pin(async { Ok(()) })
    }
}

/// Handler that fails `failures` times, then returns `output`. The counter
/// reports every invocation.
pub fn flaky_handler(
    failures: usize,
    output: serde_json::Value,
) -> (impl StepHandler, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = move |req: StepRequest| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let output = output.clone();
        async move {
            if n < failures {
                Err(AxiomError::Execution(format!(
                    "{} attempt {} failed",
                    req.step_id, req.attempt
                )))
            } else {
                Ok(output)
            }
        }
    };
    (handler, calls)
}

/// Handler that records the step ids it was called for, in call order.
pub fn recording_handler(
    log: Arc<Mutex<Vec<String>>>,
    output: serde_json::Value,
) -> impl StepHandler {
    move |req: StepRequest| {
        log.lock().unwrap().push(req.step_id);
        let output = output.clone();
        async move { Ok::<_, AxiomError>(output) }
    }
}

/// Available agent with the given skills and load.
pub fn agent(id: &str, skills: &[&str], load: f64) -> Agent {
    Agent::new(id)
        .with_skills(skills.iter().copied())
        .with_load(load)
}
