use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

use axiomflow_core::config::{AppConfig, RoutingPolicy};
use axiomflow_core::error::{AxiomError, Result};
use axiomflow_core::traits::Scorer;
use axiomflow_core::types::{Agent, AgentStatus, Feedback, RoutingMetrics, ScoreRequest, Task};

use crate::metrics::{JsonFileMetricsStore, MetricsStore};

/// Agents at or above this load are never candidates.
pub const LOAD_THRESHOLD: f64 = 0.8;

/// Consecutive scorer failures that permanently disable learned scoring.
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Routing slower than this is logged at warn level.
pub const LATENCY_SLO: Duration = Duration::from_millis(150);

/// Receives the wall-clock duration of every `route_task` call.
pub type LatencyHook = Arc<dyn Fn(Duration) + Send + Sync>;

/// Picks an agent for a task: hard filters first, then a pinned route,
/// learned scoring, or least load.
pub struct AgentRouter {
    scorer: Arc<dyn Scorer>,
    latency_hook: Option<LatencyHook>,
    routing_policies: Vec<RoutingPolicy>,
    learned_enabled: AtomicBool,
    consecutive_failures: AtomicU32,
    ledger: Mutex<RoutingMetrics>,
    store: Option<Arc<dyn MetricsStore>>,
}

impl AgentRouter {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self {
            scorer,
            latency_hook: None,
            routing_policies: Vec::new(),
            learned_enabled: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            ledger: Mutex::new(RoutingMetrics::new()),
            store: None,
        }
    }

    /// Router with the configured pinned routes and, when `metrics_path` is
    /// set, a JSON-file ledger.
    pub fn from_config(scorer: Arc<dyn Scorer>, config: &AppConfig) -> Result<Self> {
        let router = Self::new(scorer)
            .with_routing_policies(config.orchestrator.routing_policies.clone());
        match &config.runtime.metrics_path {
            Some(path) => router.with_store(Arc::new(JsonFileMetricsStore::new(path))),
            None => Ok(router),
        }
    }

    pub fn with_latency_hook(mut self, hook: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.latency_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_routing_policies(mut self, policies: Vec<RoutingPolicy>) -> Self {
        self.routing_policies = policies;
        self
    }

    /// Persist outcomes to `store`, seeding the ledger from what it holds.
    pub fn with_store(mut self, store: Arc<dyn MetricsStore>) -> Result<Self> {
        let existing = store.load()?;
        debug!(agents = existing.len(), "Loaded routing metrics");
        self.ledger = Mutex::new(existing);
        self.store = Some(store);
        Ok(self)
    }

    pub fn learned_scoring_enabled(&self) -> bool {
        self.learned_enabled.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Select an agent from `agents` for `task`.
    pub async fn route_task<'a>(&self, task: &Task, agents: &'a [Agent]) -> Result<&'a Agent> {
        let correlation_id = task.correlation_id_or_new();
        let span = tracing::info_span!(
            "route_task",
            correlation_id = %correlation_id,
            task_type = %task.task_type,
        );

        async move {
            let start = Instant::now();
            let result = self.select(task, agents).await;
            let elapsed = start.elapsed();

            if let Some(hook) = &self.latency_hook {
                hook(elapsed);
            }
            let duration_ms = elapsed.as_secs_f64() * 1000.0;
            match &result {
                Ok(agent) if elapsed > LATENCY_SLO => warn!(
                    agent = %agent.id,
                    duration_ms,
                    "Routing exceeded latency threshold"
                ),
                Ok(agent) => info!(agent = %agent.id, duration_ms, "Routing completed"),
                Err(e) => warn!(error = %e, duration_ms, "Routing failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn select<'a>(&self, task: &Task, agents: &'a [Agent]) -> Result<&'a Agent> {
        let candidates = filter_candidates(task, agents)?;
        if candidates.is_empty() {
            return Err(AxiomError::NoAgentsAvailable);
        }

        if let Some(agent) = self.pinned(task, &candidates) {
            debug!(agent = %agent.id, "Using pinned route");
            return Ok(agent);
        }

        if self.learned_scoring_enabled() {
            match self.best_scored(task, &candidates).await {
                Ok(agent) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    return Ok(agent);
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures >= CIRCUIT_BREAKER_THRESHOLD
                        && self.learned_enabled.swap(false, Ordering::SeqCst)
                    {
                        warn!(failures, "Circuit breaker open, learned scoring disabled");
                    }
                    warn!(error = %e, "Scorer unavailable, falling back to rule-based selection");
                }
            }
        }

        Ok(least_loaded(&candidates))
    }

    fn pinned<'a>(&self, task: &Task, candidates: &[&'a Agent]) -> Option<&'a Agent> {
        let policy = self
            .routing_policies
            .iter()
            .find(|p| p.task == task.task_type)?;
        candidates.iter().copied().find(|a| a.id == policy.agent)
    }

    /// Highest score wins; the earlier candidate keeps a tie.
    async fn best_scored<'a>(&self, task: &Task, candidates: &[&'a Agent]) -> Result<&'a Agent> {
        let mut best: Option<(f64, &'a Agent)> = None;
        for &agent in candidates {
            let score = self
                .scorer
                .score(ScoreRequest {
                    agent_id: agent.id.clone(),
                    task: task.clone(),
                    load: agent.load,
                })
                .await?;
            if !score.is_finite() {
                return Err(AxiomError::Scoring(format!(
                    "non-finite score {} for agent '{}'",
                    score, agent.id
                )));
            }
            debug!(agent = %agent.id, score, "Scored candidate");
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, agent));
            }
        }
        best.map(|(_, agent)| agent)
            .ok_or(AxiomError::NoAgentsAvailable)
    }

    /// Feed a routed task's outcome to the scorer and the metrics ledger.
    ///
    /// Returns after the scorer has taken the feedback, so the next
    /// `route_task` from the same caller sees it.
    pub async fn record_outcome(&self, task: &Task, agent: &Agent, success: bool) -> Result<()> {
        self.scorer
            .update(Feedback {
                agent_id: agent.id.clone(),
                task: task.clone(),
                result: success,
            })
            .await?;

        let mut ledger = self.ledger.lock().await;
        match &self.store {
            Some(store) => {
                // Commit only what the store accepted
                let mut updated = ledger.clone();
                updated.entry(agent.id.clone()).or_default().record(success);
                store.persist(&updated)?;
                *ledger = updated;
            }
            None => ledger.entry(agent.id.clone()).or_default().record(success),
        }
        debug!(agent = %agent.id, success, "Recorded routing outcome");
        Ok(())
    }

    /// Snapshot of per-agent outcome counters.
    pub async fn metrics(&self) -> RoutingMetrics {
        self.ledger.lock().await.clone()
    }
}

/// Drop unavailable, overloaded, and unskilled agents. A surviving agent
/// carrying a disallowed policy fails the whole call.
fn filter_candidates<'a>(task: &Task, agents: &'a [Agent]) -> Result<Vec<&'a Agent>> {
    let mut candidates = Vec::new();
    for agent in agents {
        if agent.status != AgentStatus::Available || agent.load >= LOAD_THRESHOLD {
            continue;
        }
        if let Some(skill) = &task.required_skill {
            if !agent.has_skill(skill) {
                continue;
            }
        }
        let violated: Vec<String> = agent
            .policies
            .intersection(&task.disallowed_policies)
            .cloned()
            .collect();
        if !violated.is_empty() {
            return Err(AxiomError::PolicyViolation {
                agent: agent.id.clone(),
                policies: violated,
            });
        }
        candidates.push(agent);
    }
    Ok(candidates)
}

fn least_loaded<'a>(candidates: &[&'a Agent]) -> &'a Agent {
    let mut best = candidates[0];
    for &agent in &candidates[1..] {
        if agent.load < best.load {
            best = agent;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use axiomflow_core::types::AgentMetrics;
    use axiomflow_test_utils::{agent, FailureMode, ScriptedScorer};

    use crate::metrics::MemoryMetricsStore;

    fn pool() -> Vec<Agent> {
        vec![
            agent("a1", &["python"], 0.5),
            agent("a2", &["java"], 0.1),
            agent("a3", &["go"], 0.2),
        ]
    }

    #[tokio::test]
    async fn test_required_skill_is_deterministic() {
        let scorer = Arc::new(ScriptedScorer::new().with_score("a1", 1.0));
        let router = AgentRouter::new(scorer);
        let agents = pool();
        let task = Task::new("analysis").requiring("python");

        for _ in 0..100 {
            let chosen = router.route_task(&task, &agents).await.unwrap();
            assert_eq!(chosen.id, "a1");
        }
    }

    #[tokio::test]
    async fn test_highest_score_wins() {
        let scorer = Arc::new(
            ScriptedScorer::new()
                .with_score("a1", 0.2)
                .with_score("a2", 0.3)
                .with_score("a3", 0.9),
        );
        let router = AgentRouter::new(scorer);
        let agents = pool();
        let chosen = router.route_task(&Task::new("any"), &agents).await.unwrap();
        assert_eq!(chosen.id, "a3");
    }

    #[tokio::test]
    async fn test_score_tie_keeps_first_seen() {
        let scorer = Arc::new(ScriptedScorer::new().with_default(0.5));
        let router = AgentRouter::new(scorer);
        let agents = pool();
        let chosen = router.route_task(&Task::new("any"), &agents).await.unwrap();
        assert_eq!(chosen.id, "a1");
    }

    #[tokio::test]
    async fn test_filters_status_load_and_skill() {
        let router = AgentRouter::new(Arc::new(ScriptedScorer::new()));
        let agents = vec![
            agent("busy", &["python"], 0.1).with_status(AgentStatus::Busy),
            agent("offline", &["python"], 0.1).with_status(AgentStatus::Offline),
            agent("hot", &["python"], 0.8),
            agent("unskilled", &["rust"], 0.1),
        ];
        let err = router
            .route_task(&Task::new("t").requiring("python"), &agents)
            .await
            .unwrap_err();
        assert!(matches!(err, AxiomError::NoAgentsAvailable));

        let err = router.route_task(&Task::new("t"), &[]).await.unwrap_err();
        assert!(matches!(err, AxiomError::NoAgentsAvailable));
    }

    #[tokio::test]
    async fn test_policy_violation_is_fatal() {
        let router = AgentRouter::new(Arc::new(ScriptedScorer::new()));
        let agents = vec![
            agent("clean", &[], 0.1),
            agent("tainted", &[], 0.3).with_policies(["pii", "export"]),
        ];
        let task = Task::new("report").disallowing(["pii"]);
        let err = router.route_task(&task, &agents).await.unwrap_err();
        match err {
            AxiomError::PolicyViolation { agent, policies } => {
                assert_eq!(agent, "tainted");
                assert_eq!(policies, vec!["pii"]);
            }
            other => panic!("expected PolicyViolation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_policy_check_skips_filtered_agents() {
        let router = AgentRouter::new(Arc::new(ScriptedScorer::new()));
        let agents = vec![
            agent("clean", &[], 0.1),
            agent("tainted", &[], 0.1)
                .with_policies(["pii"])
                .with_status(AgentStatus::Offline),
        ];
        let task = Task::new("report").disallowing(["pii"]);
        let chosen = router.route_task(&task, &agents).await.unwrap();
        assert_eq!(chosen.id, "clean");
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_three_failures() {
        let scorer = Arc::new(
            ScriptedScorer::new()
                .with_score("a1", 10.0)
                .failing(FailureMode::Always),
        );
        let router = AgentRouter::new(scorer.clone());
        let agents = pool();
        let task = Task::new("any");

        for expected in 1..=3 {
            let chosen = router.route_task(&task, &agents).await.unwrap();
            assert_eq!(chosen.id, "a2");
            assert_eq!(router.consecutive_failures(), expected);
        }
        assert!(!router.learned_scoring_enabled());
        let calls = scorer.calls();

        for _ in 0..5 {
            let chosen = router.route_task(&task, &agents).await.unwrap();
            assert_eq!(chosen.id, "a2");
        }
        assert_eq!(scorer.calls(), calls);
    }

    #[tokio::test]
    async fn test_single_failure_falls_back_once() {
        let scorer = Arc::new(
            ScriptedScorer::new()
                .with_score("a3", 1.0)
                .failing(FailureMode::FirstCalls(1)),
        );
        let router = AgentRouter::new(scorer);
        let agents = pool();
        let task = Task::new("any");

        assert_eq!(router.route_task(&task, &agents).await.unwrap().id, "a2");
        assert_eq!(router.consecutive_failures(), 1);
        assert_eq!(router.route_task(&task, &agents).await.unwrap().id, "a3");
        assert_eq!(router.consecutive_failures(), 0);
        assert!(router.learned_scoring_enabled());
    }

    #[tokio::test]
    async fn test_pinned_route_skips_scoring() {
        let scorer = Arc::new(ScriptedScorer::new().with_score("a1", 9.0));
        let router = AgentRouter::new(scorer.clone()).with_routing_policies(vec![RoutingPolicy {
            task: "review".into(),
            agent: "a3".into(),
        }]);
        let agents = pool();

        let chosen = router.route_task(&Task::new("review"), &agents).await.unwrap();
        assert_eq!(chosen.id, "a3");
        assert_eq!(scorer.calls(), 0);

        // Pinned agent filtered out: normal selection applies
        let chosen = router
            .route_task(&Task::new("review").requiring("python"), &agents)
            .await
            .unwrap();
        assert_eq!(chosen.id, "a1");
    }

    #[tokio::test]
    async fn test_latency_hook_sees_every_call() {
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = observed.clone();
        let router = AgentRouter::new(Arc::new(ScriptedScorer::new())).with_latency_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let agents = pool();
        router.route_task(&Task::new("a"), &agents).await.unwrap();
        router.route_task(&Task::new("b"), &[]).await.unwrap_err();
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_record_outcome_updates_scorer_and_ledger() {
        let scorer = Arc::new(ScriptedScorer::new());
        let store = Arc::new(MemoryMetricsStore::new());
        let router = AgentRouter::new(scorer.clone()).with_store(store.clone()).unwrap();
        let agents = pool();
        let task = Task::new("build");

        router.record_outcome(&task, &agents[0], true).await.unwrap();
        router.record_outcome(&task, &agents[0], false).await.unwrap();
        router.record_outcome(&task, &agents[1], true).await.unwrap();

        let updates = scorer.updates();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[1].agent_id, "a1");
        assert!(!updates[1].result);

        let metrics = router.metrics().await;
        assert_eq!(metrics["a1"], AgentMetrics { success: 1, failure: 1 });
        assert_eq!(metrics["a2"], AgentMetrics { success: 1, failure: 0 });
        assert_eq!(store.snapshot(), metrics);
        assert_eq!(store.writes(), 3);
    }

    struct ReadOnlyStore;

    impl MetricsStore for ReadOnlyStore {
        fn load(&self) -> Result<RoutingMetrics> {
            Ok(RoutingMetrics::new())
        }

        fn persist(&self, _metrics: &RoutingMetrics) -> Result<()> {
            Err(AxiomError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only metrics volume",
            )))
        }
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_ledger_unchanged() {
        let router = AgentRouter::new(Arc::new(ScriptedScorer::new()))
            .with_store(Arc::new(ReadOnlyStore))
            .unwrap();
        let agents = pool();

        let err = router
            .record_outcome(&Task::new("build"), &agents[0], true)
            .await
            .unwrap_err();
        assert!(matches!(err, AxiomError::Io(_)));
        assert!(router.metrics().await.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.runtime.metrics_path = Some(dir.path().join("metrics.json").display().to_string());
        let agents = pool();

        let router = AgentRouter::from_config(Arc::new(ScriptedScorer::new()), &config).unwrap();
        router.record_outcome(&Task::new("t"), &agents[2], true).await.unwrap();
        drop(router);

        let router = AgentRouter::from_config(Arc::new(ScriptedScorer::new()), &config).unwrap();
        assert_eq!(router.metrics().await["a3"], AgentMetrics { success: 1, failure: 0 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_outcomes_lose_nothing() {
        let store = Arc::new(MemoryMetricsStore::new());
        let router = Arc::new(
            AgentRouter::new(Arc::new(ScriptedScorer::new()))
                .with_store(store.clone())
                .unwrap(),
        );
        let target = agent("a1", &[], 0.1);

        let mut handles = Vec::new();
        for i in 0..64 {
            let router = router.clone();
            let target = target.clone();
            handles.push(tokio::spawn(async move {
                router
                    .record_outcome(&Task::new("t"), &target, i % 4 != 0)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let metrics = router.metrics().await;
        assert_eq!(metrics["a1"], AgentMetrics { success: 48, failure: 16 });
        assert_eq!(metrics["a1"].total(), 64);
        assert_eq!(store.snapshot(), metrics);
    }
}
