use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;

use axiomflow_core::config::AppConfig;
use axiomflow_core::error::AxiomError;
use axiomflow_core::traits::StepHandler;
use axiomflow_core::types::{StepRequest, Task, Usage};
use axiomflow_dsl::WorkflowParser;
use axiomflow_runtime::{
    AgentRouter, Context, ContextManager, HandoffEvent, HandoffKey, StepRegistry,
    WorkflowExecutor,
};
use axiomflow_test_utils::fixtures::{DIAMOND_WORKFLOW, TWO_STEP_WORKFLOW};
use axiomflow_test_utils::{agent, recording_handler, ScriptedScorer};

fn within(actual: f64, estimate: f64, tolerance: f64) -> bool {
    (actual - estimate).abs() <= estimate * tolerance
}

fn reporting(usage: Usage, calls: Arc<AtomicUsize>) -> impl StepHandler {
    move |_req: StepRequest| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, AxiomError>(usage.to_output()) }
    }
}

#[tokio::test]
async fn test_actual_usage_tracks_estimates() {
    let parsed = WorkflowParser::new().parse(TWO_STEP_WORKFLOW).unwrap();
    assert_eq!(parsed.estimates, Usage::new(3.0, 30.0));

    let calls = Arc::new(AtomicUsize::new(0));
    let registry = StepRegistry::new()
        .with("step1", reporting(Usage::new(1.1, 11.0), calls.clone()))
        .with("step2", reporting(Usage::new(2.4, 18.0), calls.clone()));

    let executor = WorkflowExecutor::new(&AppConfig::default());
    let actual = executor.run_workflow(&parsed, &registry, false).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!((actual.runtime - 3.5).abs() < 1e-9);
    assert!((actual.cost - 29.0).abs() < 1e-9);
    assert!(within(actual.runtime, parsed.estimates.runtime, 0.2));
    assert!(within(actual.cost, parsed.estimates.cost, 0.2));
}

#[tokio::test]
async fn test_dry_run_calls_nothing() {
    let parsed = WorkflowParser::new().parse(TWO_STEP_WORKFLOW).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = StepRegistry::new()
        .with("step1", reporting(Usage::new(1.0, 1.0), calls.clone()))
        .with("step2", reporting(Usage::new(1.0, 1.0), calls.clone()));

    let executor = WorkflowExecutor::new(&AppConfig::default());
    let actual = executor.run_workflow(&parsed, &registry, true).await.unwrap();

    assert_eq!(actual, Usage::default());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_route_run_and_hand_off() {
    let parsed = WorkflowParser::new().parse(DIAMOND_WORKFLOW).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = StepRegistry::new();
    for step in &parsed.workflow.steps {
        registry.register(
            step.id.clone(),
            recording_handler(log.clone(), json!({"runtime": 0.5, "cost": 1.0})),
        );
    }

    let executor = WorkflowExecutor::new(&AppConfig::default());
    let usage = executor.run_workflow(&parsed, &registry, false).await.unwrap();
    assert_eq!(usage, Usage::new(2.0, 4.0));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["fetch", "build", "lint", "release"]
    );

    let scorer = Arc::new(ScriptedScorer::new().with_score("qa-2", 0.9));
    let router = AgentRouter::new(scorer.clone());
    let agents = vec![
        agent("qa-1", &["review"], 0.2),
        agent("qa-2", &["review"], 0.4),
        agent("busy", &["review"], 0.95),
    ];
    let task = Task::new("review").requiring("review");
    let chosen = router.route_task(&task, &agents).await.unwrap();
    assert_eq!(chosen.id, "qa-2");
    router.record_outcome(&task, chosen, true).await.unwrap();

    let manager = ContextManager::new(&HandoffKey::generate(), [chosen.id.as_str()]);
    let ctx = Context::new([
        ("workflow", json!(parsed.workflow.name)),
        ("usage", json!({"runtime": usage.runtime, "cost": usage.cost})),
        ("cost_per_step", json!(usage.cost / 3.0)),
    ]);
    let received = manager.handoff(&ctx, &chosen.id).await.unwrap();
    assert_eq!(received.data(), ctx.data());
    assert_eq!(received.hash(), ctx.hash());

    let events: Vec<HandoffEvent> = manager.audit_log().into_iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![HandoffEvent::HandoffStarted, HandoffEvent::Completed]
    );
}
