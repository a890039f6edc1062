use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use axiomflow_core::config::AppConfig;
use axiomflow_core::error::AxiomError;
use axiomflow_core::traits::StepHandler;
use axiomflow_core::types::{StepRequest, Usage};
use axiomflow_dsl::{parse_workflow_file, ParsedWorkflow};
use axiomflow_runtime::{HandoffKey, StepRegistry, WorkflowExecutor};

#[derive(Parser)]
#[command(name = "axiomflow", version, about = "Declarative multi-agent workflow orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "axiomflow.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a workflow file
    Validate {
        file: PathBuf,
    },
    /// Show execution order, estimates, and per-step resources
    Plan {
        file: PathBuf,
        /// Print the parsed workflow as JSON
        #[arg(long)]
        raw: bool,
    },
    /// Run a workflow with simulated steps that report their own estimates
    Simulate {
        file: PathBuf,
        /// Make STEP fail N times before succeeding (STEP=N)
        #[arg(long = "flaky", value_parser = parse_flaky)]
        flaky: Vec<(String, usize)>,
        /// Compute the order only; call no step
        #[arg(long)]
        dry_run: bool,
    },
    /// Show effective configuration
    Config,
    /// Generate a handoff encryption key
    Keygen,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn parse_flaky(raw: &str) -> Result<(String, usize), String> {
    let (step, count) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected STEP=N, got '{}'", raw))?;
    let count = count
        .parse()
        .map_err(|_| format!("'{}' is not a failure count", count))?;
    Ok((step.to_string(), count))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("axiomflow=info,warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "axiomflow", &mut std::io::stdout());
        }
        Commands::Keygen => {
            println!("{}", HandoffKey::generate().to_base64());
        }
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&redacted(&config))?);
        }
        Commands::Validate { file } => {
            let parsed = load_workflow(&file, false)?;
            let wf = &parsed.workflow;
            println!(
                "OK  {} v{}: {} steps, {} edges, {} gates",
                wf.name,
                wf.version,
                wf.steps.len(),
                wf.edges.len(),
                wf.gates.len()
            );
        }
        Commands::Plan { file, raw } => {
            let parsed = load_workflow(&file, true)?;
            if raw {
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            } else {
                print_plan(&parsed);
            }
        }
        Commands::Simulate {
            file,
            flaky,
            dry_run,
        } => {
            let config = load_config(&cli.config)?;
            let parsed = load_workflow(&file, false)?;
            simulate(&config, &parsed, &flaky, dry_run).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load_or_default(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
    }
    Ok(config)
}

fn load_workflow(path: &Path, dry_run: bool) -> anyhow::Result<ParsedWorkflow> {
    parse_workflow_file(path, dry_run)
        .with_context(|| format!("loading workflow {}", path.display()))
}

fn redacted(config: &AppConfig) -> AppConfig {
    let mut shown = config.clone();
    if shown.orchestrator.api_key.is_some() {
        shown.orchestrator.api_key = Some("********".into());
    }
    shown
}

fn print_plan(parsed: &ParsedWorkflow) {
    let wf = &parsed.workflow;
    println!("{} v{}", wf.name, wf.version);
    println!();
    println!("  Execution order:");
    for (i, id) in parsed.execution_order.iter().flatten().enumerate() {
        let res = parsed.resource_estimates.get(id).copied().unwrap_or_default();
        let est = wf.step(id).map(|s| s.estimate()).unwrap_or_default();
        println!(
            "  {:>3}. {:<24} cpu={:<6} mem={:<8} runtime={:<6} cost={}",
            i + 1,
            id,
            res.cpu,
            res.memory,
            est.runtime,
            est.cost
        );
    }
    println!();
    println!(
        "  Estimated total: runtime={} cost={}",
        parsed.estimates.runtime, parsed.estimates.cost
    );
}

/// Handler that reports the step's own estimate, after `failures` injected
/// errors.
fn simulated_step(estimate: Usage, failures: usize) -> impl StepHandler {
    let remaining = Arc::new(AtomicUsize::new(failures));
    move |req: StepRequest| {
        let fail = remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        async move {
            if fail {
                Err(AxiomError::Execution(format!(
                    "injected failure in '{}' (attempt {})",
                    req.step_id, req.attempt
                )))
            } else {
                Ok(estimate.to_output())
            }
        }
    }
}

async fn simulate(
    config: &AppConfig,
    parsed: &ParsedWorkflow,
    flaky: &[(String, usize)],
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut registry = StepRegistry::new();
    for step in &parsed.workflow.steps {
        let failures = flaky
            .iter()
            .find(|(id, _)| *id == step.id)
            .map_or(0, |(_, n)| *n);
        registry.register(step.id.clone(), simulated_step(step.estimate(), failures));
    }
    for (id, _) in flaky {
        if parsed.workflow.step(id).is_none() {
            warn!(step = %id, "--flaky names an unknown step");
        }
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let executor = WorkflowExecutor::new(config);
    let actual = executor
        .run_workflow_with_cancel(parsed, &registry, dry_run, &cancel)
        .await?;

    let est = parsed.estimates;
    println!("  Estimated: runtime={} cost={}", est.runtime, est.cost);
    println!("  Actual:    runtime={} cost={}", actual.runtime, actual.cost);
    Ok(())
}
