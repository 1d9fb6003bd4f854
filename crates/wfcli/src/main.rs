use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use wfcore::{
    ExecutionEvent, RunContext, RunId, RunStatus, StepEvent, StepStatus, TemplateVersion,
    WorkflowRun, WorkflowTemplate,
};
use wfruntime::{
    HandlerRegistry, JsonRunRepository, JsonTemplateStore, Runner, RuntimeConfig, TemplateStore,
};

#[derive(Parser)]
#[command(name = "wf")]
#[command(about = "Workflow engine CLI", long_about = None)]
struct Cli {
    /// Directory holding template documents
    #[arg(long, global = true, default_value = "templates")]
    templates: PathBuf,

    /// Directory holding run records
    #[arg(long, global = true, default_value = "runs")]
    runs: PathBuf,

    /// Runtime configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a stored workflow
    Run {
        workflow: String,

        /// Template version: `latest` or a number
        #[arg(long)]
        version: Option<TemplateVersion>,

        /// Initial context as a JSON object
        #[arg(short, long)]
        context: Option<String>,

        #[arg(short, long, default_value = "manual")]
        trigger: String,

        /// Override the retry backoff base delay
        #[arg(long)]
        retry_base_delay_ms: Option<u64>,
    },

    /// Re-execute a stored run's context against the latest template
    Replay { run_id: RunId },

    /// Show recent runs of a workflow, newest first
    History {
        workflow: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List stored versions of a workflow
    Versions { workflow: String },

    /// Snapshot the latest template into a new numbered version
    Snapshot { workflow: String },

    /// Save a template file as the latest version
    Publish { file: PathBuf },

    /// Validate a template file
    Validate { file: PathBuf },

    /// List available step types
    Steps,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Run {
            workflow,
            version,
            context,
            trigger,
            retry_base_delay_ms,
        } => {
            if let Some(delay) = retry_base_delay_ms {
                config.retry_base_delay_ms = delay;
            }
            let runner = build_runner(&cli.templates, &cli.runs, config);
            let context = parse_context(context.as_deref())?;
            run_workflow(&runner, &workflow, &trigger, context, version).await?;
        }

        Commands::Replay { run_id } => {
            let runner = build_runner(&cli.templates, &cli.runs, config);
            let event_task = spawn_event_printer(&runner);
            let run = runner.replay(run_id).await?;
            finish_events(event_task).await;
            print_summary(&run);
        }

        Commands::History { workflow, limit } => {
            let runner = build_runner(&cli.templates, &cli.runs, config);
            print_history(&runner, &workflow, limit).await?;
        }

        Commands::Versions { workflow } => {
            let store = JsonTemplateStore::new(&cli.templates);
            let versions = store.list_versions(&workflow).await?;
            println!("📚 Versions of {}:", workflow);
            for version in versions {
                println!("  • {}", version);
            }
        }

        Commands::Snapshot { workflow } => {
            let store = JsonTemplateStore::new(&cli.templates);
            let version = store.create_version(&workflow).await?;
            println!("📸 Created {} v{}", workflow, version);
        }

        Commands::Publish { file } => {
            let template = read_template(&file)?;
            let name = template.name.clone();
            let store = JsonTemplateStore::new(&cli.templates);
            store.save_latest(template).await?;
            println!("✨ Published {} as latest", name);
        }

        Commands::Validate { file } => {
            validate_template(&file)?;
        }

        Commands::Steps => {
            list_steps();
        }
    }

    Ok(())
}

fn build_runner(templates: &Path, runs: &Path, config: RuntimeConfig) -> Runner {
    let mut registry = HandlerRegistry::new();
    wfsteps::register_all(&mut registry);

    Runner::with_config(Arc::new(registry), wfsteps::default_collaborators(), config)
        .with_template_store(Arc::new(JsonTemplateStore::new(templates)))
        .with_run_repository(Arc::new(JsonRunRepository::new(runs)))
}

fn parse_context(raw: Option<&str>) -> Result<RunContext> {
    let Some(raw) = raw else {
        return Ok(RunContext::new());
    };
    let json: serde_json::Value = serde_json::from_str(raw).context("context is not valid JSON")?;
    match json {
        serde_json::Value::Object(map) => Ok(RunContext::from(map)),
        _ => Err(anyhow::anyhow!("Context must be a JSON object")),
    }
}

fn read_template(file: &Path) -> Result<WorkflowTemplate> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let template: WorkflowTemplate = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(template)
}

async fn run_workflow(
    runner: &Runner,
    workflow: &str,
    trigger: &str,
    context: RunContext,
    version: Option<TemplateVersion>,
) -> Result<()> {
    println!("🚀 Running workflow: {}", workflow);

    let shutdown = CancellationToken::new();
    let (_monitor, monitor_task) = runner.spawn_monitor(shutdown.clone());
    let event_task = spawn_event_printer(runner);

    let run = runner
        .execute_workflow(workflow, trigger, context, version)
        .await;

    shutdown.cancel();
    let _ = monitor_task.await;
    finish_events(event_task).await;
    print_summary(&run);

    if run.status == RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn spawn_event_printer(runner: &Runner) -> tokio::task::JoinHandle<()> {
    let mut events = runner.subscribe_events();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { run_id, workflow, .. } => {
                    println!("▶️  Run {} of {} started", run_id, workflow);
                }
                ExecutionEvent::StepStarted { step, kind, .. } => {
                    println!("  ⚡ Starting step: {} ({})", step, kind);
                }
                ExecutionEvent::StepCompleted {
                    step,
                    duration_ms,
                    branch,
                    ..
                } => match branch {
                    Some(label) => println!("  ✅ Step {} took branch '{}' in {}ms", step, label, duration_ms),
                    None => println!("  ✅ Step {} completed in {}ms", step, duration_ms),
                },
                ExecutionEvent::StepFailed { step, error, .. } => {
                    println!("  ❌ Step {} failed: {}", step, error);
                }
                ExecutionEvent::StepEvent { step, event, .. } => match event {
                    StepEvent::Info { message } => println!("     ℹ️  [{}] {}", step, message),
                    StepEvent::Warning { message } => println!("     ⚠️  [{}] {}", step, message),
                },
                ExecutionEvent::RunRetrying { attempt, delay_ms, .. } => {
                    println!("  🔁 Retry {} in {}ms", attempt, delay_ms);
                }
                ExecutionEvent::StuckRunDetected {
                    workflow,
                    running_for_ms,
                    ..
                } => {
                    println!("  ⏳ {} has been running for {}ms", workflow, running_for_ms);
                }
                ExecutionEvent::RunFinished {
                    status, duration_ms, ..
                } => {
                    if status == RunStatus::Completed {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Run failed after {}ms", duration_ms);
                    }
                }
            }
        }
    })
}

/// Give the printer a moment to drain before stopping it
async fn finish_events(task: tokio::task::JoinHandle<()>) {
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    task.abort();
}

fn print_summary(run: &WorkflowRun) {
    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", run.id);
    println!("   Workflow: {} ({})", run.workflow_name, run.version);
    println!("   Status: {:?}", run.status);
    println!("   Retries: {}", run.retries);
    if let Some(ms) = run.duration_ms {
        println!("   Duration: {}ms", ms);
    }
    if let Some(error) = &run.error {
        println!("   Error: {}", error);
    }

    println!();
    println!("📋 Steps:");
    for step in &run.steps {
        let mark = match step.status {
            StepStatus::Completed => "✅",
            StepStatus::Failed => "❌",
        };
        match &step.error {
            Some(error) => println!("   {} {} (attempt {}): {}", mark, step.name, step.attempt, error),
            None => println!("   {} {} (attempt {})", mark, step.name, step.attempt),
        }
    }
}

async fn print_history(runner: &Runner, workflow: &str, limit: Option<usize>) -> Result<()> {
    let runs = runner.history(workflow, limit).await?;
    if runs.is_empty() {
        println!("No runs recorded for {}", workflow);
        return Ok(());
    }

    println!("🕘 Recent runs of {}:", workflow);
    for run in runs {
        println!(
            "  • {} {:?} started {} retries={} trigger={}",
            run.id, run.status, run.started_at, run.retries, run.trigger
        );
        if let Some(error) = run.error {
            println!("      {}", error);
        }
    }
    Ok(())
}

fn validate_template(file: &Path) -> Result<()> {
    println!("🔍 Validating template: {}", file.display());

    let template = read_template(file)?;
    template.validate()?;

    let mut registry = HandlerRegistry::new();
    wfsteps::register_all(&mut registry);
    let missing = registry.missing_step_types();

    println!("✅ Template is valid:");
    println!("   Name: {}", template.name);
    println!("   Steps: {}", template.steps.len());
    println!(
        "   Retry: {} (max {})",
        template.retry, template.max_retries
    );
    if !missing.is_empty() {
        println!("   ⚠️  No handler for: {:?}", missing);
    }

    Ok(())
}

fn list_steps() {
    println!("📦 Available Step Types:");
    println!();

    let mut registry = HandlerRegistry::new();
    wfsteps::register_all(&mut registry);

    for step_type in registry.list_step_types() {
        println!("  • {}", step_type);
    }
}
