use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use plan_pilot::orchestrator::{RunStatus, finalize};
use plan_pilot::output::render_summary;
use plan_pilot::{
    Collaborators, FileReportWriter, FileTimer, HttpCollaborators, PilotConfig, PlanCycleController,
    PlanParams, ReportWriter, RunState,
};

/// How long detached escalations get to finish before the process exits
const ESCALATION_GRACE: Duration = Duration::from_secs(10);

/// Plan-Pilot CLI: drive a remote-agent automation plan to completion
#[derive(Parser, Debug)]
#[command(name = "plan-pilot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run (or resume) the plan cycle loop for a remote instance
    #[command(name = "run")]
    Run {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Show the checkpointed state of a run
    #[command(name = "status")]
    Status {
        /// Remote instance the run belongs to
        #[arg(short, long)]
        instance_id: String,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Site the plan runs for
    #[arg(short, long)]
    site_id: String,

    /// Activity the plan automates
    #[arg(short, long)]
    activity: String,

    /// Remote instance executing the plan
    #[arg(short, long)]
    instance_id: String,

    /// Existing plan on the remote instance
    #[arg(long)]
    instance_plan_id: Option<String>,

    /// User notified on escalation
    #[arg(short, long)]
    user_id: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the collaborator API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Override the safety cap on cycles
    #[arg(long)]
    max_cycles: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Run { args }) => handle_run_command(args).await,
        Some(Command::Status {
            instance_id,
            config,
        }) => handle_status_command(instance_id, config),
        None => {
            // Default behavior: show help
            eprintln!("No command specified. Use --help for usage information.");
            eprintln!(
                "Example: plan-pilot run --site-id site-1 --activity outreach --instance-id inst-1"
            );
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

async fn handle_run_command(args: RunArgs) -> Result<()> {
    init_logging(args.verbose);

    info!("Plan-Pilot starting");

    // Load configuration
    let mut config = PilotConfig::load_or_default(args.config.as_ref())?;

    // Apply CLI overrides
    if let Some(base_url) = args.base_url {
        config.api.base_url = base_url;
    }
    if let Some(max_cycles) = args.max_cycles {
        config.loop_config.max_cycles = max_cycles;
    }

    let mut params = PlanParams::new(args.site_id, args.activity, args.instance_id);
    if let Some(plan_id) = args.instance_plan_id {
        params = params.with_plan_id(plan_id);
    }
    if let Some(user_id) = args.user_id {
        params = params.with_user_id(user_id);
    }

    info!("Instance: {}", params.instance_id);
    info!("State dir: {:?}", config.storage.state_dir);

    // Create components
    let http = Arc::new(HttpCollaborators::new(&config.api)?);
    let timer = Arc::new(FileTimer::new(config.storage.timers_dir()));
    let writer = FileReportWriter::new(config.storage.reports_dir());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current cycle");
            ctrl_c.cancel();
        }
    });

    let controller = PlanCycleController::new(Collaborators::uniform(http), timer, &config)
        .with_checkpoints(config.storage.runs_dir())
        .with_cancellation(cancel);

    let report = controller.run(params).await;
    controller.drain_escalations(ESCALATION_GRACE).await;

    match writer.write_report(&report).await {
        Ok(path) => info!("Report: {:?}", path),
        Err(e) => warn!("Failed to write report: {:#}", e),
    }

    println!("\n========================================");
    print!("{}", render_summary(&report));
    println!("========================================");

    if !report.success {
        std::process::exit(1);
    }

    Ok(())
}

fn handle_status_command(instance_id: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = PilotConfig::load_or_default(config_path.as_ref())?;
    let run_dir = RunState::run_dir(&config.storage.runs_dir(), &instance_id);

    let state = RunState::load(&run_dir)
        .context(format!("Failed to load checkpoint from {:?}", run_dir))?
        .ok_or_else(|| anyhow::anyhow!("No checkpoint found for instance {}", instance_id))?;

    let status = match &state.status {
        RunStatus::Running => "running".to_string(),
        RunStatus::Completed => "completed".to_string(),
        RunStatus::Failed { kind, .. } => format!("failed ({})", kind),
    };

    println!("Instance:     {}", state.params.instance_id);
    println!("Status:       {}", status);
    println!("Started at:   {}", state.started_at);
    println!("Cycle:        {}", state.cycle);
    if let Some(wait) = &state.pending_wait {
        println!("Waiting:      {} (since cycle {})", wait.kind.label(), wait.cycle);
    }
    if let Some(entry) = state.last_entry() {
        println!(
            "Last cycle:   {} at {:.0}% ({})",
            entry.response_type, entry.progress.percentage, entry.timestamp
        );
    }

    if state.status.is_terminal() {
        println!();
        print!("{}", render_summary(&finalize(&state)));
    }

    Ok(())
}
