use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hirepulse_sync::scheduler::build_scheduler;
use hirepulse_sync::{
    InProcessLauncher, Orchestrator, RunReport, Settings, Stage, StageLauncher,
    SubprocessLauncher,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "hirepulse")]
#[command(about = "Web3 hiring pulse collectors, sentiment enrichment and orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every stage in order, halting on the first failure.
    RunAll {
        /// Run stages inside this process instead of one child process each.
        #[arg(long)]
        in_process: bool,
    },
    /// Run a single stage.
    Collect {
        #[arg(value_parser = parse_stage)]
        stage: Stage,
    },
    /// Score social posts that have no sentiment yet.
    Sentiment,
    /// Run the full sequence on the configured cron until Ctrl-C.
    Schedule {
        #[arg(long)]
        in_process: bool,
    },
}

fn parse_stage(raw: &str) -> Result<Stage, String> {
    raw.parse()
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "configuration invalid");
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::RunAll { in_process } => run_all(settings, in_process).await,
        Commands::Collect { stage } => collect(stage, &settings).await,
        Commands::Sentiment => collect(Stage::Sentiment, &settings).await,
        Commands::Schedule { in_process } => schedule(settings, in_process).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn launcher(settings: Settings, in_process: bool) -> Result<Arc<dyn StageLauncher>> {
    Ok(if in_process {
        Arc::new(InProcessLauncher::new(settings))
    } else {
        Arc::new(SubprocessLauncher::current_exe()?)
    })
}

async fn collect(stage: Stage, settings: &Settings) -> Result<ExitCode> {
    match hirepulse_sync::run_stage(stage, settings).await {
        Ok(outcome) => {
            println!("{outcome}");
            Ok(if outcome.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(err) => {
            eprintln!("{stage} aborted: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_all(settings: Settings, in_process: bool) -> Result<ExitCode> {
    let orchestrator = Orchestrator::from_tuning(&settings.tuning);
    let launcher = launcher(settings, in_process)?;
    let report = orchestrator.run(launcher.as_ref()).await;
    print_report(&report);
    Ok(exit_code_for(&report))
}

async fn schedule(settings: Settings, in_process: bool) -> Result<ExitCode> {
    let cron = settings.tuning.orchestrator.schedule_cron.clone();
    let orchestrator = Arc::new(Orchestrator::from_tuning(&settings.tuning));
    let launcher = launcher(settings, in_process)?;

    let mut sched = build_scheduler(&cron, orchestrator, launcher).await?;
    sched.start().await.context("starting scheduler")?;
    info!(%cron, "scheduler started, waiting for Ctrl-C");

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RunReport) {
    for stage in report.attempted() {
        println!("== {} ({})", stage.stage, stage.state);
        if let Some(output) = &stage.output {
            if !output.stdout.trim().is_empty() {
                println!("{}", output.stdout.trim_end());
            }
            if !output.stderr.trim().is_empty() {
                println!("{}", output.stderr.trim_end());
            }
        }
        if let Some(err) = &stage.launch_error {
            println!("launch failed: {err}");
        }
    }
    println!("{report}");
}

/// Exit status of the last stage attempted.
fn exit_code_for(report: &RunReport) -> ExitCode {
    let Some(last) = report.last_attempted() else {
        return ExitCode::SUCCESS;
    };
    if report.succeeded() {
        return ExitCode::SUCCESS;
    }
    match last.output.as_ref().and_then(|output| output.exit_code) {
        Some(code) if (1..=255).contains(&code) => ExitCode::from(code as u8),
        _ => ExitCode::FAILURE,
    }
}
