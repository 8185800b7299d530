//! xlrefresh: command-line front end.
//!
//! Most subcommands talk to a running `xlrefresh-api` server. `run-local`
//! runs one refresh batch in this process against the local registry.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use xlrefresh_api::client::ApiClient;
use xlrefresh_core::{
    defaults, BatchSummary, EventBus, FileOutcome, FileReport, PostPass, RefreshEvent,
    RefreshSettings, RunRecord, SettingsUpdate, WaitKind,
};
use xlrefresh_db::{Database, SeedList};
use xlrefresh_jobs::{BatchOrchestrator, BridgeConfig, BridgeEngine, OrchestratorConfig, RefreshEngine};

#[derive(Parser)]
#[command(name = "xlrefresh")]
#[command(author, version, about = "Sequential recalculation of registered spreadsheets")]
#[command(propagate_version = true)]
struct Cli {
    /// Base URL of the xlrefresh API server
    #[arg(long, global = true, env = "XLREFRESH_API_URL", default_value = defaults::API_URL)]
    api_url: String,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is reachable
    Status,

    /// List registered files
    List,

    /// Register a file
    Add {
        /// Full path of the spreadsheet
        path: String,
    },

    /// Replace the path of a registered file
    Update {
        /// Registry id
        id: i64,
        /// New full path
        path: String,
    },

    /// Remove a file from the registry
    Delete {
        /// Registry id
        id: i64,
    },

    /// Show the refresh settings
    Settings,

    /// Replace the refresh settings
    Set {
        /// Seconds to wait after recalculation before saving
        #[arg(allow_negative_numbers = true)]
        refresh_delay: i64,
        /// Seconds to pause between files
        #[arg(allow_negative_numbers = true)]
        inter_file_delay: i64,
    },

    /// Start a refresh run on the server
    Refresh {
        /// Wait for the run to finish and print its summary
        #[arg(short, long)]
        wait: bool,
    },

    /// Show run history, or one run
    Runs {
        /// Run id
        id: Option<Uuid>,
    },

    /// Cancel the active run
    Cancel,

    /// Populate the registry from the server's seed list
    Init,

    /// Run one refresh batch in this process
    RunLocal {
        /// Seconds to wait after recalculation before saving
        #[arg(long, default_value_t = RefreshSettings::terminal().refresh_delay as i64, allow_negative_numbers = true)]
        refresh_delay: i64,
        /// Seconds to pause between files
        #[arg(long, default_value_t = RefreshSettings::terminal().inter_file_delay as i64, allow_negative_numbers = true)]
        inter_file_delay: i64,
        /// Registry database
        #[arg(long, env = "DATABASE_URL", default_value = defaults::DATABASE_URL)]
        database_url: String,
        /// Seed list supplying the master file when MASTER_FILE is unset
        #[arg(long, env = "SEED_FILE")]
        seed_file: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = ApiClient::new(&cli.api_url);

    match cli.command {
        Commands::Status => {
            let version = client.health().await?;
            println!("Server {} is running (version {})", client.base_url(), version);
        }
        Commands::List => {
            let entries = client.list_files().await?;
            if entries.is_empty() {
                println!("No files registered.");
            }
            for entry in entries {
                println!("{:>4}  {}", entry.id, entry.path);
            }
        }
        Commands::Add { path } => {
            let entry = client.add_file(&path).await?;
            println!("Registered {} as {}", entry.path, entry.id);
        }
        Commands::Update { id, path } => {
            let entry = client.update_file(id, &path).await?;
            println!("Updated {} to {}", entry.id, entry.path);
        }
        Commands::Delete { id } => {
            client.delete_file(id).await?;
            println!("Deleted {}", id);
        }
        Commands::Settings => {
            let s = client.get_settings().await?;
            println!("refresh_delay:    {}s", s.refresh_delay);
            println!("inter_file_delay: {}s", s.inter_file_delay);
        }
        Commands::Set {
            refresh_delay,
            inter_file_delay,
        } => {
            let s = client.set_settings(refresh_delay, inter_file_delay).await?;
            println!(
                "Settings updated: refresh_delay={}s inter_file_delay={}s",
                s.refresh_delay, s.inter_file_delay
            );
        }
        Commands::Refresh { wait } => {
            let record = client.run_refresh().await?;
            println!("Started run {}", record.id);
            if wait {
                let finished = client.wait_for_run(record.id, Duration::from_secs(2)).await?;
                print_run(&finished);
            }
        }
        Commands::Runs { id: Some(id) } => {
            print_run(&client.get_run(id).await?);
        }
        Commands::Runs { id: None } => {
            let runs = client.list_runs().await?;
            if runs.is_empty() {
                println!("No runs yet.");
            }
            for run in runs {
                println!(
                    "{}  {:<9}  {}",
                    run.id,
                    format!("{:?}", run.status).to_lowercase(),
                    run.started_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Cancel => {
            let id = client.cancel_run().await?;
            println!("Cancellation requested for run {}", id);
        }
        Commands::Init => {
            let report = client.init_db().await?;
            println!(
                "Registry initialized: {} added, {} already present",
                report.added, report.already_present
            );
        }
        Commands::RunLocal {
            refresh_delay,
            inter_file_delay,
            database_url,
            seed_file,
        } => {
            run_local(
                SettingsUpdate {
                    refresh_delay,
                    inter_file_delay,
                },
                &database_url,
                seed_file,
            )
            .await?;
        }
    }
    Ok(())
}

async fn run_local(
    update: SettingsUpdate,
    database_url: &str,
    seed_file: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let settings = update.validate()?;

    let db = Database::connect(database_url).await?;
    db.ensure_schema().await?;

    let mut config = OrchestratorConfig::from_env();
    if config.master_file.is_none() {
        if let Some(path) = seed_file {
            if let Some(master) = SeedList::load(path).await?.master_file {
                config = config.with_master_file(master);
            }
        }
    }

    let bridge = BridgeConfig::from_env();
    let step_timeout = bridge.step_timeout;
    let engine = RefreshEngine::new(Arc::new(BridgeEngine::new(bridge))).with_step_timeout(step_timeout);
    let events = EventBus::default();
    let orchestrator = BatchOrchestrator::new(Arc::new(db.paths.clone()), engine, config, events.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current step...");
            on_signal.cancel();
        }
    });

    let mut rx = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(envelope) = rx.recv().await {
            let done = matches!(envelope.payload, RefreshEvent::RunFinished { .. });
            print_event(&envelope.payload);
            if done {
                break;
            }
        }
    });

    println!(
        "Refreshing with refresh_delay={}s inter_file_delay={}s",
        settings.refresh_delay, settings.inter_file_delay
    );
    let summary = orchestrator.run(Uuid::now_v7(), settings, &cancel).await?;
    let _ = printer.await;
    print_summary(&summary);
    Ok(())
}

fn print_event(event: &RefreshEvent) {
    match event {
        RefreshEvent::RunStarted { file_count, .. } => println!("{} file(s) to refresh", file_count),
        RefreshEvent::FileStarted { index, path, .. } => println!("[{}] {}", index + 1, path),
        RefreshEvent::FileFinished { report, .. } => println!("    {}", describe(report)),
        RefreshEvent::Waiting { kind, seconds, .. } => match kind {
            WaitKind::InterFile => println!("    waiting {}s", seconds),
            WaitKind::Settle => println!("Settling {}s before the master file", seconds),
        },
        RefreshEvent::PostPassStarted {
            path, macro_name, ..
        } => println!("Master file {} (macro {})", path, macro_name),
        RefreshEvent::PostPassSkipped { reason, .. } => {
            println!("Master-file pass skipped: {}", reason)
        }
        RefreshEvent::RunFinished { .. } => {}
    }
}

fn describe(report: &FileReport) -> String {
    match &report.outcome {
        FileOutcome::Succeeded => format!("saved ({} ms)", report.duration_ms),
        FileOutcome::NotFound => "file not found".to_string(),
        FileOutcome::EngineFault { stage, cause } => format!("failed during {}: {}", stage, cause),
        FileOutcome::Cancelled => "cancelled, not saved".to_string(),
    }
}

fn print_run(run: &RunRecord) {
    println!("Run {}", run.id);
    println!("  status:   {:?}", run.status);
    println!(
        "  settings: refresh_delay={}s inter_file_delay={}s",
        run.settings.refresh_delay, run.settings.inter_file_delay
    );
    if let Some(error) = &run.error {
        println!("  error:    {}", error);
    }
    if let Some(summary) = &run.summary {
        print_summary(summary);
    }
}

fn print_summary(summary: &BatchSummary) {
    for report in &summary.files {
        println!("  {}  {}", report.path, describe(report));
    }
    println!(
        "  {} succeeded, {} failed, {} skipped of {}{}",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.total,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    match &summary.post_pass {
        PostPass::NotReached => {}
        PostPass::Skipped { reason } => println!("  master file: skipped ({})", reason),
        PostPass::Ran { report } => println!("  master file: {}", describe(report)),
    }
}
