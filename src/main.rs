//! # CSVSync: CSV import scheduler
//!
//! Pulls CSV exports from Dropbox or Gmail on cron schedules, stages them,
//! records history and raises alerts on failure.
//!
//! Usage:
//!   csvsync run                          # Start the scheduler until Ctrl-C
//!   csvsync schedules list               # Show configured schedules
//!   csvsync import daily-employees       # Run one schedule now
//!   csvsync cron check "*/15 * * * *"    # Validate an expression

mod staging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use csvsync_core::{ConfigStore, JobDefinition};
use csvsync_scheduler::{
    AutoBackup, CronSchedule, HistoryFilter, ImportAlerter, ImportExecutor, ImportScheduler,
    ImportStatus, ScheduleAdmin, SchedulerDeps, parse_timezone, validate_schedule,
};
use csvsync_storage::{ConfigTokenStore, DefaultProviderFactory, ProviderFactory, TokenStore};
use tracing_subscriber::EnvFilter;

use crate::staging::StagingArea;

/// How often `run` checks the config file for external edits.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "csvsync", version, about = "⏰ CSVSync: scheduled CSV imports from Dropbox and Gmail")]
struct Cli {
    /// Config file (default: $CSVSYNC_CONFIG or ~/.csvsync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler daemon
    Run,
    /// Manage schedules
    Schedules {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Run one schedule now (single attempt)
    Import {
        /// Schedule id
        id: String,
    },
    /// Show import history, newest first
    History {
        /// PENDING, COMPLETED or FAILED
        #[arg(long)]
        status: Option<String>,
        /// Only this schedule
        #[arg(long)]
        schedule: Option<String>,
        #[arg(long, default_value = "100")]
        limit: u32,
        #[arg(long, default_value = "0")]
        offset: u32,
    },
    /// Cron expression helpers
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
    /// Config maintenance
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List schedules
    List,
    /// Add a schedule from a TOML file holding one job definition
    Add { file: PathBuf },
    /// Remove a schedule
    Remove { id: String },
    /// Enable a schedule
    Enable { id: String },
    /// Disable a schedule
    Disable { id: String },
}

#[derive(Subcommand)]
enum CronAction {
    /// Validate an expression and show its next fire times
    Check { expression: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Drop legacy credential keys whose namespaced copies are complete
    CleanupLegacy,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "csvsync=debug,csvsync_scheduler=debug,csvsync_storage=debug,csvsync_core=debug"
    } else {
        "csvsync=info,csvsync_scheduler=info,csvsync_storage=info,csvsync_core=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

/// Wire the scheduler to the real providers and the staging area.
fn build_scheduler(store: ConfigStore) -> Result<ImportScheduler> {
    let config = store.load()?;
    let data_dir = config.scheduler.data_dir_path();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let history_path = config.scheduler.history_db_path();
    let history = Arc::new(
        csvsync_scheduler::ImportHistory::open(&history_path).map_err(|e| anyhow::anyhow!("{e}"))?,
    );
    let tokens: Arc<dyn TokenStore> = Arc::new(ConfigTokenStore::new(store.clone(), &config.storage.options));
    let providers: Arc<dyn ProviderFactory> = Arc::new(DefaultProviderFactory::new(data_dir.join("storage")));
    let staging = Arc::new(StagingArea::new(data_dir.join("staging"), history_path));

    Ok(ImportScheduler::new(SchedulerDeps {
        config_store: store,
        runner: Arc::new(ImportExecutor::new(providers.clone(), staging.clone(), tokens.clone())),
        history: history.clone(),
        alerter: Arc::new(ImportAlerter::from_config(&config.alerts, history.clone())),
        backup: Some(Arc::new(AutoBackup::new(staging.clone(), history))),
        retention: Some(staging),
        providers,
        tokens,
    }))
}

fn modified_at(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn run_daemon(scheduler: ImportScheduler) -> Result<()> {
    scheduler.start()?;
    let config_path = scheduler.config_store().path().to_path_buf();
    let mut last_seen = modified_at(&config_path);
    let mut last_config = scheduler.config_store().load().ok();
    let mut poll = tokio::time::interval(CONFIG_POLL_INTERVAL);
    poll.tick().await;

    println!("⏰ CSVSync scheduler running ({} schedule(s)). Ctrl-C to stop.", scheduler.registered_jobs().len());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                let current = modified_at(&config_path);
                if current != last_seen {
                    last_seen = current;
                    match scheduler.config_store().load() {
                        Err(e) => tracing::warn!("⚠️ Config unreadable, keeping current schedules: {}", e),
                        Ok(next) if last_config.as_ref().is_some_and(|prev| prev.same_schedules(&next)) => {
                            tracing::debug!("Config changed outside schedules, no reload needed");
                            last_config = Some(next);
                        }
                        Ok(next) => {
                            tracing::info!("🔄 Config changed, reloading schedules");
                            if let Err(e) = scheduler.reload() {
                                tracing::error!("❌ Reload failed: {}", e);
                            }
                            last_config = Some(next);
                        }
                    }
                }
            }
        }
    }

    scheduler.stop();
    println!("👋 Scheduler stopped");
    Ok(())
}

fn print_schedules(jobs: &[JobDefinition]) {
    if jobs.is_empty() {
        println!("No schedules configured.");
        return;
    }
    for job in jobs {
        let state = if job.enabled { "✅" } else { "⏸️" };
        let targets: Vec<String> = job
            .resolved_targets()
            .iter()
            .map(|t| format!("{}={}", t.data_type, t.source))
            .collect();
        println!("{state} {:<24} {:<16} {}", job.id, job.schedule, targets.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    let store = match &cli.config {
        Some(path) => ConfigStore::new(shellexpand::tilde(path).into_owned()),
        None => ConfigStore::new(ConfigStore::default_path()),
    };

    match cli.command {
        Commands::Run => run_daemon(build_scheduler(store)?).await?,
        Commands::Schedules { action } => {
            let admin = ScheduleAdmin::new(build_scheduler(store)?);
            match action {
                ScheduleAction::List => print_schedules(&admin.list_schedules()?),
                ScheduleAction::Add { file } => {
                    let content = std::fs::read_to_string(&file)
                        .with_context(|| format!("reading {}", file.display()))?;
                    let job: JobDefinition = toml::from_str(&content)
                        .with_context(|| format!("parsing {}", file.display()))?;
                    let added = admin.add_schedule(job)?;
                    println!("✅ Added schedule '{}'", added.id);
                }
                ScheduleAction::Remove { id } => {
                    admin.delete_schedule(&id)?;
                    println!("🗑️ Removed schedule '{id}'");
                }
                ScheduleAction::Enable { id } => {
                    admin.set_enabled(&id, true)?;
                    println!("✅ Enabled '{id}'");
                }
                ScheduleAction::Disable { id } => {
                    admin.set_enabled(&id, false)?;
                    println!("⏸️ Disabled '{id}'");
                }
            }
        }
        Commands::Import { id } => {
            let scheduler = build_scheduler(store)?;
            let summary = scheduler.run_import(&id).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::History {
            status,
            schedule,
            limit,
            offset,
        } => {
            let status = match status.as_deref() {
                Some(s) => Some(
                    ImportStatus::parse(s).ok_or_else(|| anyhow::anyhow!("unknown status '{s}'"))?,
                ),
                None => None,
            };
            let admin = ScheduleAdmin::new(build_scheduler(store)?);
            let records = admin.get_history(&HistoryFilter {
                status,
                schedule_id: schedule,
                limit,
                offset,
                ..Default::default()
            })?;
            for r in &records {
                println!(
                    "{} {:<9} {:<24} {}{}",
                    r.started_at.format("%Y-%m-%d %H:%M:%S"),
                    r.status.as_str(),
                    r.schedule_id,
                    r.id,
                    r.error_message
                        .as_deref()
                        .map(|e| format!("  ({e})"))
                        .unwrap_or_default()
                );
            }
            if records.is_empty() {
                println!("No history records.");
            }
        }
        Commands::Cron {
            action: CronAction::Check { expression },
        } => {
            validate_schedule(&expression).map_err(|e| anyhow::anyhow!("{e}"))?;
            let tz = parse_timezone(&store.load()?.scheduler.timezone);
            let schedule = CronSchedule::parse(&expression, tz).map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("✅ '{}' is valid ({})", schedule.expression(), tz);
            for t in schedule.upcoming(chrono::Utc::now(), 5) {
                println!("   {}", t.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"));
            }
        }
        Commands::Config {
            action: ConfigAction::CleanupLegacy,
        } => {
            let report = store.cleanup_legacy_keys()?;
            if report.removed.is_empty() {
                println!("Nothing to clean up.");
            } else {
                println!("🧹 Removed: {}", report.removed.join(", "));
            }
        }
    }

    Ok(())
}
