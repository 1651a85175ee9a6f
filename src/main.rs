//! cadence - scheduled SQL pipelines with durable job tracking.
//!
//! Usage:
//!   cadence run                 Run the scheduler
//!   cadence validate            Validate pipeline definitions without running
//!   cadence list                List the loaded pipelines
//!   cadence trigger <PIPELINE>  Run one pipeline now and wait for it
//!   cadence jobs <PIPELINE>     Show recent job records of a pipeline
//!   cadence stale               Show RUNNING jobs older than the stale threshold

use cadence::api::{create_api_state, start_server};
use cadence::config::{BackendSettings, StorageSettings};
use cadence::repository::stale_jobs;
use cadence::{
    DryRunBackend, ExecutionBackend, InMemoryJobRepository, JobRepository, MySqlBackend,
    PipelineName, PipelineRegistry, RunOutcome, Scheduler, Settings, SqliteJobRepository,
    load_pipelines,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// cadence - scheduled SQL pipelines with durable job tracking
#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory with one sub-directory per pipeline
    #[arg(long, global = true, env = "CADENCE_PIPELINES_DIR")]
    pipelines_dir: Option<PathBuf>,

    /// MySQL URL; switches statement execution to MySQL
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler
    Run {
        /// Scheduler tick interval in milliseconds
        #[arg(long)]
        tick_interval_ms: Option<u64>,
    },

    /// Validate pipeline definitions without running
    Validate,

    /// List the loaded pipelines
    List,

    /// Run one pipeline now and wait for it to finish
    Trigger {
        /// Pipeline name
        #[arg(value_name = "PIPELINE")]
        pipeline: String,
    },

    /// Show recent job records of a pipeline
    Jobs {
        /// Pipeline name
        #[arg(value_name = "PIPELINE")]
        pipeline: String,

        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show RUNNING jobs older than the stale threshold
    Stale {
        /// Override the threshold from the settings file, in seconds
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> CliResult {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli)?;

    match cli.command {
        Commands::Run { tick_interval_ms } => {
            if let Some(ms) = tick_interval_ms {
                settings.tick_interval_ms = ms;
                settings.validate()?;
            }
            with_repository(&settings, Action::Run).await?;
        }
        Commands::Validate => {
            validate_pipelines(&settings)?;
        }
        Commands::List => {
            list_pipelines(&settings)?;
        }
        Commands::Trigger { pipeline } => {
            with_repository(&settings, Action::Trigger(pipeline)).await?;
        }
        Commands::Jobs { pipeline, limit } => {
            with_repository(&settings, Action::Jobs { pipeline, limit }).await?;
        }
        Commands::Stale { older_than_secs } => {
            if let Some(secs) = older_than_secs {
                settings.stale_after_secs = secs;
            }
            with_repository(&settings, Action::Stale).await?;
        }
    }

    Ok(())
}

/// Settings file, then CLI and environment overrides.
fn load_settings(cli: &Cli) -> CliResult<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    if let Some(dir) = &cli.pipelines_dir {
        settings.pipelines_dir = dir.clone();
    }
    if let Some(url) = &cli.database_url {
        let max_connections = match &settings.backend {
            BackendSettings::Mysql {
                max_connections, ..
            } => *max_connections,
            BackendSettings::DryRun => 5,
        };
        settings.backend = BackendSettings::Mysql {
            url: url.clone(),
            max_connections,
        };
    }

    settings.validate()?;
    Ok(settings)
}

/// Commands that need a job repository.
enum Action {
    Run,
    Trigger(String),
    Jobs { pipeline: String, limit: usize },
    Stale,
}

/// Open the configured repository and run `action` against it.
async fn with_repository(settings: &Settings, action: Action) -> CliResult {
    match &settings.storage {
        StorageSettings::Memory => {
            if matches!(action, Action::Jobs { .. } | Action::Stale) {
                warn!("in-memory storage keeps no job history; configure sqlite storage");
            }
            dispatch(settings, Arc::new(InMemoryJobRepository::new()), action).await
        }
        StorageSettings::Sqlite { path } => {
            let repository = Arc::new(SqliteJobRepository::new(path).await?);
            let result = dispatch(settings, Arc::clone(&repository), action).await;
            repository.close().await;
            result
        }
    }
}

async fn dispatch<R: JobRepository + 'static>(
    settings: &Settings,
    repository: Arc<R>,
    action: Action,
) -> CliResult {
    match action {
        Action::Run => run_scheduler(settings, repository).await,
        Action::Trigger(pipeline) => trigger_pipeline(settings, repository, pipeline).await,
        Action::Jobs { pipeline, limit } => show_jobs(repository.as_ref(), pipeline, limit).await,
        Action::Stale => show_stale(settings, repository.as_ref()).await,
    }
}

async fn open_backend(settings: &Settings) -> CliResult<Arc<dyn ExecutionBackend>> {
    match &settings.backend {
        BackendSettings::DryRun => {
            info!("using dry-run backend, statements will be logged but not executed");
            Ok(Arc::new(DryRunBackend::new()))
        }
        BackendSettings::Mysql {
            url,
            max_connections,
        } => Ok(Arc::new(MySqlBackend::connect(url, *max_connections).await?)),
    }
}

fn build_scheduler<R: JobRepository + 'static>(
    settings: &Settings,
    repository: Arc<R>,
    backend: Arc<dyn ExecutionBackend>,
    registry: &PipelineRegistry,
) -> CliResult<Scheduler<R>> {
    let mut scheduler = Scheduler::new(repository, backend)
        .with_tick_interval(settings.tick_interval())
        .with_shutdown_timeout(settings.shutdown_timeout())
        .with_window_policy(settings.window_policy()?);
    scheduler.register_all(registry)?;
    Ok(scheduler)
}

/// Run the scheduler until Ctrl+C.
async fn run_scheduler<R: JobRepository + 'static>(
    settings: &Settings,
    repository: Arc<R>,
) -> CliResult {
    info!(dir = %settings.pipelines_dir.display(), "loading pipelines");
    let registry = load_pipelines(&settings.pipelines_dir)?;

    if registry.is_empty() {
        warn!(dir = %settings.pipelines_dir.display(), "no pipelines found");
        return Ok(());
    }

    warn_stale_jobs(settings, repository.as_ref()).await;

    let backend = open_backend(settings).await?;
    let scheduler = build_scheduler(settings, Arc::clone(&repository), backend, &registry)?;

    info!(tick_interval = ?settings.tick_interval(), "starting scheduler, press Ctrl+C to stop");
    let (handle, scheduler_task) = scheduler.start().await;

    let server = match &settings.api {
        Some(api) => {
            let state = create_api_state(handle.clone(), Arc::clone(&repository));
            Some(start_server(api, state).await?)
        }
        None => None,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("scheduler stopped");
        }
    }

    if let Some(server) = server {
        server.abort();
    }
    Ok(())
}

fn stale_cutoff(settings: &Settings) -> DateTime<Utc> {
    let threshold =
        chrono::Duration::from_std(settings.stale_after()).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(threshold)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Report jobs left RUNNING by an earlier process.
async fn warn_stale_jobs<R: JobRepository>(settings: &Settings, repository: &R) {
    let cutoff = stale_cutoff(settings);
    match stale_jobs(repository, cutoff).await {
        Ok(jobs) => {
            for job in jobs {
                warn!(
                    pipeline = %job.pipeline,
                    job_id = %job.id,
                    created_at = %job.created_at,
                    "suspect job: still RUNNING past the stale threshold"
                );
            }
        }
        Err(e) => warn!(error = %e, "could not check for stale jobs"),
    }
}

/// Validate pipeline definitions without running.
fn validate_pipelines(settings: &Settings) -> CliResult {
    info!(dir = %settings.pipelines_dir.display(), "validating pipelines");

    match load_pipelines(&settings.pipelines_dir) {
        Ok(registry) => {
            info!("all {} pipeline(s) are valid", registry.len());
            for definition in registry.iter() {
                info!(pipeline = %definition.name(), "OK");
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "validation failed");
            Err(e.into())
        }
    }
}

/// List the loaded pipelines.
fn list_pipelines(settings: &Settings) -> CliResult {
    let registry = load_pipelines(&settings.pipelines_dir)?;

    if registry.is_empty() {
        println!("No pipelines found in {}", settings.pipelines_dir.display());
        return Ok(());
    }

    println!("Pipelines in {}:", settings.pipelines_dir.display());
    println!();

    for definition in registry.iter() {
        println!("Name: {}", definition.name());
        println!(
            "  Schedule: {}",
            definition.schedule().unwrap_or("manual only")
        );
        let window_days = definition
            .window()
            .map(|w| w.size_days())
            .unwrap_or(settings.window_days);
        println!("  Window: {} day(s)", window_days);
        if !definition.options().is_empty() {
            let keys: Vec<&str> = definition.options().keys().map(String::as_str).collect();
            println!("  Options: {}", keys.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Run one pipeline now and wait for its report.
async fn trigger_pipeline<R: JobRepository + 'static>(
    settings: &Settings,
    repository: Arc<R>,
    pipeline: String,
) -> CliResult {
    let registry = load_pipelines(&settings.pipelines_dir)?;

    if !registry.contains(&PipelineName::new(pipeline.as_str())) {
        let available: Vec<&str> = registry.names().map(PipelineName::as_str).collect();
        error!(pipeline = %pipeline, available = %available.join(", "), "pipeline not found");
        return Err(format!("pipeline '{}' not found", pipeline).into());
    }

    let backend = open_backend(settings).await?;
    let scheduler = build_scheduler(settings, repository, backend, &registry)?;
    let (handle, _scheduler_task) = scheduler.start().await;

    // Only the manual run should happen in this process
    handle.pause().await?;
    let result = handle.run_now(pipeline.as_str()).await;
    handle.shutdown().await?;

    let report = result?;
    println!("Job:      {}", report.job_id);
    println!("Window:   {}", report.window);
    println!("Duration: {:.3}s", report.duration_secs);
    match &report.outcome {
        RunOutcome::Succeeded => {
            println!("Status:   SUCCEEDED ({})", report.outcome.message());
            Ok(())
        }
        RunOutcome::Failed(message) => {
            println!("Status:   FAILED ({})", message);
            Err(format!("pipeline '{}' failed: {}", pipeline, message).into())
        }
    }
}

/// Show recent job records of a pipeline.
async fn show_jobs<R: JobRepository>(repository: &R, pipeline: String, limit: usize) -> CliResult {
    let jobs = repository
        .list_jobs(&PipelineName::new(pipeline.as_str()), limit)
        .await?;

    if jobs.is_empty() {
        println!("No jobs recorded for {}", pipeline);
        return Ok(());
    }

    for job in jobs {
        let duration = job
            .duration_secs
            .map(|d| format!("{:.3}s", d))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<9}  {} .. {}  {:>9}  {}",
            job.id,
            job.status.as_str(),
            job.window_from.format("%Y-%m-%d"),
            job.window_to.format("%Y-%m-%d"),
            duration,
            job.message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Show RUNNING jobs older than the stale threshold.
async fn show_stale<R: JobRepository>(settings: &Settings, repository: &R) -> CliResult {
    let cutoff = stale_cutoff(settings);
    let jobs = stale_jobs(repository, cutoff).await?;

    if jobs.is_empty() {
        println!("No RUNNING jobs older than {}", cutoff.to_rfc3339());
        return Ok(());
    }

    println!("RUNNING jobs opened before {}:", cutoff.to_rfc3339());
    for job in jobs {
        println!(
            "{}  {}  opened {}",
            job.id,
            job.pipeline,
            job.created_at.to_rfc3339()
        );
    }
    Ok(())
}
