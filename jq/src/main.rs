//! jq - two-lane job queue runner
//!
//! CLI entry point for running simulated job plans through the queue.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jobqueue::cli::{Cli, Command, OutputFormat};
use jobqueue::config::Config;
use jobqueue::{JobEvent, JobPlan, JobQueue, JobStatus, QueueView, StatusLog, StatusRecord};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Logging isn't initialized yet, so nothing here can be traced
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobqueue")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("jq.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            plan,
            format,
            run_for_ms,
            tail,
        } => {
            debug!(plan = %plan.display(), %format, ?run_for_ms, tail, "main: matched Run command");
            cmd_run(&config, &plan, format, run_for_ms.map(Duration::from_millis), tail).await
        }
        Command::Check { plan } => {
            debug!(plan = %plan.display(), "main: matched Check command");
            cmd_check(&plan)
        }
    }
}

/// Validate a plan and list its jobs
fn cmd_check(path: &Path) -> Result<()> {
    let plan = JobPlan::load(path)?;
    for job in &plan.jobs {
        let lane = if job.out_of_band { "oob" } else { "reg" };
        println!("  [{}] {}", lane, job.describe());
    }
    println!("{} {} job(s)", "Plan OK:".green().bold(), plan.len());
    Ok(())
}

/// Submit a plan, print notifications until it settles, then shut the queue down
async fn cmd_run(
    config: &Config,
    path: &Path,
    format: OutputFormat,
    run_for: Option<Duration>,
    tail: usize,
) -> Result<()> {
    let plan = JobPlan::load(path)?;
    if plan.has_repeating() && run_for.is_none() {
        return Err(eyre!(
            "Plan {} has repeating jobs, which never finish on their own; pass --run-for-ms",
            path.display()
        ));
    }

    let queue = JobQueue::spawn(config.queue.clone());
    let status_log = StatusLog::new(config.status_log.capacity);
    let log_task = status_log.spawn(queue.subscribe());
    let printer = tokio::spawn(print_events(queue.subscribe(), format));
    info!(jobs = plan.len(), "Submitting plan {}", path.display());

    let mut jobs = Vec::with_capacity(plan.len());
    let mut cancelers: Vec<JoinHandle<()>> = Vec::new();
    for planned in &plan.jobs {
        let job = queue
            .queue_job(planned.name.clone(), planned.handler(), planned.options())
            .await
            .context(format!("Failed to submit '{}'", planned.name))?;

        if let Some(ms) = planned.cancel_after_ms {
            let queue = queue.clone();
            let job = job.clone();
            cancelers.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                debug!(job = %job.display_name(), "cmd_run: cancel-after elapsed");
                if let Err(e) = queue.cancel_job(&job).await {
                    warn!(job = %job.display_name(), error = %e, "cmd_run: cancel failed");
                }
            }));
        }
        jobs.push(job);
    }

    let all_done = futures::future::join_all(jobs.iter().map(|job| job.completion()));
    match run_for {
        Some(limit) => {
            if tokio::time::timeout(limit, all_done).await.is_err() {
                info!(?limit, "Run time elapsed, canceling remaining jobs");
                let view = QueueView::from_jobs(&queue.jobs().await?);
                if format == OutputFormat::Text && !view.is_empty() {
                    println!("{}", "Still tracked at cutoff:".bold());
                    println!("{}", view);
                }
            }
        }
        None => {
            all_done.await;
        }
    }

    queue.shutdown().await.context("Failed to shut down queue")?;
    for canceler in cancelers {
        canceler.abort();
        let _ = canceler.await;
    }
    // Last bus sender goes with the handle, which ends both subscribers
    drop(queue);
    let _ = printer.await;
    let _ = log_task.await;

    let mut failed = 0;
    for job in &jobs {
        let Some(outcome) = job.completion().await else {
            continue;
        };
        if outcome.status == JobStatus::Failed {
            failed += 1;
        }
        match format {
            OutputFormat::Json => {
                let line = serde_json::json!({
                    "name": job.display_name(),
                    "status": outcome.status,
                    "status-text": outcome.status_text,
                    "attempts": outcome.attempts,
                });
                println!("{}", line);
            }
            OutputFormat::Text => {
                println!(
                    "{:<16} {} ({} attempt(s))",
                    job.display_name(),
                    paint(outcome.status, &outcome.status_text, false),
                    outcome.attempts
                );
            }
        }
    }

    if format == OutputFormat::Text && tail > 0 {
        println!("{}", format!("Status log (last {} of {}):", tail.min(status_log.len()), status_log.len()).bold());
        for record in status_log.tail(tail) {
            println!("  {}", record);
        }
    }

    info!(jobs = jobs.len(), failed, "Plan finished");
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<JobEvent>, format: OutputFormat) {
    loop {
        match rx.recv().await {
            Ok(event) => print_record(&event.to_record(), format),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "print_events: lagged behind the bus");
                eprintln!("... {} notification(s) dropped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_record(record: &StatusRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "print_record: failed to serialize"),
        },
        OutputFormat::Text => {
            let previous = record.previous.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
            println!(
                "{} {:<16} {:>9} -> {}",
                record.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
                record.display_name,
                previous,
                paint(record.status, &record.status_text, record.transient),
            );
        }
    }
}

fn paint(status: JobStatus, text: &str, transient: bool) -> colored::ColoredString {
    match status {
        JobStatus::Failed if transient => format!("{} [will retry]", text).yellow(),
        JobStatus::Failed => text.red(),
        JobStatus::Succeeded => text.green(),
        JobStatus::Canceled => text.yellow(),
        JobStatus::Running => text.cyan(),
        JobStatus::Queued => text.normal(),
    }
}
