//! cadence - command-line front end for the task scheduler.

mod config;
mod notify;
mod output;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, bail};
use cadence_core::domain::{format_due_date, parse_due_date};
use cadence_core::impls::{LogNotifier, RunnerLock, SimulatedExecutor, SqliteTaskStore};
use cadence_core::ports::{Notifier, TaskFilter, TaskSort};
use cadence_core::{Category, DispatchMode, Scheduler, SchedulerBuilder, TaskId, TaskStatus};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LogConfig};
use crate::notify::EmailNotifier;

#[derive(Parser, Debug)]
#[command(name = "cadence", version, about = "Priority task scheduler with a bounded worker pool")]
struct Cli {
    /// Path to the config file (defaults to ./cadence.toml when present).
    #[arg(long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Task database, overrides `store.path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a new task.
    Add {
        name: String,
        /// 1 (highest) to 10 (lowest).
        #[arg(allow_negative_numbers = true)]
        priority: i64,
        /// Due date, "YYYY-MM-DD HH:MM" (UTC).
        due: String,
        #[arg(long, default_value = "general")]
        category: Category,
    },

    /// List tasks.
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long, value_enum, default_value_t = SortArg::Id)]
        sort: SortArg,
        #[arg(long)]
        json: bool,
    },

    /// Show one task.
    #[command(alias = "view")]
    Show {
        id: TaskId,
        #[arg(long)]
        json: bool,
    },

    /// Change the due date (and optionally the priority) of a pending task.
    Reschedule {
        id: TaskId,
        due: String,
        #[arg(long, allow_negative_numbers = true)]
        priority: Option<i64>,
    },

    /// Cancel a task. A running task is cancelled once its body returns.
    Cancel { id: TaskId },

    /// Delete a task that is not running.
    Delete {
        id: TaskId,
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },

    /// Run one scheduling cycle and wait for it to finish.
    Run {
        /// Dispatch every pending task, not only the ones already due.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Task counts per status.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Id,
    Priority,
    Due,
}

impl From<SortArg> for TaskSort {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Id => TaskSort::Id,
            SortArg::Priority => TaskSort::Priority,
            SortArg::Due => TaskSort::DueDate,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "command failed");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }
    if let Command::Run { all, workers, .. } = &cli.command {
        if *all {
            config.scheduler.dispatch_mode = DispatchMode::All;
        }
        if let Some(workers) = workers {
            config.scheduler.workers = *workers;
        }
    }
    init_tracing(&config.log)?;

    let path = &config.store.path;
    let store = SqliteTaskStore::open(path)
        .with_context(|| format!("opening task database {}", path.display()))?;
    // Held until the scheduler has shut down.
    let _runner = match cli.command {
        Command::Run { .. } => Some(claim_runner(&store, path).await?),
        _ => None,
    };

    let scheduler = start_scheduler(store, &config)?;
    let result = execute(&scheduler, cli.command).await;
    scheduler.shutdown().await;
    result
}

/// Only one `cadence run` per database. The holder closes out tasks a
/// crashed run left `running`; other commands never touch them.
async fn claim_runner(store: &SqliteTaskStore, path: &Path) -> anyhow::Result<RunnerLock> {
    let Some(lock) = RunnerLock::try_acquire(path)
        .with_context(|| format!("locking task database {}", path.display()))?
    else {
        bail!("another cadence run is in progress against {}", path.display());
    };
    let recovered = store.recover_interrupted(&lock).await?;
    if recovered > 0 {
        tracing::info!(recovered, lock = %lock.path().display(), "claimed task database");
    }
    Ok(lock)
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .with_context(|| format!("invalid log level {:?}", log.level))?;

    match &log.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn start_scheduler(store: SqliteTaskStore, config: &AppConfig) -> anyhow::Result<Scheduler> {
    let executor = SimulatedExecutor::new(
        Duration::from_millis(config.executor.min_duration_ms),
        Duration::from_millis(config.executor.max_duration_ms),
    )
    .with_failure_rate(config.executor.failure_rate);

    let notifier: Arc<dyn Notifier> = match &config.email {
        Some(email) => Arc::new(EmailNotifier::from_config(email).context("configuring email")?),
        None => Arc::new(LogNotifier),
    };

    let scheduler = SchedulerBuilder::new(Arc::new(store), Arc::new(executor))
        .config(config.scheduler.clone())
        .notifier(notifier)
        .start()?;
    Ok(scheduler)
}

async fn execute(scheduler: &Scheduler, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Add {
            name,
            priority,
            due,
            category,
        } => {
            let due = parse_due_date(&due)?;
            let id = scheduler.submit(name, priority, due, category).await?;
            println!("added task {id}");
        }

        Command::List {
            status,
            category,
            sort,
            json,
        } => {
            let filter = TaskFilter {
                status,
                category,
                due_by: None,
                sort: sort.into(),
            };
            let tasks = scheduler.list(&filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print!("{}", output::task_table(&tasks));
            }
        }

        Command::Show { id, json } => {
            let task = scheduler.status_of(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print!("{}", output::task_detail(&task));
            }
        }

        Command::Reschedule { id, due, priority } => {
            let due = parse_due_date(&due)?;
            let task = scheduler.reschedule(id, due, priority).await?;
            println!(
                "task {id} due {} priority {}",
                format_due_date(&task.due_date),
                task.priority
            );
        }

        Command::Cancel { id } => {
            let task = scheduler.cancel(id).await?;
            match task.status {
                TaskStatus::Running => {
                    println!("task {id} is running; it will be cancelled when it finishes")
                }
                _ => println!("task {id} cancelled"),
            }
        }

        Command::Delete { id, yes } => {
            let task = scheduler.status_of(id).await?;
            if !yes && !confirm(&format!("delete task {id} ({})?", task.name))? {
                bail!("aborted");
            }
            scheduler.delete(id).await?;
            println!("task {id} deleted");
        }

        Command::Run { json, .. } => {
            let summary = scheduler.run_cycle().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", output::cycle(&summary));
            }
        }

        Command::Stats { json } => {
            let counts = scheduler.counts().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                print!("{}", output::counts(&counts));
            }
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
