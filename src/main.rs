//! `task-swarm` command line: run an agent against a workspace, or manage
//! the task queue directly.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use task_swarm::agent::breakdown::BreakdownExecutor;
use task_swarm::agent::handler::HandlerExecutor;
use task_swarm::agent::planning::PlanningExecutor;
use task_swarm::agent::recovery::RecoveryExecutor;
use task_swarm::agent::terminal::TerminalExecutor;
use task_swarm::agent::{AgentExecutor, AgentLoop};
use task_swarm::audit::{AuditSink, GitAuditLog, NullAuditSink};
use task_swarm::config::SwarmConfig;
use task_swarm::store::claim::{ClaimStore, MarkerClaimer, OptimisticClaimer};
use task_swarm::store::TaskStore;
use task_swarm::summary::{render_task, StatusSummary};
use task_swarm::types::{generate_task_id, parse_priority, AgentType, TaskRecord, TaskStatus};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "task-swarm", version, about = "Filesystem task queue for autonomous agents")]
struct Cli {
    /// Workspace root directory (created if missing).
    #[arg(long, global = true, default_value = "./workspace")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an agent poll loop until interrupted.
    Run {
        /// Agent role: breakdown, planning, terminal, recovery, or any
        /// role with a configured handler command.
        #[arg(long)]
        role: String,
        /// Agent id; defaults to "{role}-{pid}".
        #[arg(long)]
        agent_id: Option<String>,
        /// Use marker-file claiming instead of optimistic claiming.
        #[arg(long)]
        exclusive: bool,
    },
    /// Create a task.
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Capability tag; "auto" routes through the breakdown agent.
        #[arg(long, default_value = "auto")]
        agent_type: String,
        /// "high", "medium", "low", or 1-5.
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Task ids this task depends on (repeatable).
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
    },
    /// List active tasks, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one task with its recent log.
    Show { task_id: String },
    /// Show counts by status and any stuck tasks.
    Summary,
    /// Cancel a task.
    Cancel { task_id: String },
    /// Move a terminal task to the completed archive.
    Archive { task_id: String },
    /// Send an interrupt signal to an agent about a task.
    Signal {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        task: String,
        #[arg(long, default_value = "operator interrupt")]
        reason: String,
    },
    /// Show recent audit history.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.workspace)
        .with_context(|| format!("cannot create workspace at {}", cli.workspace.display()))?;
    let config = SwarmConfig::load(&cli.workspace)?;

    let audit: Box<dyn AuditSink> = if config.audit {
        Box::new(GitAuditLog::open(
            &cli.workspace,
            &config.commit_prefix,
            config.audit_remote.as_deref(),
        )?)
    } else {
        Box::new(NullAuditSink)
    };
    let store = Arc::new(TaskStore::open(&cli.workspace, audit)?);

    match cli.command {
        Command::Run {
            role,
            agent_id,
            exclusive,
        } => {
            let executor = build_executor(&role, &config)?;
            let agent_id =
                agent_id.unwrap_or_else(|| format!("{}-{}", role, std::process::id()));
            let claimer: Box<dyn ClaimStore> = if exclusive {
                Box::new(MarkerClaimer)
            } else {
                Box::new(OptimisticClaimer)
            };

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
            });

            let mut agent_loop =
                AgentLoop::new(store, claimer, executor, agent_id, config, shutdown_rx);
            agent_loop.run().await?;
        }
        Command::Create {
            title,
            description,
            agent_type,
            priority,
            depends_on,
        } => {
            let task_id = generate_task_id("task");
            let mut task =
                TaskRecord::new(&task_id, &title, &description, AgentType::from(agent_type));
            task.priority = parse_priority(&priority);
            let gated = depends_on
                .iter()
                .any(|dep| !store.dependency_satisfied(dep));
            task.dependencies = depends_on;
            task.status = if gated {
                TaskStatus::Blocked
            } else {
                TaskStatus::Available
            };
            store.create(&task)?;
            println!("{}", task_id);
        }
        Command::List { status } => {
            let wanted = match status.as_deref() {
                Some(s) => Some(
                    TaskStatus::from_str(s)
                        .with_context(|| format!("unknown status: {}", s))?,
                ),
                None => None,
            };
            let tasks = store.list(|t| wanted.is_none_or(|s| t.status == s))?;
            for task in tasks {
                println!(
                    "{:<40} {:<12} {:<16} {}",
                    task.task_id,
                    task.status.as_str(),
                    task.agent_type.as_str(),
                    task.title
                );
            }
        }
        Command::Show { task_id } => {
            let task = store.read(&task_id)?;
            let tail = store.tail_log(&task_id, 20).unwrap_or_default();
            print!("{}", render_task(&task, &tail));
        }
        Command::Summary => {
            let summary = StatusSummary::collect(&store, config.stuck_threshold)?;
            print!("{}", summary);
        }
        Command::Cancel { task_id } => {
            store.cancel(&task_id)?;
            println!("cancelled {}", task_id);
        }
        Command::Archive { task_id } => {
            store.archive(&task_id)?;
            println!("archived {}", task_id);
        }
        Command::Signal {
            agent,
            task,
            reason,
        } => {
            store.send_signal(&agent, &task, &reason)?;
            println!("signalled {} about {}", agent, task);
        }
        Command::History { limit } => {
            for entry in store.audit().history(limit) {
                println!(
                    "{}  {}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.id,
                    entry.message
                );
            }
        }
    }
    Ok(())
}

fn build_executor(role: &str, config: &SwarmConfig) -> anyhow::Result<Box<dyn AgentExecutor>> {
    let executor: Box<dyn AgentExecutor> = match role {
        "breakdown" => Box::new(BreakdownExecutor),
        "planning" => Box::new(PlanningExecutor),
        "terminal" => Box::new(TerminalExecutor::new(config.command_timeout())),
        "recovery" => Box::new(RecoveryExecutor::new(config.stuck_threshold)),
        other => match config.handlers.get(other) {
            Some(command) => Box::new(HandlerExecutor::new(
                other,
                command.clone(),
                config.command_timeout(),
            )),
            None => bail!(
                "unknown role '{}': not built in and no handler configured in swarm.yaml",
                other
            ),
        },
    };
    Ok(executor)
}
