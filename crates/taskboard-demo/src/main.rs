//! taskboard-demo: a process declaring `ping` tasks and watching them
//! through the console.
//!
//! The process owns a target enumerator and a `ping` method; a free `ping`
//! function is declared next to it. Both are started on targets picked by
//! position, the overview is logged periodically, and every task still
//! running is cancelled through the board on exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use taskboard::prelude::*;

/// Run ping tasks and log the task board
#[derive(Parser)]
#[command(name = "taskboard-demo")]
#[command(about = "Run ping tasks and log the task board", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./.taskboard.toml when present)
    #[arg(long, env = "TASKBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Targets produced by the process
    #[arg(long, value_delimiter = ',', default_value = "ABC,DEF,GHI,XYZ")]
    targets: Vec<String>,

    /// Seconds between two pings
    #[arg(long, default_value_t = 2)]
    sleep: i64,

    /// Seconds between two overview snapshots
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Seconds to run before cancelling everything; runs until Ctrl-C when omitted
    #[arg(long)]
    duration: Option<u64>,
}

struct Process {
    targets: Vec<String>,
}

impl Process {
    fn target_list(&self) -> Vec<String> {
        self.targets.clone()
    }
}

fn declare(registry: &DefinitionRegistry, targets: &TargetEnumerator) -> Result<(String, String)> {
    targets.register_method(
        Callable::method::<Process>(module_path!(), "targets")
            .returns(ReturnType::List)
            .sync(|args| {
                let process = args
                    .receiver::<Process>()
                    .context("targets called without a process")?;
                Ok(process.target_list().into())
            }),
    )?;

    let ping_id = registry.register(
        Callable::function(module_path!(), "ping")
            .param("id", ParamType::Str)
            .param("msg", ParamType::DateTime)
            .param_with_default("sleep", ParamType::Int, 10)
            .returns(ReturnType::Unit)
            .coroutine(ping),
        "id",
    )?;

    let method_ping_id = registry.register(
        Callable::method::<Process>(module_path!(), "ping")
            .param("id", ParamType::Str)
            .param("msg", ParamType::Str)
            .param_with_default("sleep", ParamType::Float, 10.0)
            .returns(ReturnType::Unit)
            .coroutine(process_ping),
        "id",
    )?;

    Ok((ping_id.to_string(), method_ping_id.to_string()))
}

async fn ping(args: BoundArguments) -> Result<()> {
    let id = args.get_str("id").unwrap_or_default().to_string();
    let msg = args.get_datetime("msg");
    let sleep = Duration::from_secs(args.get_i64("sleep").unwrap_or(10).unsigned_abs());
    loop {
        tracing::info!(id = %id, msg = ?msg, "ping");
        tokio::time::sleep(sleep).await;
    }
}

async fn process_ping(args: BoundArguments) -> Result<()> {
    let process = args
        .receiver::<Process>()
        .context("ping called without a process")?;
    let msg = args.get_str("msg").unwrap_or_default().to_string();
    let sleep = float_sleep(&args)?;
    loop {
        tracing::info!(msg = %msg, targets = ?process.target_list(), "process ping");
        tokio::time::sleep(sleep).await;
    }
}

fn float_sleep(args: &BoundArguments) -> Result<Duration> {
    let secs = args.get_f64("sleep").unwrap_or(10.0).max(0.0);
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid sleep interval {secs}"))
}

fn log_overview(board: &TaskBoard) -> Result<()> {
    let overview = board.overview()?;
    tracing::info!(
        board = %overview.name,
        definitions = overview.definitions.len(),
        targets = overview.targets.len(),
        tasks = overview.rows.len(),
        "overview"
    );
    for row in &overview.rows {
        tracing::info!(
            target_pos = ?row.target_pos,
            task_target = %row.target,
            task = %row.qualified_name,
            task_id = %row.task_id,
            kind = row.type_info.as_deref().unwrap_or("function"),
            params = %format_params(&row.params),
            "running"
        );
    }
    Ok(())
}

fn format_params(params: &BoundArguments) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn shutdown(board: &TaskBoard) -> Result<()> {
    let overview = board.overview()?;
    let mut handles = Vec::new();
    for row in overview.rows {
        let Some(pos) = row.target_pos else {
            continue;
        };
        if let Some(task) = board.host().find(&row.task_id) {
            handles.push(task.handle());
        }
        board.cancel_at(pos, &row.task_id.to_string(), row.definition_id.as_str())?;
    }
    for handle in handles {
        let id = handle.id();
        let outcome = handle.wait().await;
        tracing::info!(task_id = %id, outcome = ?outcome, "task stopped");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BoardConfig::from_file(path)?,
        None => BoardConfig::load()?,
    };
    taskboard::logging::init(&config.logging)?;

    let registry = Arc::new(DefinitionRegistry::new());
    let targets = Arc::new(TargetEnumerator::new());
    let (ping_id, method_ping_id) = declare(&registry, &targets)?;

    let process = Arc::new(Process {
        targets: cli.targets.clone(),
    });
    let board = TaskBoard::new(
        config,
        registry,
        targets,
        TaskHost::new(),
        Some(Receiver::new(process)),
    )?;

    let last = board.target_list()?.len().saturating_sub(1);
    let now = chrono::Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S").to_string();
    let sleep = cli.sleep.to_string();
    board.start_at(0, &ping_id, [("msg", now.as_str()), ("sleep", sleep.as_str())])?;
    board.start_at(last, &method_ping_id, [("msg", "PONG"), ("sleep", sleep.as_str())])?;

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.interval.max(1)));
    let deadline = async {
        match cli.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            },
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => log_overview(&board)?,
            () = &mut deadline => break,
        }
    }

    shutdown(&board).await?;
    tracing::info!("EXIT");
    Ok(())
}
