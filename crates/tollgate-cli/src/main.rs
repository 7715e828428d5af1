//! Tollgate CLI: inspect permission decisions, summarize the audit log and
//! replay scripted agent turns through a gated session.

mod prompt;
mod script;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tollgate_config::{CliOverrides, TollgateConfig};
use tollgate_core::{Session, SessionEvent, SessionOptions};
use tollgate_permissions::{
    ApprovalCorrelator, AuditSummary, JsonlAuditLog, PermissionEngine, audit, destructive,
};
use tollgate_types::Action;

#[derive(Parser)]
#[command(
    name = "tollgate",
    version,
    about = "Permission gate for coding-agent tool calls"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project directory whose .claude settings apply (default: current dir)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Seconds to wait for an approval before denying
    #[arg(long, global = true)]
    approval_timeout: Option<u64>,

    /// Audit log path (overrides TOLLGATE_AUDIT_LOG)
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show how a tool call would be decided
    Check {
        /// Tool name, e.g. Bash or Edit
        tool: String,

        /// Shell command (shorthand for --input '{"command": ...}')
        #[arg(long, conflicts_with = "input")]
        command: Option<String>,

        /// Tool input as JSON
        #[arg(long)]
        input: Option<String>,
    },
    /// Summarize the permission audit log
    Audit {
        /// Log to read (default: the configured audit log)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Move the log aside to <log>.prev after summarizing
        #[arg(long)]
        rotate: bool,
    },
    /// Replay a JSON Lines runtime script through a gated session
    Replay {
        /// Script file
        script: PathBuf,

        /// Prompt recorded for the turn
        #[arg(long, default_value = "replay")]
        prompt: String,

        /// Runtime session id to resume
        #[arg(long)]
        resume: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let result = runtime.block_on(run(cli));
    // An approval prompt may still be blocked on stdin. Don't wait for it.
    runtime.shutdown_background();
    result
}

async fn run(cli: Cli) -> Result<()> {
    let config = TollgateConfig::load(CliOverrides {
        project_dir: cli.project,
        approval_timeout_secs: cli.approval_timeout,
        audit_log_path: cli.audit_log,
    })
    .context("Failed to load configuration")?;

    match cli.command {
        Command::Check {
            tool,
            command,
            input,
        } => check(&config, tool, command, input),
        Command::Audit { log, rotate } => {
            let path = log.unwrap_or_else(|| config.audit_log_path.clone());
            audit_report(&path, rotate)
        }
        Command::Replay {
            script,
            prompt,
            resume,
        } => replay(&config, &script, &prompt, resume).await,
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}

fn check(
    config: &TollgateConfig,
    tool: String,
    command: Option<String>,
    input: Option<String>,
) -> Result<()> {
    let input = match (command, input) {
        (Some(command), _) => serde_json::json!({ "command": command }),
        (None, Some(raw)) => serde_json::from_str(&raw).context("Invalid --input JSON")?,
        (None, None) => serde_json::json!({}),
    };
    let action = Action::new(tool, input);
    let engine = PermissionEngine::new(config.policy_rules.clone());
    let detail = engine.evaluate(&action);

    println!("outcome: {}", detail.outcome.as_str());
    println!("source:  {}", detail.provenance.as_str());
    if let Some(pattern) = &detail.pattern {
        println!("pattern: {pattern}");
    }
    if let Some(hit) = action.shell_command().and_then(destructive::detect) {
        println!("reason:  {}", hit.reason);
    }
    Ok(())
}

fn audit_report(path: &Path, rotate: bool) -> Result<()> {
    if !path.exists() {
        eprintln!("No audit log at {}", path.display());
        return Ok(());
    }
    let summary = audit::summarize(path)
        .with_context(|| format!("Failed to read audit log {}", path.display()))?;
    print_summary(&summary);

    if rotate {
        JsonlAuditLog::new(path).rotate();
        eprintln!("Rotated {}", path.display());
    }
    Ok(())
}

fn print_summary(summary: &AuditSummary) {
    println!("Total checks: {}", summary.total_checks);
    println!("Sent to a human: {}", summary.human_decisions);

    let mut tools: Vec<_> = summary.tool_counts.iter().collect();
    tools.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    println!("By tool:");
    for (tool, count) in tools {
        println!("  {count:>5}  {tool}");
    }

    if !summary.pattern_hits.is_empty() {
        let mut patterns: Vec<_> = summary.pattern_hits.iter().collect();
        patterns.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        println!("Settings pattern hits:");
        for (pattern, count) in patterns {
            println!("  {count:>5}  {pattern}");
        }
    }

    for (title, counts) in [
        ("Approved by a human:", &summary.user_approved),
        ("Denied by a human:", &summary.user_denied),
    ] {
        if counts.is_empty() {
            continue;
        }
        println!("{title}");
        for entry in counts.iter().take(10) {
            match &entry.command {
                Some(command) => println!("  {:>5}  {}: {}", entry.count, entry.tool, command),
                None => println!("  {:>5}  {}", entry.count, entry.tool),
            }
        }
    }
}

async fn replay(
    config: &TollgateConfig,
    script: &Path,
    prompt: &str,
    resume: Option<String>,
) -> Result<()> {
    let runtime = script::ScriptedRuntime::from_path(script)?;

    // The approver's clone shares the pending map but not the sender.
    let (tx, rx) = mpsc::unbounded_channel();
    let correlator = ApprovalCorrelator::new(config.approval_timeout);
    let approver = prompt::spawn_terminal_approver(rx, correlator.clone());
    let correlator = correlator.with_channel(Arc::new(tx));

    let session = Session::new(
        Arc::new(runtime),
        Arc::new(PermissionEngine::new(config.policy_rules.clone())),
        correlator,
        Arc::new(JsonlAuditLog::new(&config.audit_log_path)),
        SessionOptions {
            cwd: Some(config.project_dir.clone()),
            system_prompt: None,
            resume,
        },
    );

    let failed = run_turn(&session, prompt).await;
    approver.abort();

    if let Some(e) = failed {
        anyhow::bail!("Turn failed: {e}");
    }
    Ok(())
}

/// Stream one turn to stdout. Returns the runtime error, if the turn failed.
async fn run_turn(session: &Session, prompt: &str) -> Option<String> {
    let stdout = io::stdout();
    let mut failed = None;
    let mut turn = Box::pin(session.send(prompt));

    while let Some(event) = turn.next().await {
        let mut out = stdout.lock();
        match event {
            SessionEvent::Text(text) => {
                let _ = write!(out, "{text}");
                let _ = out.flush();
            }
            SessionEvent::ToolStart { tool_name, .. } => {
                let _ = writeln!(out);
                let _ = writeln!(out, "  [tool: {tool_name}]");
            }
            SessionEvent::ToolDenied { tool_name, reason } => {
                let _ = writeln!(out, "  [tool {tool_name} denied: {reason}]");
            }
            SessionEvent::PermissionRequest(request) => {
                tracing::debug!(request_id = %request.id, "waiting for approval");
            }
            SessionEvent::ToolEnd { tool_name } => {
                let _ = writeln!(out, "  [tool {tool_name} done]");
            }
            SessionEvent::Result {
                content,
                session_id,
            } => {
                let _ = writeln!(out);
                let _ = writeln!(out, "{content}");
                if let Some(id) = session_id {
                    eprintln!("session: {id}");
                }
            }
            SessionEvent::Error(e) => {
                eprintln!("Error: {e}");
                failed = Some(e);
            }
        }
    }
    failed
}
