use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use stackguard::audit::MemoryAuditSink;
use stackguard::config::GuardConfig;
use stackguard::guard::{GuardDecision, ToolCall, ToolCallGuard};
use stackguard::protocol;

#[derive(Parser)]
#[command(name = "stackguard", about = "Confirmation guard for dangerous cloud operations.")]
struct Cli {
    /// YAML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment the calls run in, checked against bypassEnvironments
    #[arg(short, long, env = "STACKGUARD_ENVIRONMENT")]
    environment: Option<String>,

    /// Print the challenge as text on stderr as well
    #[arg(long)]
    prompt: bool,
}

/// One line of input.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Request {
    Call(ToolCall),
    Confirm {
        response: Value,
        #[serde(default)]
        user: Option<String>,
    },
    Cancel {
        #[serde(rename = "correlationId")]
        correlation_id: String,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stackguard=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GuardConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GuardConfig::default(),
    };

    let audit = Arc::new(MemoryAuditSink::with_retention(config.audit_retention));
    let guard = ToolCallGuard::new(&config, audit).context("building tool-call guard")?;
    let _maintenance = guard.spawn_maintenance();

    info!(
        environment = cli.environment.as_deref().unwrap_or("-"),
        timeout_ms = config.confirmation_timeout_ms,
        max_pending = config.max_pending_confirmations,
        "StackGuard ready"
    );

    // Blocking stdin reader feeding the async loop.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut stdout = io::stdout();
    while let Some(line) = rx.recv().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle(&guard, request, &cli).await,
            Err(err) => json!({ "ok": false, "error": format!("bad request: {err}") }),
        };
        writeln!(stdout, "{}", serde_json::to_string(&reply)?)?;
        stdout.flush()?;
    }

    let cancelled = guard.shutdown().await;
    info!(cancelled, "StackGuard stopped");
    Ok(())
}

async fn handle(guard: &ToolCallGuard, request: Request, cli: &Cli) -> Value {
    match request {
        Request::Call(mut call) => {
            if call.environment.is_none() {
                call.environment = cli.environment.clone();
            }
            match guard.evaluate(&call).await {
                Ok(GuardDecision::Proceed {
                    parameters,
                    security_warnings,
                }) => json!({
                    "ok": true,
                    "proceed": true,
                    "parameters": parameters,
                    "securityWarnings": security_warnings,
                }),
                Ok(GuardDecision::ConfirmationRequired(err)) => {
                    if cli.prompt {
                        if let Some(display) = err.confirmation_request() {
                            eprintln!("{}\n", protocol::format_for_display(display));
                        }
                    }
                    json!({ "ok": false, "error": err.to_value() })
                }
                Err(err) => json!({
                    "ok": false,
                    "error": err.to_string(),
                    "retry": format!("{:?}", err.retry_hint()).to_lowercase(),
                }),
            }
        }
        Request::Confirm { response, user } => {
            match guard.resolve(&response, user.as_deref()).await {
                Ok(approved) => json!({
                    "ok": true,
                    "allowOperation": true,
                    "toolName": approved.tool_name,
                    "correlationId": approved.correlation_id,
                    "parameters": approved.parameters,
                }),
                Err(err) => json!({
                    "ok": false,
                    "allowOperation": false,
                    "error": err.to_value(),
                }),
            }
        }
        Request::Cancel {
            correlation_id,
            user,
            reason,
        } => {
            let cancelled = guard
                .cancel(&correlation_id, user.as_deref(), reason.as_deref())
                .await;
            json!({ "ok": cancelled, "cancelled": cancelled })
        }
        Request::Stats => json!({ "ok": true, "stats": guard.stats().await }),
    }
}
