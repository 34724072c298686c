//! Main entry point for rusty-gate.
//!
//! Loads the rule document, opens the audit log, wires the agent pipeline and
//! runs the read-eval loop on stdin until `exit` or end of input.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use rusty_gate::ai::OpenAiClient;
use rusty_gate::app::{App, Output, SessionParts};
use rusty_gate::audit::AuditLogger;
use rusty_gate::config::{AppConfig, Cli};
use rusty_gate::context::CurrentDir;
use rusty_gate::policy::PolicyEngine;
use rusty_gate::router::CommandRouter;
use rusty_gate::security::{CommandSafetyFilter, SensitiveDataFilter};
use rusty_gate::shell::BashExecutor;
use rusty_gate::tools::{LocalToolBackend, ToolGateway};
use rusty_gate::utils::{guard::ExitGuard, logger};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_cli(Cli::parse())?;

    // Initialize logging before anything else
    if let Some(path) = logger::init_logging(&config.log_dir, config.verbosity) {
        info!("Logging to {}", path.display());
    }

    let policy = Arc::new(
        PolicyEngine::load_or_create(&config.policy_path)
            .with_context(|| format!("cannot load rules from {}", config.policy_path.display()))?,
    );
    let document = policy.document();

    let sensitive = Arc::new(SensitiveDataFilter::new()?);
    let safety = match CommandSafetyFilter::new() {
        Ok(filter) => Some(Arc::new(filter)),
        Err(e) => {
            warn!("Command safety filter unavailable: {}", e);
            None
        }
    };
    let audit = Arc::new(AuditLogger::from_settings(
        config.audit_log_path(&document.audit),
        &document.audit,
        sensitive.clone(),
    ));

    let router = match CommandRouter::probe(PROBE_TIMEOUT).await {
        Ok(router) => router,
        Err(e) => {
            warn!("Command probe failed ({}), using the built-in command list", e);
            CommandRouter::with_fallback_commands()?
        }
    };
    let cwd = CurrentDir::capture().unwrap_or_else(|| CurrentDir::from_path("/"));

    let command_timeout = config
        .command_timeout
        .unwrap_or(Duration::from_secs(document.security.timeout_seconds));
    let executor = Arc::new(BashExecutor::new(command_timeout, document.security.max_output_size));

    let mut app = App::new(SessionParts {
        policy: policy.clone(),
        audit: audit.clone(),
        safety,
        sensitive: sensitive.clone(),
        router: Arc::new(router),
        cwd,
        executor,
        user: config.user.clone(),
        agent_timeout: config.agent_timeout,
    })?
    .with_tools(
        ToolGateway::new(Arc::new(LocalToolBackend::new(sensitive, policy.clone())), policy)
            .with_audit(audit.clone())
            .with_dry_run(config.dry_run_tools),
    );
    if let Some(model) = &config.model {
        app = app.with_model(Arc::new(OpenAiClient::new(model.clone())));
    }

    let start_ctx = app.request_context();
    audit.session_start(
        &start_ctx,
        json!({
            "policy": config.policy_path.display().to_string(),
            "model": config.model,
            "dry_run_tools": config.dry_run_tools,
            "agent_timeout_seconds": config.agent_timeout.as_secs(),
        }),
    );

    // Session end is recorded on every way out, panics included
    let started = Instant::now();
    let executed = Arc::new(AtomicU64::new(0));
    let _session = {
        let audit = audit.clone();
        let executed = executed.clone();
        ExitGuard::new(move || {
            audit.session_end(&start_ctx, started.elapsed(), executed.load(Ordering::Relaxed));
        })
    };

    run(&mut app, &executed).await
}

async fn run(app: &mut App, executed: &AtomicU64) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"rusty-gate: commands run in your shell, questions go to the model. Ctrl-D to quit.\n")
        .await?;

    loop {
        let prompt = if app.has_pending_confirmation() {
            "confirm> ".to_string()
        } else {
            format!("{} $ ", app.current_dir())
        };
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            stdout.write_all(b"\n").await?;
            break;
        };

        for output in app.handle_line(&line).await {
            match output {
                Output::Stdout(text) => write_block(&mut stdout, &text).await?,
                Output::Stderr(text) => write_block(&mut stderr, &text).await?,
            }
        }
        executed.store(app.commands_executed(), Ordering::Relaxed);

        if app.should_exit() {
            break;
        }
    }

    info!(
        "Session ended after {:?}, {} commands executed",
        app.elapsed(),
        app.commands_executed()
    );
    Ok(())
}

async fn write_block<W: AsyncWriteExt + Unpin>(w: &mut W, text: &str) -> Result<()> {
    w.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        w.write_all(b"\n").await?;
    }
    w.flush().await?;
    Ok(())
}
