//! Command-line options and the session configuration built from them.
//!
//! Everything the session needs is resolved here once, at start-up, and
//! passed down explicitly.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use directories::BaseDirs;

use crate::agents::DEFAULT_AGENT_TIMEOUT;
use crate::policy::AuditSettings;

const APP_DIR: &str = ".rusty-gate";

#[derive(Parser, Debug, Clone)]
#[command(name = "rusty-gate")]
#[command(version)]
#[command(about = "Guarded interactive shell: commands run, questions go to a model")]
pub struct Cli {
    /// Rule document (TOML); a default one is written when missing
    #[arg(long, value_name = "PATH")]
    pub policy: Option<PathBuf>,

    /// Audit log file; overrides `log_file` from the rule document
    #[arg(long, value_name = "PATH")]
    pub audit_log: Option<PathBuf>,

    /// Directory for diagnostic logs
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Model for natural-language input; without one, only commands run
    #[arg(long)]
    pub model: Option<String>,

    /// Upper bound for a single guardrail agent
    #[arg(long, default_value_t = DEFAULT_AGENT_TIMEOUT.as_secs())]
    pub agent_timeout_secs: u64,

    /// Upper bound for non-interactive commands; defaults to the rule document
    #[arg(long)]
    pub command_timeout_secs: Option<u64>,

    /// Validate and audit tool calls without running them
    #[arg(long)]
    pub dry_run_tools: bool,

    /// More diagnostic logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub policy_path: PathBuf,
    pub audit_log: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub model: Option<String>,
    pub agent_timeout: Duration,
    pub command_timeout: Option<Duration>,
    pub dry_run_tools: bool,
    pub verbosity: u8,
    pub user: String,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let home = BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let user = env::var("USER")
            .or_else(|_| env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(Self::with_home(cli, &home, user))
    }

    /// Resolve defaults under `home` instead of the real home directory.
    pub fn with_home(cli: Cli, home: &Path, user: impl Into<String>) -> Self {
        let app_dir = home.join(APP_DIR);
        Self {
            policy_path: cli.policy.unwrap_or_else(|| app_dir.join("policy.toml")),
            audit_log: cli.audit_log,
            log_dir: cli.log_dir.unwrap_or_else(|| app_dir.join("logs")),
            model: cli.model,
            agent_timeout: Duration::from_secs(cli.agent_timeout_secs),
            command_timeout: cli.command_timeout_secs.map(Duration::from_secs),
            dry_run_tools: cli.dry_run_tools,
            verbosity: cli.verbose,
            user: user.into(),
        }
    }

    /// The CLI path if given, else the rule document's `log_file`.
    pub fn audit_log_path(&self, settings: &AuditSettings) -> PathBuf {
        match &self.audit_log {
            Some(path) => path.clone(),
            None => PathBuf::from(shellexpand::tilde(&settings.log_file).as_ref()),
        }
    }
}
