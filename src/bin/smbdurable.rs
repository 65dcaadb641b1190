use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use smbdurable::backend::{LocalBackend, SMBBackend};
use smbdurable::engine::{InvariantMode, Share, ShareConfig};
use smbdurable::observability::init_tracing;
use smbdurable::runner::{RunSummary, Runner, RunnerConfig};
use smbdurable::script::{builtin, DurableKind, Script};

#[derive(Parser, Debug)]
#[command(
    name = "smbdurable",
    version,
    about = "SMB2/SMB3 durable handle and lease reconciliation scenarios"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Share name (overrides SMBDURABLE_SHARE)
    #[arg(long, global = true)]
    share: Option<String>,

    /// How the share treats engine invariant violations, and whether the
    /// runner stops at the first expectation mismatch
    #[arg(long, value_enum, global = true)]
    invariant_mode: Option<InvariantModeArg>,

    /// Lease-break queue depth per connection (overrides SMBDURABLE_NOTIFY_CAPACITY)
    #[arg(long, global = true)]
    notify_capacity: Option<usize>,

    /// Default V2 durable timeout in milliseconds (overrides SMBDURABLE_V2_TIMEOUT_MS)
    #[arg(long, global = true)]
    v2_timeout_ms: Option<u64>,

    /// Use JSON logs
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario script against an in-process share
    Run {
        /// Path to scenario JSON
        script: PathBuf,
    },

    /// Validate a scenario script and print a summary
    Validate {
        /// Path to scenario JSON
        script: PathBuf,
    },

    /// Run the built-in durable handle scenarios
    Builtin {
        /// Durable context version; both when omitted
        #[arg(long, value_enum)]
        durable: Option<VersionArg>,

        /// Only run the named scenario
        #[arg(long)]
        name: Option<String>,
    },

    /// Print a built-in scenario as JSON
    Dump {
        name: String,

        #[arg(long, value_enum, default_value = "v1")]
        durable: VersionArg,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum InvariantModeArg {
    Panic,
    Log,
}

impl From<InvariantModeArg> for InvariantMode {
    fn from(value: InvariantModeArg) -> Self {
        match value {
            InvariantModeArg::Panic => InvariantMode::Panic,
            InvariantModeArg::Log => InvariantMode::LogAndContinue,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum VersionArg {
    V1,
    V2,
}

impl From<VersionArg> for DurableKind {
    fn from(value: VersionArg) -> Self {
        match value {
            VersionArg::V1 => DurableKind::V1,
            VersionArg::V2 => DurableKind::V2,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match &cli.command {
        Commands::Run { script } => {
            let script = load_script(script)?;
            let summary = run_script(&cli, script).await?;
            if !summary.passed() {
                std::process::exit(1);
            }
        }

        Commands::Validate { script } => {
            let script = load_script(script)?;
            script.validate().map_err(|e| anyhow!(e))?;
            let summary = script.summary();
            println!("Script validation OK: {}", script.metadata.name);
            println!(
                "Clients: {} | Steps: {} (connect {}, create {} [durable {}], reconnect {}, close {}, disconnect {}) | Expectations: {}",
                summary.client_count,
                summary.step_count,
                summary.connect_steps,
                summary.create_steps,
                summary.durable_creates,
                summary.reconnect_steps,
                summary.close_steps,
                summary.disconnect_steps,
                summary.expectations
            );
        }

        Commands::Builtin { durable, name } => {
            let versions: Vec<DurableKind> = match durable {
                Some(version) => vec![(*version).into()],
                None => vec![DurableKind::V1, DurableKind::V2],
            };
            let names: Vec<&str> = match name {
                Some(name) => vec![name.as_str()],
                None => builtin::NAMES.to_vec(),
            };
            let mut failures = 0usize;
            for durable in versions {
                for name in &names {
                    let script = builtin::by_name(name, durable)
                        .ok_or_else(|| anyhow!("Unknown built-in scenario: {}", name))?;
                    let summary = run_script(&cli, script).await?;
                    if !summary.passed() {
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                eprintln!("{failures} scenario(s) failed");
                std::process::exit(1);
            }
        }

        Commands::Dump { name, durable } => {
            let script = builtin::by_name(name, (*durable).into())
                .ok_or_else(|| anyhow!("Unknown built-in scenario: {}", name))?;
            println!("{}", serde_json::to_string_pretty(&script)?);
        }
    }

    Ok(())
}

fn load_script(path: &Path) -> Result<Script> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn share_config(cli: &Cli) -> Result<ShareConfig> {
    let mut config = ShareConfig::from_env()?;
    if let Some(share) = &cli.share {
        config.share_name = share.clone();
    }
    if let Some(mode) = cli.invariant_mode {
        config.invariant_mode = mode.into();
    }
    if let Some(capacity) = cli.notify_capacity {
        if capacity == 0 {
            return Err(anyhow!("--notify-capacity must be at least 1"));
        }
        config.notification_capacity = capacity;
    }
    if let Some(timeout) = cli.v2_timeout_ms {
        config.default_v2_timeout = Duration::from_millis(timeout);
    }
    Ok(config)
}

/// Each script gets a fresh share so scenarios never observe each other.
async fn run_script(cli: &Cli, script: Script) -> Result<RunSummary> {
    let config = share_config(cli)?;
    let runner_config = RunnerConfig {
        invariant_mode: config.invariant_mode,
    };
    let share = Arc::new(Share::new(config));
    let backend: Arc<dyn SMBBackend> = Arc::new(LocalBackend::new(share.clone()));

    let summary = Runner::new(script, runner_config)?.run(backend).await?;
    let metrics = share.metrics();
    println!(
        "{}: {} (steps={}, succeeded={}, failed={}, mismatches={}, breaks={}, invalidations={}, wall_clock={:.3}ms)",
        summary.script,
        if summary.passed() { "PASS" } else { "FAIL" },
        summary.executed,
        summary.succeeded,
        summary.failed,
        summary.mismatches,
        metrics.lease_breaks,
        metrics.lease_invalidations,
        summary.wall_clock.as_secs_f64() * 1000.0
    );
    for record in summary.records.iter().filter(|record| !record.matched) {
        println!(
            "  step {} ({} by {}): {:?}",
            record.step_id, record.kind, record.client_id, record.outcome
        );
    }
    Ok(summary)
}
