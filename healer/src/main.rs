//! Self-healing script runner.
//!
//! Runs each script, and whenever a run writes to stderr (or times out) asks a
//! repair model for a corrected version, keeps a one-time backup of the
//! original, writes the fix in place and runs it again.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use healer::batch::repair_all;
use healer::exit_codes;
use healer::io::cancel::{CancelToken, Interrupted};
use healer::io::config::{DEFAULT_CONFIG_FILE, HealerConfig, load_config, write_config};
use healer::io::discover::discover_scripts;
use healer::io::oracle::OllamaOracle;
use healer::io::sandbox::{LaunchError, ProcessSandbox};
use healer::logging;
use healer::repair_loop::{LoopConfig, LoopEvent};
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "healer",
    version,
    about = "Run scripts and let a local model repair them until they run clean",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Scripts or directories of scripts to run and repair.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Config file (defaults to ./healer.toml when present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds each run may take before it counts as failed.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Give up on a script after this many applied patches.
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,

    /// Model that proposes fixes.
    #[arg(long, value_name = "NAME")]
    model: Option<String>,

    /// Base URL of the Ollama server.
    #[arg(long, value_name = "URL")]
    oracle_url: Option<String>,

    /// Seconds to wait for one repair suggestion.
    #[arg(long, value_name = "SECS")]
    oracle_deadline: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `healer.toml` to the working directory.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            if err.downcast_ref::<LaunchError>().is_some() {
                exit_codes::LAUNCH
            } else if err.downcast_ref::<Interrupted>().is_some() {
                exit_codes::INTERRUPTED
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::InitConfig { force }) => {
            cmd_init_config(Path::new(DEFAULT_CONFIG_FILE), force)
        }
        None => cmd_run(&cli.run),
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &HealerConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    // Must run before any other thread is spawned.
    let cancel = CancelToken::new();
    forward_interrupts(&cancel)?;

    let cfg = resolve_config(args)?;
    let scripts = discover_scripts(&args.paths, &cfg.runtimes, &cfg.backup_suffix)?;
    if scripts.is_empty() {
        bail!("no scripts found under the given paths");
    }

    let sandbox = ProcessSandbox::new(cfg.runtimes.clone(), cfg.output_limit_bytes);
    let oracle = OllamaOracle::new(&cfg.oracle, cancel.clone())?;
    let loop_config = LoopConfig {
        cancel,
        ..LoopConfig::from_config(&cfg)
    };

    let outcome = repair_all(&scripts, &sandbox, &oracle, &loop_config, print_event)?;
    if outcome.all_succeeded() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::FAILED)
    }
}

/// Route SIGINT and SIGTERM to `cancel`.
///
/// The first signal aborts an in-flight oracle call and stops the batch after
/// the current script; a second one exits at once.
#[cfg(unix)]
fn forward_interrupts(cancel: &CancelToken) -> Result<()> {
    use nix::sys::signal::{SigSet, Signal};

    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block().context("block interrupt signals")?;

    let cancel = cancel.clone();
    std::thread::spawn(move || {
        loop {
            match signals.wait() {
                Ok(signal) if cancel.is_cancelled() => {
                    eprintln!("{signal} received again, exiting");
                    std::process::exit(exit_codes::INTERRUPTED);
                }
                Ok(signal) => {
                    warn!(%signal, "interrupt received, finishing current script");
                    eprintln!("{signal} received, stopping after the current script");
                    cancel.cancel();
                }
                Err(err) => {
                    warn!(%err, "stopped waiting for interrupt signals");
                    return;
                }
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn forward_interrupts(_cancel: &CancelToken) -> Result<()> {
    Ok(())
}

/// Load the config file and apply command-line overrides.
fn resolve_config(args: &RunArgs) -> Result<HealerConfig> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if args.config.is_some() && !path.exists() {
        bail!("config file {} not found", path.display());
    }
    let mut cfg = load_config(&path)?;

    if let Some(secs) = args.timeout {
        cfg.timeout_secs = secs;
    }
    if let Some(max) = args.max_attempts {
        cfg.max_attempts = Some(max);
    }
    if let Some(model) = &args.model {
        cfg.oracle.model = model.clone();
    }
    if let Some(url) = &args.oracle_url {
        cfg.oracle.base_url = url.clone();
    }
    if let Some(secs) = args.oracle_deadline {
        cfg.oracle.deadline_secs = Some(secs);
    }
    cfg.validate().context("invalid command-line override")?;
    Ok(cfg)
}

fn print_event(path: &Path, event: &LoopEvent) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    match event {
        LoopEvent::Transition { from, to } => println!("[{name}] {from} -> {to}"),
        LoopEvent::Executed {
            stdout,
            stderr,
            error,
        } => {
            if !stdout.is_empty() {
                println!("[{name}] output:\n{}", stdout.trim_end());
            }
            if error.is_some() {
                println!("[{name}] error:\n{}", stderr.trim_end());
            }
        }
        LoopEvent::RepairRequested { round, .. } => {
            println!("[{name}] asking for a fix (round {round})");
        }
        LoopEvent::PatchExtracted { bytes, .. } => {
            println!("[{name}] received a fix ({bytes} bytes)");
        }
        LoopEvent::BackupCreated { path } => {
            println!("[{name}] backup created: {}", path.display());
        }
        LoopEvent::BackupRetained { path } => {
            println!("[{name}] backup already exists: {}", path.display());
        }
        LoopEvent::ScriptUpdated { .. } => println!("[{name}] script updated"),
        LoopEvent::Finished { state, reason } => match reason {
            Some(reason) => println!("[{name}] {state}: {reason}"),
            None => println!("[{name}] {state}"),
        },
    }
}
