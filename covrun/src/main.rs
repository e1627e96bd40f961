//! Coverage-instrumented test orchestrator.
//!
//! Runs every `test_*.py` unit under the coverage tool, parallel units on a
//! bounded pool and serial units one at a time, retrying failures, then
//! merges coverage into text, HTML and XML reports.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use covrun::exit_codes;
use covrun::io::config::{CONFIG_FILE_NAME, CovrunConfig, load_config};
use covrun::io::coverage::CoverageCli;
use covrun::io::executor::CoverageExecutor;
use covrun::logging;
use covrun::session::{SessionOptions, clean, list_units, run_session};

#[derive(Parser)]
#[command(
    name = "covrun",
    version,
    about = "Run test units under coverage with bounded parallelism and retries"
)]
struct Cli {
    /// Project root; relative config paths resolve against it.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file. Defaults to `<root>/covrun.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every non-skipped unit and report coverage.
    Run {
        /// Parallel-lane pool size.
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Kill a unit that runs longer than this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Do not list skipped units.
        #[arg(long)]
        hide_skipped: bool,
        /// Disable colored output.
        #[arg(long)]
        no_color: bool,
    },
    /// Print each discovered unit with its policy, without running anything.
    List,
    /// Delete coverage artifacts, the merged data file and generated reports.
    Clean,
}

fn main() {
    logging::init();
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = std::path::absolute(&cli.root)
        .with_context(|| format!("resolve root {}", cli.root.display()))?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
    let cfg = load_config(&config_path)?;

    match cli.command {
        Command::Run {
            jobs,
            timeout_secs,
            hide_skipped,
            no_color,
        } => {
            let cfg = apply_overrides(cfg, jobs, timeout_secs, hide_skipped)?;
            let color = !no_color && std::io::stdout().is_terminal();
            cmd_run(&root, &cfg, color)
        }
        Command::List => cmd_list(&root, &cfg),
        Command::Clean => cmd_clean(&root, &cfg),
    }
}

fn apply_overrides(
    mut cfg: CovrunConfig,
    jobs: Option<usize>,
    timeout_secs: Option<u64>,
    hide_skipped: bool,
) -> Result<CovrunConfig> {
    if jobs.is_some() {
        cfg.jobs = jobs;
    }
    if timeout_secs.is_some() {
        cfg.unit_timeout_secs = timeout_secs;
    }
    if hide_skipped {
        cfg.show_skipped = false;
    }
    cfg.validate().context("validate command-line overrides")?;
    Ok(cfg)
}

fn cmd_run(root: &Path, cfg: &CovrunConfig, color: bool) -> Result<i32> {
    let work_dir = cfg.work_dir.as_ref().map(|dir| root.join(dir));
    let tool = CoverageCli::new(cfg.coverage_command.clone())?
        .with_work_dir(work_dir)
        .with_env(cfg.env.clone());
    let executor = CoverageExecutor::new(&tool, cfg.failure_token.clone(), cfg.unit_timeout());
    let options = SessionOptions {
        root: root.to_path_buf(),
        color,
    };
    let outcome = run_session(cfg, &executor, &tool, &options)?;
    Ok(outcome.exit_code)
}

fn cmd_list(root: &Path, cfg: &CovrunConfig) -> Result<i32> {
    for classified in list_units(root, cfg)? {
        println!("{}\t{}", classified.policy, classified.unit.label);
    }
    Ok(exit_codes::OK)
}

fn cmd_clean(root: &Path, cfg: &CovrunConfig) -> Result<i32> {
    let removed = clean(root, cfg)?;
    println!("removed {removed} coverage file(s)");
    Ok(exit_codes::OK)
}
