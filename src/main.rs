use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Result;
use clap::Parser;
use solver_harness::prelude::*;

/// Check a game solver against a corpus of recorded positions.
#[derive(Parser, Debug)]
#[command(name = "runner", version)]
struct Cli {
    /// Solver executable, speaking the line protocol on stdin/stdout
    solver: PathBuf,

    /// Test corpus: one `<position> <expected score>` per line
    corpus: PathBuf,

    /// Only check the sign of the score (win/draw/loss)
    #[arg(long)]
    weak: bool,

    /// Abort if the solver takes longer than this to answer one position
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Memory cap of the solver, in MB
    #[arg(long, value_name = "MB")]
    ram_mb: Option<usize>,

    /// CPUs the solver may run on, e.g. "0-3,6"
    #[arg(long, value_name = "LIST")]
    cpus: Option<String>,

    /// Run the solver without its limits if cgroups are not available
    #[arg(long)]
    allow_uncontained: bool,

    /// Only print the summary
    #[arg(short, long)]
    quiet: bool,

    /// Write a trace log file in the current directory
    #[arg(long)]
    log: bool,

    /// Let the solver's stderr through
    #[arg(long)]
    debug_solver_stderr: bool,

    /// Exit with status 2 if any test case failed
    #[arg(long)]
    fail_on_wrong_answer: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = Configuration::from_env();
    if cli.quiet {
        config = config.with_verbose(false);
    }
    if cli.log {
        config = config.with_log(true);
    }
    if cli.allow_uncontained {
        config = config.with_allow_uncontained(true);
    }
    if cli.debug_solver_stderr {
        config = config.with_debug_solver_stderr(true);
    }

    let mut limits = SolverLimitsBuilder::from_env();
    if let Some(mb) = cli.ram_mb {
        limits = limits.with_ram(mb);
    }
    if let Some(cpus) = &cli.cpus {
        limits = limits.with_cpu_list(cpus);
    }
    if let Some(ms) = cli.timeout_ms {
        limits = limits.with_reply_timeout(Duration::from_millis(ms));
    }

    let policy = if cli.weak { Policy::Weak } else { Policy::Strong };
    let solver = SolverCommand::new(cli.solver.to_string_lossy());

    let runner = Runner::new(config, limits.build()?)?;
    let report = runner.run_file(&solver, &cli.corpus, policy, std::io::stdout().lock())?;

    if cli.fail_on_wrong_answer && !report.all_passed() {
        eprintln!("failed tests: {:?}", report.failed_tests());
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}
