//! End-to-end execution of a test run.
//!
//! The [`Runner`] ties the pieces together in the only valid order:
//!
//! 1. load the corpus (a malformed corpus aborts before any solver is started)
//! 2. start the solver with the configured [`SolverLimits`]
//! 3. drive the conversation with a [`Driver`] and print the report
//! 4. stop the solver
//!
//! The solver is stopped on every path, including errors: [`SolverProcess`] kills it on drop.

use std::{io::Write, path::Path};

use anyhow::Context;
use tracing::{info, instrument, trace, warn};

use crate::{
    configuration::Configuration,
    corpus::{load_corpus_file, TestCase},
    driver::{Driver, RunReport},
    limits::SolverLimits,
    logger::init_logger,
    protocol::Policy,
    solver::{SolverCommand, SolverProcess},
};

/// Runs corpora against solver executables.
#[derive(Debug, Clone)]
pub struct Runner {
    config: Configuration,
    limits: SolverLimits,
}

impl Runner {
    /// Create a [`Runner`]. Starts the file logger if `config` asks for it.
    ///
    /// # Errors
    /// Fails if logging was requested but the log file or subscriber could not be set up.
    #[instrument(skip_all)]
    pub fn new(config: Configuration, limits: SolverLimits) -> anyhow::Result<Runner> {
        if config.log {
            init_logger()?;
        }
        trace!(?config, ?limits);
        Ok(Runner { config, limits })
    }

    /// Load the corpus at `corpus`, then run it against `solver`, reporting to `out`.
    pub fn run_file(
        &self,
        solver: &SolverCommand,
        corpus: &Path,
        policy: Policy,
        out: impl Write,
    ) -> anyhow::Result<RunReport> {
        let cases = load_corpus_file(corpus)?;
        self.run(solver, &cases, policy, out)
    }

    /// Run already loaded `cases` against `solver`, reporting to `out`.
    #[instrument(skip(self, cases, out), fields(solver = %solver))]
    pub fn run(
        &self,
        solver: &SolverCommand,
        cases: &[TestCase],
        policy: Policy,
        out: impl Write,
    ) -> anyhow::Result<RunReport> {
        anyhow::ensure!(!cases.is_empty(), "cannot run an empty corpus");

        let process = SolverProcess::spawn(solver, &self.limits, &self.config)
            .with_context(|| format!("could not start solver '{solver}'"))?;
        let mut driver = Driver::new(process, policy)
            .with_reply_timeout(self.limits.reply_timeout())
            .with_verbose(self.config.verbose);

        let report = driver.run(cases, out)?;

        if let Err(e) = driver.into_link().shutdown() {
            warn!("solver did not stop cleanly: {e:#}");
        }
        info!(failed = report.failed_tests().len(), "solver stopped");
        Ok(report)
    }
}
