//! # Solver Harness
//!
//! A conformance and performance runner for game solvers (typically Connect Four solvers).
//!
//! It feeds recorded positions to a solver process, checks each evaluation against the known
//! answer and aggregates timing and accuracy statistics.
//!
//! The solver is a separate OS process speaking a line protocol on its standard streams:
//!  * Runner -> Solver : `<position>\n`
//!  * Solver -> Runner : `<tag> <score> <node_count> <elapsed>\n`
//!
//! Answers are checked either exactly ([`Policy::Strong`](crate::protocol::Policy::Strong)) or by
//! sign only ([`Policy::Weak`](crate::protocol::Policy::Weak)), for solvers that only tell wins,
//! draws and losses apart.
//!
//! # Documentation Overview
//!
//! - The corpus format is described in [`corpus`].
//! - The wire format and the comparison policies live in [`protocol`].
//! - The per-test loop and the statistics are in [`driver`].
//! - Starting and stopping the solver, optionally under resource limits, is done by
//!   [`solver::SolverProcess`] with [`limits::SolverLimits`].
//! - [`runner::Runner`] chains everything, and is what the `runner` binary uses.
//!
//! # Usage Example
//!
//! ```no_run
//! use solver_harness::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new().with_verbose(false);
//!     let limits = SolverLimitsBuilder::new().build()?;
//!     let runner = Runner::new(config, limits)?;
//!
//!     let report = runner.run_file(
//!         &SolverCommand::new("./c4solver"),
//!         "Test_L3_R1".as_ref(),
//!         Policy::Weak,
//!         std::io::stdout(),
//!     )?;
//!     println!("failed tests: {:?}", report.failed_tests());
//!     Ok(())
//! }
//! ```
//!
//! Driving a solver without spawning a process, e.g. over in-memory buffers:
//!
//! ```
//! use std::io::Cursor;
//! use solver_harness::prelude::*;
//!
//! let link = LineLink::new(Cursor::new("tag 0 1500 12\n"), Vec::new());
//! let mut driver = Driver::new(link, Policy::Strong);
//! let report = driver.run(&[TestCase::new("2224661", 0)], std::io::sink()).unwrap();
//! assert_eq!(report.summary.accuracy, 1.0);
//! ```
#![warn(missing_docs)]

mod cgroup_manager;
pub mod configuration;
pub mod corpus;
pub mod driver;
pub mod limits;
mod logger;
pub mod protocol;
pub mod runner;
pub mod solver;
pub use anyhow;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use solver_harness::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::corpus::{load_corpus, load_corpus_file, CorpusFormatError, TestCase};
    pub use crate::driver::{Driver, EvaluationOutcome, RunReport, RunSummary};
    pub use crate::limits::{SolverLimits, SolverLimitsBuilder};
    pub use crate::protocol::{Policy, ProtocolError, ProtocolViolation, SolverResponse};
    pub use crate::runner::Runner;
    pub use crate::solver::{LineLink, SolverCommand, SolverLink, SolverProcess};
}
