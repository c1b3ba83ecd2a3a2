//! Conversation with the solver and scoring of its answers.
//!
//! A run goes through the corpus strictly in order. For each test case the [`Driver`] writes the
//! position, waits for exactly one reply, checks it under the run's [`Policy`] and reports the
//! verdict right away:
//!
//! ```text
//! test: 1 2224661 time: 12 OK
//! test: 2 41 time: 9 WA expected: 1 gotten: 0
//! ```
//!
//! Once every case is evaluated the two summary lines follow:
//!
//! ```text
//! average time: 10.5
//! accuracy: 0.5
//! ```
//!
//! A solver breaking the protocol aborts the run on the spot: no further request is sent and no
//! summary is printed, since statistics over a partial run would be misleading.

use std::{io::Write, time::Duration};

use anyhow::{bail, Context};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    corpus::TestCase,
    protocol::{Policy, ProtocolError, ProtocolViolation, SolverResponse},
    solver::{RecvError, SolverLink},
};

/// Verdict for one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationOutcome {
    /// 1-based position of the case in the corpus.
    pub test_index: usize,
    /// Position sent to the solver.
    pub position: String,
    /// Time reported by the solver.
    pub elapsed: i64,
    /// Nodes explored, as reported by the solver.
    pub node_count: u64,
    /// Whether the answer matched `expected`.
    pub passed: bool,
    /// Expected value after the policy was applied.
    pub expected: i64,
    /// Score reported by the solver.
    pub actual: i64,
}

impl std::fmt::Display for EvaluationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "test: {} {} time: {} ",
            self.test_index, self.position, self.elapsed
        )?;
        if self.passed {
            write!(f, "OK")
        } else {
            write!(f, "WA expected: {} gotten: {}", self.expected, self.actual)
        }
    }
}

/// Statistics over a complete run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Mean reported time, in the solver's unit.
    pub average_time: f64,
    /// Mean number of explored nodes.
    pub average_nodes: f64,
    /// Fraction of passed test cases, in `[0, 1]`.
    pub accuracy: f64,
}

impl RunSummary {
    /// `None` if there is no outcome: averages are undefined.
    pub fn from_outcomes(outcomes: &[EvaluationOutcome]) -> Option<RunSummary> {
        if outcomes.is_empty() {
            return None;
        }
        let total = outcomes.len() as f64;
        let total_time = outcomes.iter().map(|o| o.elapsed as f64).sum::<f64>();
        let total_nodes = outcomes.iter().map(|o| o.node_count as f64).sum::<f64>();
        let passed = outcomes.iter().filter(|o| o.passed).count() as f64;

        Some(RunSummary {
            average_time: total_time / total,
            average_nodes: total_nodes / total,
            accuracy: passed / total,
        })
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// One outcome per test case, in corpus order.
    pub outcomes: Vec<EvaluationOutcome>,
    /// Statistics over `outcomes`.
    pub summary: RunSummary,
}

impl RunReport {
    /// 1-based indices of the failed test cases.
    pub fn failed_tests(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.test_index)
            .collect()
    }

    /// True if no answer was wrong.
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }
}

/// Runs test cases against a solver, one request at a time.
#[derive(Debug)]
pub struct Driver<L> {
    link: L,
    policy: Policy,
    reply_timeout: Option<Duration>,
    verbose: bool,
}

impl<L: SolverLink> Driver<L> {
    /// Create a driver speaking through `link` and checking answers with `policy`.
    pub fn new(link: L, policy: Policy) -> Self {
        Driver {
            link,
            policy,
            reply_timeout: None,
            verbose: true,
        }
    }

    /// Abort the run if a reply takes longer than `timeout`.
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Print one line per test case (default). The summary is printed regardless.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Give back the link, e.g. to shut the solver down explicitly.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Run every case of `cases` in order, writing the report to `out`.
    ///
    /// # Errors
    /// Fails without printing a summary if `cases` is empty, if the solver breaks the protocol
    /// (the error is a [`ProtocolError`]), or if `out` cannot be written.
    #[instrument(skip_all, fields(policy = %self.policy, cases = cases.len()))]
    pub fn run(&mut self, cases: &[TestCase], mut out: impl Write) -> anyhow::Result<RunReport> {
        if cases.is_empty() {
            bail!("cannot run an empty corpus");
        }

        let mut outcomes = Vec::with_capacity(cases.len());
        for (i, case) in cases.iter().enumerate() {
            let outcome = self.evaluate(i + 1, case)?;
            if self.verbose {
                writeln!(out, "{outcome}").context("could not write report")?;
                out.flush().context("could not write report")?;
            }
            outcomes.push(outcome);
        }

        let summary = RunSummary::from_outcomes(&outcomes)
            .context("no outcome collected for a non-empty corpus")?;
        writeln!(out, "average time: {:?}", summary.average_time)
            .and_then(|_| writeln!(out, "accuracy: {:?}", summary.accuracy))
            .and_then(|_| out.flush())
            .context("could not write summary")?;

        let report = RunReport { outcomes, summary };
        info!(
            average_time = summary.average_time,
            average_nodes = summary.average_nodes,
            accuracy = summary.accuracy,
            failed = ?report.failed_tests(),
            "run complete"
        );
        Ok(report)
    }

    /// One protocol round: send the position, await the reply, check it.
    ///
    /// # Errors
    /// Any deviation from the protocol is returned as a [`ProtocolError`].
    #[instrument(skip(self, case), fields(position = %case.position))]
    pub fn evaluate(
        &mut self,
        test_index: usize,
        case: &TestCase,
    ) -> Result<EvaluationOutcome, ProtocolError> {
        let fail = |violation| ProtocolError {
            test_index,
            position: case.position.clone(),
            violation,
        };

        self.link
            .send_line(&case.position)
            .map_err(|e| fail(ProtocolViolation::Io(e.to_string())))?;

        let reply = match self.link.recv_line(self.reply_timeout) {
            Ok(Some(reply)) => reply,
            Ok(None) => return Err(fail(ProtocolViolation::MissingReply)),
            Err(RecvError::Timeout(delay)) => return Err(fail(ProtocolViolation::Timeout(delay))),
            Err(RecvError::Io(e)) => return Err(fail(ProtocolViolation::Io(e.to_string()))),
        };
        trace!(%reply, "reply received");

        let response = reply.parse::<SolverResponse>().map_err(|reason| {
            fail(ProtocolViolation::Malformed {
                reply: reply.clone(),
                reason,
            })
        })?;

        let (expected, passed) = self.policy.check(case.expected_score, response.score);
        if passed {
            debug!(elapsed = response.elapsed, "passed");
        } else {
            warn!(expected, actual = response.score, "wrong answer");
        }

        Ok(EvaluationOutcome {
            test_index,
            position: case.position.clone(),
            elapsed: response.elapsed,
            node_count: response.node_count,
            passed,
            expected,
            actual: response.score,
        })
    }
}

#[cfg(test)]
mod driver_tests {
    use std::io::Cursor;

    use super::*;
    use crate::solver::LineLink;

    fn scripted(replies: &str) -> LineLink<Cursor<String>, Vec<u8>> {
        LineLink::new(Cursor::new(replies.to_string()), Vec::new())
    }

    fn case(position: &str, score: i64) -> TestCase {
        TestCase::new(position, score)
    }

    /// Run `cases` against canned `replies`; returns the result, the printed report and what
    /// was sent to the solver.
    fn run(
        policy: Policy,
        cases: &[TestCase],
        replies: &str,
    ) -> (anyhow::Result<RunReport>, String, String) {
        let mut driver = Driver::new(scripted(replies), policy);
        let mut out = Vec::new();
        let result = driver.run(cases, &mut out);
        let (_, sent) = driver.into_link().into_parts();
        (
            result,
            String::from_utf8(out).unwrap(),
            String::from_utf8(sent).unwrap(),
        )
    }

    #[test]
    fn strong_exact_match_passes() {
        let (report, printed, sent) = run(Policy::Strong, &[case("2224661", 0)], "tag 0 1500 12\n");
        let report = report.unwrap();
        let outcome = &report.outcomes[0];
        assert!(outcome.passed);
        assert_eq!((outcome.expected, outcome.actual), (0, 0));
        assert_eq!(sent, "2224661\n");
        assert_eq!(
            printed,
            "test: 1 2224661 time: 12 OK\naverage time: 12.0\naccuracy: 1.0\n"
        );
    }

    #[test]
    fn weak_compares_against_the_sign() {
        let (report, printed, _) = run(Policy::Weak, &[case("2224661", 0)], "tag 1 1500 12\n");
        let report = report.unwrap();
        let outcome = &report.outcomes[0];
        assert!(!outcome.passed);
        assert_eq!((outcome.expected, outcome.actual), (0, 1));
        assert!(printed.starts_with("test: 1 2224661 time: 12 WA expected: 0 gotten: 1\n"));
    }

    #[test]
    fn weak_reports_the_normalized_expectation() {
        let cases = [case("1", -5), case("2", 7), case("3", 7)];
        let (report, printed, _) = run(
            Policy::Weak,
            &cases,
            "a -1 10 10\nb 1 10 10\nc 7 10 10\n",
        );
        let report = report.unwrap();
        assert_eq!(report.failed_tests(), vec![3]);
        assert!(printed.contains("test: 3 3 time: 10 WA expected: 1 gotten: 7\n"));
    }

    #[test]
    fn one_outcome_per_case_in_order() {
        let cases = (1..=5).map(|i| case(&i.to_string(), i)).collect::<Vec<_>>();
        let replies = (1..=5).map(|i| format!("t {i} 1 1\n")).collect::<String>();
        let (report, _, sent) = run(Policy::Strong, &cases, &replies);
        let report = report.unwrap();
        assert_eq!(
            report.outcomes.iter().map(|o| o.test_index).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(
            report
                .outcomes
                .iter()
                .map(|o| o.position.as_str())
                .collect::<Vec<_>>(),
            vec!["1", "2", "3", "4", "5"]
        );
        assert_eq!(sent, "1\n2\n3\n4\n5\n");
        assert!(report.all_passed());
    }

    #[test]
    fn averages_are_arithmetic_means() {
        let cases = [case("1", 0), case("2", 0), case("3", 0), case("4", 0)];
        let (report, printed, _) = run(
            Policy::Strong,
            &cases,
            "t 0 100 10\nt 0 300 10\nt 1 500 10\nt 1 700 10\n",
        );
        let summary = report.unwrap().summary;
        assert_eq!(summary.average_time, 10.0);
        assert_eq!(summary.average_nodes, 400.0);
        assert_eq!(summary.accuracy, 0.5);
        assert!(printed.ends_with("average time: 10.0\naccuracy: 0.5\n"));
    }

    #[test]
    fn accuracy_bounds() {
        let cases = [case("1", 3), case("2", -3)];
        let (all, _, _) = run(Policy::Strong, &cases, "t 3 1 1\nt -3 1 1\n");
        assert_eq!(all.unwrap().summary.accuracy, 1.0);
        let (none, _, _) = run(Policy::Strong, &cases, "t 0 1 1\nt 0 1 1\n");
        let none = none.unwrap();
        assert_eq!(none.summary.accuracy, 0.0);
        assert_eq!(none.failed_tests(), vec![1, 2]);
    }

    #[test]
    fn short_reply_aborts_without_summary() {
        let cases = [case("11", 0), case("22", 0), case("33", 0)];
        let (result, printed, sent) = run(Policy::Strong, &cases, "t 0 5 5\nt 0 5\nt 0 5 5\n");
        let err = result.unwrap_err();
        let err = err.downcast_ref::<ProtocolError>().expect("protocol error");
        assert_eq!(err.test_index, 2);
        assert!(matches!(
            &err.violation,
            ProtocolViolation::Malformed { reply, .. } if reply == "t 0 5"
        ));
        assert_eq!(printed, "test: 1 11 time: 5 OK\n");
        assert_eq!(sent, "11\n22\n");
    }

    #[test]
    fn closed_output_aborts() {
        let (result, printed, _) = run(Policy::Strong, &[case("11", 0), case("22", 0)], "t 0 5 5\n");
        let err = result.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProtocolError>().map(|e| &e.violation),
            Some(&ProtocolViolation::MissingReply)
        );
        assert!(!printed.contains("accuracy"));
    }

    #[test]
    fn empty_corpus_is_rejected_before_sending() {
        let (result, printed, sent) = run(Policy::Strong, &[], "t 0 5 5\n");
        assert!(result.is_err());
        assert!(printed.is_empty());
        assert!(sent.is_empty());
    }

    #[test]
    fn quiet_run_prints_summary_only() {
        let mut driver = Driver::new(scripted("t 0 1 4\n"), Policy::Strong).with_verbose(false);
        let mut out = Vec::new();
        driver.run(&[case("5", 0)], &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "average time: 4.0\naccuracy: 1.0\n"
        );
    }

    struct SlowLink;

    impl SolverLink for SlowLink {
        fn send_line(&mut self, _line: &str) -> std::io::Result<()> {
            Ok(())
        }

        fn recv_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>, RecvError> {
            Err(RecvError::Timeout(timeout.unwrap_or(Duration::MAX)))
        }
    }

    #[test]
    fn timeout_is_a_protocol_error() {
        let mut driver =
            Driver::new(SlowLink, Policy::Strong).with_reply_timeout(Some(Duration::from_millis(5)));
        let err = driver.evaluate(1, &case("4", 0)).unwrap_err();
        assert_eq!(
            err.violation,
            ProtocolViolation::Timeout(Duration::from_millis(5))
        );
    }

    #[test]
    fn summary_of_nothing_is_undefined() {
        assert_eq!(RunSummary::from_outcomes(&[]), None);
    }
}
