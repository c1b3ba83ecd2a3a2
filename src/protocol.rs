//! Wire protocol spoken with the solver, and how its answers are checked.
//!
//! The protocol is line oriented and ASCII encoded:
//!  * Harness -> Solver : `<position>\n`
//!  * Solver -> Harness : `<tag> <score> <node_count> <elapsed>\n`
//!
//! The tag is reserved by the solver and never interpreted here. There is no correlation id:
//! a reply always answers the single outstanding request.

use std::{fmt::Display, str::FromStr, time::Duration};

/// How a solver answer is compared to the recorded one. Fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// The exact score must match.
    #[default]
    Strong,
    /// Only the sign (win, draw or loss) must match.
    Weak,
}

impl Policy {
    /// Value the solver is expected to report for a case recorded with `raw` score.
    pub fn expected_for(self, raw: i64) -> i64 {
        match self {
            Policy::Strong => raw,
            Policy::Weak => raw.signum(),
        }
    }

    /// Returns the policy-adjusted expected value and whether `actual` matches it.
    pub fn check(self, raw: i64, actual: i64) -> (i64, bool) {
        let expected = self.expected_for(raw);
        (expected, actual == expected)
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Strong => write!(f, "strong"),
            Policy::Weak => write!(f, "weak"),
        }
    }
}

/// Request sent to the solver for `position`.
pub fn request_line(position: &str) -> String {
    format!("{position}\n")
}

/// A parsed solver reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverResponse {
    /// Opaque leading token.
    pub tag: String,
    /// Evaluation of the position.
    pub score: i64,
    /// Nodes explored by the search.
    pub node_count: u64,
    /// Time reported by the solver, in its own unit (usually microseconds or milliseconds).
    pub elapsed: i64,
}

impl FromStr for SolverResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = s.split_whitespace().collect::<Vec<_>>();
        let &[tag, score, node_count, elapsed] = tokens.as_slice() else {
            return Err(format!(
                "expected 4 fields (tag, score, node count, time), found {}",
                tokens.len()
            ));
        };

        fn field<T: FromStr>(name: &str, token: &str) -> Result<T, String> {
            token
                .parse()
                .map_err(|_| format!("{name} '{token}' is not a valid integer"))
        }

        Ok(SolverResponse {
            tag: tag.to_string(),
            score: field("score", score)?,
            node_count: field("node count", node_count)?,
            elapsed: field("time", elapsed)?,
        })
    }
}

/// What went wrong while talking to the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The solver closed its output before replying.
    MissingReply,
    /// No reply within the configured delay.
    Timeout(Duration),
    /// The reply could not be parsed.
    Malformed {
        /// The reply as received.
        reply: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Reading from or writing to the solver pipes failed.
    Io(String),
}

/// A solver that does not follow the protocol. Always fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// 1-based index of the test case being evaluated.
    pub test_index: usize,
    /// Position of that test case.
    pub position: String,
    /// What the solver did wrong.
    pub violation: ProtocolViolation,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            test_index,
            position,
            violation,
        } = self;
        write!(f, "protocol error on test {test_index} ({position}): ")?;
        match violation {
            ProtocolViolation::MissingReply => write!(f, "solver closed its output without replying"),
            ProtocolViolation::Timeout(delay) => write!(f, "no reply after {delay:?}"),
            ProtocolViolation::Malformed { reply, reason } => {
                write!(f, "invalid reply {reply:?}: {reason}")
            }
            ProtocolViolation::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
