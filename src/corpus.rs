//! Loading of test corpora.
//!
//! A corpus is a plain text file with one test case per line:
//!
//! ```text
//! 2252576253462244111563365343671351441 -1
//! 7422341735647741166133573473242566 2
//! ```
//!
//! The first token is the position (a move sequence, opaque to the harness) and the second one
//! is the expected score. Blank lines are ignored, leading and trailing whitespace is not
//! significant, and tokens are separated by any run of whitespace. Positions must be ASCII, as
//! they are sent as is on the ASCII wire protocol.
//!
//! Any malformed line makes the whole corpus invalid: a partially loaded corpus cannot be scored
//! meaningfully, so loading fails before the solver is ever contacted.

use std::{
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    str::FromStr,
};

use anyhow::Context;
use tracing::{debug, instrument};

/// One recorded position and its known-correct evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Encoded move sequence sent verbatim to the solver.
    pub position: String,
    /// Exact score a strong solver must report.
    pub expected_score: i64,
    /// 1-based line of the corpus this case was read from (0 when built by hand).
    pub line_number: usize,
}

impl TestCase {
    /// Build a test case that does not come from a corpus file.
    pub fn new(position: impl Into<String>, expected_score: i64) -> TestCase {
        TestCase {
            position: position.into(),
            expected_score,
            line_number: 0,
        }
    }
}

impl FromStr for TestCase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = s.split_whitespace().collect::<Vec<_>>();
        let &[position, score] = tokens.as_slice() else {
            return Err(format!(
                "expected 2 whitespace-separated fields (position and score), found {}",
                tokens.len()
            ));
        };
        if !position.is_ascii() {
            return Err(format!("position '{position}' is not ASCII"));
        }
        let expected_score = score
            .parse()
            .map_err(|_| format!("score '{score}' is not an integer"))?;
        Ok(TestCase::new(position, expected_score))
    }
}

/// A corpus that cannot be used for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusFormatError {
    /// A non-blank line that is not `<position> <score>`.
    MalformedLine {
        /// 1-based line number in the corpus.
        line_number: usize,
        /// The offending line.
        line: String,
        /// What is wrong with it.
        reason: String,
    },
    /// No test case at all: statistics would be undefined.
    Empty,
}

impl Display for CorpusFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorpusFormatError::MalformedLine {
                line_number,
                line,
                reason,
            } => write!(f, "malformed corpus line {line_number} ({line:?}): {reason}"),
            CorpusFormatError::Empty => write!(f, "corpus contains no test case"),
        }
    }
}

impl std::error::Error for CorpusFormatError {}

/// Parse every test case of `reader`, in order.
///
/// # Errors
/// Returns a [`CorpusFormatError`] (wrapped in `anyhow`) on the first malformed line, or if the
/// corpus is empty. I/O errors are forwarded with context.
pub fn load_corpus(reader: impl BufRead) -> anyhow::Result<Vec<TestCase>> {
    let mut cases = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line_number = i + 1;
        let line = line.with_context(|| format!("could not read corpus line {line_number}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let case = line
            .parse::<TestCase>()
            .map_err(|reason| CorpusFormatError::MalformedLine {
                line_number,
                line: line.clone(),
                reason,
            })?;
        cases.push(TestCase {
            line_number,
            ..case
        });
    }

    if cases.is_empty() {
        return Err(CorpusFormatError::Empty.into());
    }
    debug!(test_cases = cases.len(), "corpus loaded");
    Ok(cases)
}

/// Open and parse the corpus at `path`.
#[instrument]
pub fn load_corpus_file(path: &Path) -> anyhow::Result<Vec<TestCase>> {
    let file =
        File::open(path).with_context(|| format!("could not open corpus '{}'", path.display()))?;
    load_corpus(BufReader::new(file))
        .with_context(|| format!("invalid corpus '{}'", path.display()))
}
