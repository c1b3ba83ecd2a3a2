//! The line-oriented link to a solver, and the solver process behind it.
//!
//! The driver only needs two operations: write one line (flushed right away, so the solver sees a
//! complete request) and read one line. [`SolverLink`] exposes exactly that pair. It is
//! implemented by [`SolverProcess`], which spawns the real solver, and by [`LineLink`], which
//! wraps any reader/writer pair.

use std::{
    fmt::Display,
    io::{BufRead, BufReader, Write},
    process::ChildStdin,
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::Duration,
};

use anyhow::Context;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    cgroup_manager::LimitedProcess, configuration::Configuration, limits::SolverLimits,
    protocol::request_line,
};

/// Why no reply line could be read.
#[derive(Debug)]
pub enum RecvError {
    /// Nothing arrived within the allowed delay.
    Timeout(Duration),
    /// The underlying stream failed.
    Io(std::io::Error),
}

impl Display for RecvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvError::Timeout(delay) => write!(f, "Timeout Error after {delay:?}"),
            RecvError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RecvError {}

/// Bidirectional line channel to a solver.
pub trait SolverLink {
    /// Write the request for `line` (see [`request_line`]) and flush.
    fn send_line(&mut self, line: &str) -> std::io::Result<()>;

    /// Block until one line is available and return it without its line terminator.
    ///
    /// Returns `Ok(None)` when the solver closed its output. `timeout` bounds the wait when
    /// the link supports it.
    fn recv_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>, RecvError>;
}

fn strip_line_terminator(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

/// A [`SolverLink`] over any reader and writer. Timeouts are ignored.
#[derive(Debug)]
pub struct LineLink<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LineLink<R, W> {
    /// Read replies from `reader` and write requests to `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        LineLink { reader, writer }
    }

    /// Give back the reader and the writer, e.g. to inspect what was sent.
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: BufRead, W: Write> SolverLink for LineLink<R, W> {
    fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(request_line(line).as_bytes())?;
        self.writer.flush()
    }

    fn recv_line(&mut self, _timeout: Option<Duration>) -> Result<Option<String>, RecvError> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).map_err(RecvError::Io)? {
            0 => Ok(None),
            _ => Ok(Some(strip_line_terminator(line))),
        }
    }
}

/// Program (and arguments) used to start the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverCommand {
    /// Executable, looked up in `PATH` if not a path.
    pub program: String,
    /// Arguments passed as is.
    pub args: Vec<String>,
}

impl SolverCommand {
    /// Run `program` without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        SolverCommand {
            program: program.into(),
            args: vec![],
        }
    }

    /// Append `args` to the command line.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Display for SolverCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A running solver, spoken to through its standard streams.
///
/// Its stdout is drained line by line by a reader thread so that replies can be awaited with a
/// timeout. The process is stopped on drop: stdin is closed first so a well-behaved solver can
/// exit on end of input, then it is killed if still alive.
#[derive(Debug)]
pub struct SolverProcess {
    process: LimitedProcess,
    stdin: Option<ChildStdin>,
    replies: Receiver<std::io::Result<String>>,
    stopped: bool,
}

impl SolverProcess {
    const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

    /// Start `command`, applying `limits`.
    ///
    /// # Errors
    /// Fails if the solver cannot be started, or if the limits cannot be enforced and
    /// `config.allow_uncontained` is not set.
    #[instrument(skip_all, fields(solver = %command))]
    pub fn spawn(
        command: &SolverCommand,
        limits: &SolverLimits,
        config: &Configuration,
    ) -> anyhow::Result<SolverProcess> {
        let allow_stderr = config.debug_solver_stderr;
        let mut process = if limits.needs_container() {
            match Self::launch_contained(command, limits, allow_stderr) {
                Ok(process) => process,
                Err(e) if config.allow_uncontained => {
                    warn!("solver limits not enforced: {e:#}");
                    LimitedProcess::launch_without_container(
                        &command.program,
                        &command.args,
                        allow_stderr,
                    )?
                }
                Err(e) => {
                    return Err(e).context("could not enforce solver limits (see --allow-uncontained)")
                }
            }
        } else {
            LimitedProcess::launch_without_container(&command.program, &command.args, allow_stderr)?
        };
        info!(
            pid = process.child.id(),
            contained = process.is_contained(),
            "solver started"
        );

        let stdin = process.child.stdin.take().context("solver stdin not piped")?;
        let stdout = process
            .child
            .stdout
            .take()
            .context("solver stdout not piped")?;

        // Not joined on shutdown: a grandchild of the solver may keep the pipe open.
        let (tx, replies) = mpsc::channel();
        thread::Builder::new()
            .name("solver-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
                trace!("solver output closed");
            })
            .context("could not start solver reader thread")?;

        Ok(SolverProcess {
            process,
            stdin: Some(stdin),
            replies,
            stopped: false,
        })
    }

    fn launch_contained(
        command: &SolverCommand,
        limits: &SolverLimits,
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        let cpus = limits.cpu_list();
        let max_memory = limits.ram.map_or(0, |ram| ram as i64);
        if cpus.is_empty() {
            return LimitedProcess::launch(&command.program, &command.args, max_memory, "", allow_stderr);
        }

        let mut args = vec!["-c".to_string(), cpus.clone(), command.program.clone()];
        args.extend(command.args.iter().cloned());
        LimitedProcess::launch("taskset", &args, max_memory, &cpus, allow_stderr)
    }

    /// Close the solver's input and wait for it to stop, killing it after a grace period.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.stopped = true;
        drop(self.stdin.take());
        self.process.terminate(Self::SHUTDOWN_GRACE)?;
        debug!("solver stopped");
        Ok(())
    }
}

impl SolverLink for SolverProcess {
    fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "solver input closed")
        })?;
        stdin.write_all(request_line(line).as_bytes())?;
        stdin.flush()
    }

    fn recv_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>, RecvError> {
        let received = match timeout {
            Some(delay) => match self.replies.recv_timeout(delay) {
                Ok(line) => Some(line),
                Err(RecvTimeoutError::Timeout) => return Err(RecvError::Timeout(delay)),
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.replies.recv().ok(),
        };
        match received {
            Some(Ok(line)) => Ok(Some(strip_line_terminator(line))),
            Some(Err(e)) => Err(RecvError::Io(e)),
            None => Ok(None),
        }
    }
}

impl Drop for SolverProcess {
    fn drop(&mut self) {
        if !self.stopped {
            if let Err(e) = self.stop() {
                warn!("solver cleanup failed: {e:#}");
            }
        }
    }
}

#[cfg(test)]
mod solver_tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn line_link_frames_requests() {
        let mut link = LineLink::new(Cursor::new("tag 0 1 2\r\nlast".to_string()), Vec::new());
        link.send_line("2224661").unwrap();
        link.send_line("41").unwrap();
        assert_eq!(link.recv_line(None).unwrap().as_deref(), Some("tag 0 1 2"));
        assert_eq!(link.recv_line(None).unwrap().as_deref(), Some("last"));
        assert!(link.recv_line(None).unwrap().is_none());
        let (_, sent) = link.into_parts();
        assert_eq!(sent, b"2224661\n41\n");
        assert_eq!(
            String::from_utf8(sent).unwrap(),
            request_line("2224661") + &request_line("41")
        );
    }

    #[test]
    fn command_display() {
        let command = SolverCommand::new("sh").with_args(["-c", "cat"]);
        assert_eq!(command.to_string(), "sh -c cat");
    }

    #[cfg(unix)]
    fn shell(script: &str) -> SolverCommand {
        SolverCommand::new("sh").with_args(["-c", script])
    }

    #[cfg(unix)]
    #[test]
    fn talks_to_a_process() {
        let mut solver = SolverProcess::spawn(
            &shell("while read p; do echo \"$p 0 10 3\"; done"),
            &SolverLimits::default(),
            &Configuration::new(),
        )
        .unwrap();
        solver.send_line("1234").unwrap();
        assert_eq!(
            solver.recv_line(Some(Duration::from_secs(5))).unwrap().as_deref(),
            Some("1234 0 10 3")
        );
        solver.shutdown().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn silent_process_times_out() {
        let mut solver = SolverProcess::spawn(
            &shell("exec sleep 30"),
            &SolverLimits::default(),
            &Configuration::new(),
        )
        .unwrap();
        solver.send_line("1").unwrap();
        let err = solver
            .recv_line(Some(Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, RecvError::Timeout(_)));
        // dropping kills the sleeping solver instead of waiting for it
    }

    #[cfg(unix)]
    #[test]
    fn exited_process_reports_end_of_output() {
        let mut solver = SolverProcess::spawn(
            &shell("exit 0"),
            &SolverLimits::default(),
            &Configuration::new(),
        )
        .unwrap();
        assert!(solver
            .recv_line(Some(Duration::from_secs(5)))
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = SolverProcess::spawn(
            &SolverCommand::new("/no/such/solver"),
            &SolverLimits::default(),
            &Configuration::new(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("not found"), "{err:#}");
    }
}
