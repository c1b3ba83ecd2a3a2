//! Solver process creation, optionally inside a resource-limited cgroup.

#[cfg(target_os = "linux")]
mod cgroup_manager_linux;

#[cfg(target_os = "linux")]
pub use cgroup_manager_linux::*;

#[cfg(not(target_os = "linux"))]
mod cgroup_manager_stub;

use std::{
    process::{Child, Stdio},
    time::{Duration, Instant},
};

use anyhow::Context;
#[cfg(not(target_os = "linux"))]
pub use cgroup_manager_stub::*;

/// Spawn `command` with piped stdin and stdout, the two ends of the protocol.
pub(self) fn create_process(
    command: &str,
    args: &[String],
    allow_stderr: bool,
) -> anyhow::Result<Child> {
    let mut cmd = std::process::Command::new(command);
    cmd.args(args).stdin(Stdio::piped()).stdout(Stdio::piped());
    if !allow_stderr {
        cmd.stderr(Stdio::null());
    }
    cmd.spawn()
        .with_context(|| format!("command '{command}' not found"))
}

/// Poll `child` until it exits or `max_duration` elapses. Returns true if it exited.
pub(self) fn wait_for_exit(child: &mut Child, max_duration: Duration) -> bool {
    let deadline = Instant::now() + max_duration;
    loop {
        match child.try_wait() {
            Ok(Some(_status)) => return true,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(std::cmp::min(Duration::from_millis(10), max_duration / 10));
            }
            _ => return false,
        }
    }
}
