use std::{
    process::Child,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use anyhow::{self, Context};
use cgroups_rs::Cgroup;
use tracing::{trace, warn};

use super::{create_process, wait_for_exit};

fn get_current_user_id() -> anyhow::Result<String> {
    let output = std::process::Command::new("id")
        .arg("-u")
        .output()
        .context("Could not launch 'id -u'")?;
    let stdout = output.stdout;
    let untrimed_id = std::str::from_utf8(&stdout).context("id is not a valid string")?;
    Ok(untrimed_id.trim().to_string())
}

fn get_cgroup_path(user_id: &str, group_name: &str) -> String {
    format!("user.slice/user-{user_id}.slice/user@{user_id}.service/{group_name}")
}

/// Create a cgroup at `path`.
///
/// * `max_memory` - Maximum available memory in Bytes. Non-positive means no restriction.
/// * `cpus` - which cpus the members can run on ("1-5,7", "1,3,4", ...). Empty string means no restriction.
fn create_cgroup(path: &str, max_memory: i64, cpus: &str) -> anyhow::Result<Cgroup> {
    let mut builder = cgroups_rs::cgroup_builder::CgroupBuilder::new(path);
    if max_memory > 0 {
        builder = builder.memory().memory_hard_limit(max_memory).done();
    }
    if !cpus.is_empty() {
        builder = builder.cpu().cpus(cpus.to_string()).done();
    }
    builder
        .build(cgroups_rs::hierarchies::auto())
        .context("could not create cgroup")
}

fn wait_for_cgroup_cleanup(cgroup: &Cgroup, pid: u64, max_duration: Duration) -> bool {
    let deadline = Instant::now() + max_duration;
    while cgroup.tasks().iter().any(|cpid| cpid.pid == pid) {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(std::cmp::min(Duration::from_millis(10), max_duration / 10));
    }
    true
}

/// A child process, possibly confined in its own cgroup.
///
/// The child is killed (and its cgroup removed) on drop if [`LimitedProcess::terminate`] was not
/// called before.
#[derive(Debug)]
pub struct LimitedProcess {
    pub child: Child,
    cgroup: Option<Cgroup>,
    cleaned_up: bool,
}

impl LimitedProcess {
    /// Launch `command` inside a fresh cgroup limited to `max_memory` bytes and `cpus`.
    pub fn launch(
        command: &str,
        args: &[String],
        max_memory: i64,
        cpus: &str,
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let user_id = get_current_user_id().context("could not get user id")?;
        let group_name = format!(
            "SOLVER_HARNESS_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = get_cgroup_path(&user_id, &group_name);
        let group = create_cgroup(&path, max_memory, cpus)?;
        trace!(cgroup = path, "cgroup created");

        let mut child = match create_process(command, args, allow_stderr) {
            Ok(child) => child,
            Err(e) => {
                let _ = group.delete();
                return Err(e);
            }
        };

        let pid = child.id() as u64;
        if let Err(e) = group.add_task_by_tgid(cgroups_rs::CgroupPid { pid }) {
            let _ = child.kill();
            let _ = child.wait();
            let _ = group.delete();
            return Err(e).context("could not add process to cgroup");
        }

        Ok(LimitedProcess {
            child,
            cgroup: Some(group),
            cleaned_up: false,
        })
    }

    /// Launch `command` without any resource restriction.
    pub fn launch_without_container(
        command: &str,
        args: &[String],
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        let child =
            create_process(command, args, allow_stderr).context("could not create process")?;

        Ok(LimitedProcess {
            child,
            cgroup: None,
            cleaned_up: false,
        })
    }

    pub fn is_contained(&self) -> bool {
        self.cgroup.is_some()
    }

    /// Give the child `grace` to exit by itself, then kill it and reap it.
    pub fn terminate(&mut self, grace: Duration) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        if !wait_for_exit(&mut self.child, grace) {
            trace!(pid = self.child.id(), "solver still running, killing it");
            match &self.cgroup {
                Some(cgroup) => cgroup.kill().context("could not kill cgroup")?,
                None => self.child.kill().context("could not kill process")?,
            }
        }
        self.child.wait().context("could not reap solver process")?;

        if let Some(cgroup) = &self.cgroup {
            if !wait_for_cgroup_cleanup(cgroup, self.child.id() as u64, grace) {
                warn!("solver cgroup still has tasks after kill");
            }
            if let Err(e) = cgroup.delete() {
                warn!("Failed to remove cgroup. If this happens a lot, it may slow down the computer. {e}");
            }
        }
        self.cleaned_up = true;
        Ok(())
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        const CLEANUP_DURATION: Duration = Duration::from_millis(10);
        if let Err(e) = self.terminate(CLEANUP_DURATION) {
            warn!("could not clean up solver process {}: {e:#}", self.child.id());
        }
    }
}
