use std::{process::Child, time::Duration};

use anyhow::{self, bail, Context};
use tracing::warn;

use super::{create_process, wait_for_exit};

#[derive(Debug)]
pub struct LimitedProcess {
    pub child: Child,
    cleaned_up: bool,
}

impl LimitedProcess {
    pub fn launch(
        _command: &str,
        _args: &[String],
        _max_memory: i64,
        _cpus: &str,
        _allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        bail!("cgroups only available on linux")
    }

    pub fn launch_without_container(
        command: &str,
        args: &[String],
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        let child =
            create_process(command, args, allow_stderr).context("could not create process")?;

        Ok(LimitedProcess {
            child,
            cleaned_up: false,
        })
    }

    pub fn is_contained(&self) -> bool {
        false
    }

    pub fn terminate(&mut self, grace: Duration) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        if !wait_for_exit(&mut self.child, grace) {
            self.child.kill().context("could not kill process")?;
        }
        self.child.wait().context("could not reap solver process")?;
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
