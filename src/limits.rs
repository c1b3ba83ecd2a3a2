//! Resource limits applied to the solver process.
//!
//! A solver is benchmarked, so it can be pinned to some CPUs and given a memory cap. Limits are
//! enforced with a Linux cgroup v2 and `taskset`. A per-reply timeout can also be set; a solver
//! that does not answer in time is treated as not following the protocol.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use solver_harness::limits::SolverLimitsBuilder;
//!
//! let limits = SolverLimitsBuilder::new()
//!     .with_ram(2_000)
//!     .with_cpu_list("2-3")
//!     .with_reply_timeout(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//! ```
//!
//! [`SolverLimitsBuilder::from_env()`] reads the same settings from environment variables.

use std::{collections::BTreeSet, env, time::Duration};

use anyhow::{bail, Context};

/// Builder for [`SolverLimits`]. Everything is unlimited by default.
#[derive(Debug, Default, Clone)]
pub struct SolverLimitsBuilder {
    ram: Option<usize>,
    cpus: Option<String>,
    reply_timeout: Option<Duration>,
}

impl SolverLimitsBuilder {
    /// No limit at all.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read limits from environment variables.
    ///
    /// - `SOLVER_RAM_MB` (usize): memory cap of the solver in MB
    /// - `SOLVER_CPU_LIST` (string): comma-separated list or ranges of CPUs, e.g. "0-3,6"
    /// - `REPLY_TIMEOUT_MS` (u64): maximum wait for one reply, in milliseconds
    ///
    /// Unset or unparsable variables leave the corresponding limit unset.
    #[must_use]
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            env::var(var).ok()?.parse().ok()
        }

        SolverLimitsBuilder {
            ram: parse("SOLVER_RAM_MB"),
            cpus: env::var("SOLVER_CPU_LIST").ok(),
            reply_timeout: parse::<u64>("REPLY_TIMEOUT_MS").map(Duration::from_millis),
        }
    }

    /// Sets the maximum RAM of the solver (in MB).
    #[must_use]
    pub fn with_ram(self, max: usize) -> Self {
        Self {
            ram: Some(max),
            ..self
        }
    }

    /// Sets the CPUs the solver may run on, e.g. `"0-3,6,8"` (inclusive ranges and single ids).
    #[must_use]
    pub fn with_cpu_list(self, cpus: &str) -> Self {
        Self {
            cpus: Some(cpus.to_string()),
            ..self
        }
    }

    /// Sets the maximum wait for each reply.
    #[must_use]
    pub fn with_reply_timeout(self, duration: Duration) -> Self {
        Self {
            reply_timeout: Some(duration),
            ..self
        }
    }

    /// Validate the settings against the host.
    ///
    /// # Errors
    ///
    /// Fails if the RAM cap exceeds the available memory, or if the CPU list is invalid or names
    /// a CPU the host does not have.
    pub fn build(self) -> anyhow::Result<SolverLimits> {
        let ram = match self.ram {
            Some(mb) => {
                let mut sys = sysinfo::System::new();
                sys.refresh_memory();
                let available = sys.available_memory() as usize;
                let Some(ram) = mb.checked_mul(1_000_000) else {
                    bail!("Solver RAM size ({mb}MB) does not fit in memory");
                };
                if ram > available {
                    bail!(
                        "Solver RAM size ({mb}MB) is greater than available RAM ({}MB)",
                        available / 1_000_000
                    );
                }
                Some(ram)
            }
            None => None,
        };

        let cpus = match self.cpus {
            Some(list) => {
                let cpus = cpu_list_to_set(&list).context("error parsing cpu list")?;
                let host_cpus = num_cpus::get();
                if let Some(&cpu) = cpus.iter().find(|&&cpu| usize::from(cpu) >= host_cpus) {
                    bail!("CPU {cpu} does not exist ({host_cpus} logical CPUs available)");
                }
                cpus
            }
            None => BTreeSet::new(),
        };

        Ok(SolverLimits {
            ram,
            cpus,
            reply_timeout: self.reply_timeout,
        })
    }
}

fn cpu_list_to_set(s: &str) -> anyhow::Result<BTreeSet<u8>> {
    if s.is_empty() {
        bail!("Empty string");
    }
    let mut set = BTreeSet::new();
    for item in s.split(',') {
        let parse = |value: &str| -> anyhow::Result<u8> {
            value
                .trim()
                .parse()
                .with_context(|| format!("could not parse {value}"))
        };
        match item.split('-').collect::<Vec<_>>()[..] {
            [value] => {
                set.insert(parse(value)?);
            }
            [start, end] => {
                let (start, end) = (parse(start)?, parse(end)?);
                set.extend(start.min(end)..=start.max(end));
            }
            _ => bail!(
                "each comma-separated item must be a number or a range (e.g. '0-3'), got '{item}'"
            ),
        }
    }
    Ok(set)
}

/// Obtained using [`SolverLimitsBuilder`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SolverLimits {
    /// Memory cap in bytes.
    pub(crate) ram: Option<usize>,
    pub(crate) cpus: BTreeSet<u8>,
    pub(crate) reply_timeout: Option<Duration>,
}

impl SolverLimits {
    /// create a SolverLimitsBuilder
    pub fn builder() -> SolverLimitsBuilder {
        SolverLimitsBuilder::new()
    }

    /// True if the solver must run inside a cgroup.
    pub fn needs_container(&self) -> bool {
        self.ram.is_some() || !self.cpus.is_empty()
    }

    /// Maximum wait for each reply, `None` to wait forever.
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout
    }

    /// CPU list in the `taskset`/cpuset format, empty if unrestricted.
    pub(crate) fn cpu_list(&self) -> String {
        self.cpus
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod limits_tests {
    use super::*;

    #[test]
    fn default_is_unlimited() {
        let limits = SolverLimitsBuilder::new().build().unwrap();
        assert!(!limits.needs_container());
        assert_eq!(limits.reply_timeout(), None);
        assert_eq!(limits.cpu_list(), "");
    }

    #[test]
    fn parses_cpu_lists() {
        assert_eq!(
            cpu_list_to_set("0-2,5").unwrap().into_iter().collect::<Vec<_>>(),
            vec![0, 1, 2, 5]
        );
        assert_eq!(
            cpu_list_to_set("3-1").unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(cpu_list_to_set("").is_err());
        assert!(cpu_list_to_set("1-2-3").is_err());
        assert!(cpu_list_to_set("a").is_err());
    }

    #[test]
    fn cpu_zero_always_exists() {
        let limits = SolverLimitsBuilder::new().with_cpu_list("0").build().unwrap();
        assert!(limits.needs_container());
        assert_eq!(limits.cpu_list(), "0");
    }

    #[test]
    fn rejects_missing_cpu() {
        assert!(SolverLimitsBuilder::new()
            .with_cpu_list("255")
            .build()
            .is_err());
    }

    #[test]
    fn rejects_absurd_ram() {
        assert!(SolverLimitsBuilder::new()
            .with_ram(usize::MAX / 1_000_000)
            .build()
            .is_err());
    }

    #[test]
    fn ram_overflowing_bytes_is_rejected() {
        for mb in [usize::MAX, usize::MAX / 1_000_000 + 1] {
            let err = SolverLimitsBuilder::new().with_ram(mb).build().unwrap_err();
            assert!(err.to_string().contains("does not fit"), "{err}");
        }
    }

    #[test]
    fn keeps_reply_timeout() {
        let limits = SolverLimits::builder()
            .with_reply_timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(limits.reply_timeout(), Some(Duration::from_millis(250)));
    }
}
