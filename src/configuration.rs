//! Config for the runner behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional, and case-insensitive. Set the value to `"true"` to enable a flag.
//!
//! - `HARNESS_VERBOSE`: Print one report line per test case (default: `true`)
//! - `HARNESS_LOG`: Enable logging to a file (default: `false`)
//! - `HARNESS_ALLOW_UNCONTAINED`: Run the solver without resource limits if cgroups are not available (default: `false`)
//! - `HARNESS_DEBUG_SOLVER_STDERR`: Let the solver's stderr through (default: `false`)

/// Configuration for runner behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) allow_uncontained: bool,
    pub(crate) debug_solver_stderr: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Every test case is reported on stdout.
    /// - Logging to file is disabled.
    /// - Solver limits that cannot be enforced are an error.
    /// - Solver stderr output is discarded.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            allow_uncontained: false,
            debug_solver_stderr: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// An unset variable keeps the default of its flag. A set variable enables the flag if its
    /// value is `"true"` (case-insensitive) and disables it otherwise, `HARNESS_VERBOSE` included.
    pub fn from_env() -> Self {
        Self {
            verbose: get_env_flag("HARNESS_VERBOSE", true),
            log: get_env_flag("HARNESS_LOG", false),
            allow_uncontained: get_env_flag("HARNESS_ALLOW_UNCONTAINED", false),
            debug_solver_stderr: get_env_flag("HARNESS_DEBUG_SOLVER_STDERR", false),
        }
    }

    /// Enable or disable per-test report lines. The summary is always printed.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable running the solver without its resource limits.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    /// Enable or disable solver stderr output (debug purposes only).
    pub fn with_debug_solver_stderr(mut self, value: bool) -> Self {
        self.debug_solver_stderr = value;
        self
    }
}

fn get_env_flag(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(val) => val.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod configuration_tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = Configuration::new()
            .with_verbose(false)
            .with_log(true)
            .with_allow_uncontained(true)
            .with_debug_solver_stderr(true);
        assert!(!config.verbose);
        assert!(config.log);
        assert!(config.allow_uncontained);
        assert!(config.debug_solver_stderr);
        assert_eq!(Configuration::default(), Configuration::new());
    }

    #[test]
    fn set_flag_other_than_true_disables() {
        const VAR: &str = "HARNESS_CONFIGURATION_TESTS_FLAG";
        std::env::remove_var(VAR);
        assert!(get_env_flag(VAR, true));
        assert!(!get_env_flag(VAR, false));

        std::env::set_var(VAR, "TRUE");
        assert!(get_env_flag(VAR, false));
        std::env::set_var(VAR, "yes");
        assert!(!get_env_flag(VAR, true));
        std::env::set_var(VAR, "");
        assert!(!get_env_flag(VAR, true));
        std::env::remove_var(VAR);
    }
}
