use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub version: u32,
    pub launcher: LauncherSettings,
    pub services: BTreeMap<String, Service>,
}

/// Settings that apply to the launcher as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct LauncherSettings {
    /// Time a service gets to exit after a graceful stop request.
    pub grace_period: Duration,
    /// Upper bound for a service to start accepting connections on its port.
    pub readiness_timeout: Duration,
    /// Uptime after which a service's consecutive restart count is forgotten.
    pub stable_after: Duration,
    /// Directories that must exist and be writable before anything is spawned.
    pub directories: Vec<PathBuf>,
    /// When set, service output is mirrored to `<log_dir>/<service>.log`.
    pub log_dir: Option<PathBuf>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            stable_after: DEFAULT_STABLE_AFTER,
            directories: Vec::new(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    pub deps: Vec<String>,
    pub port: Option<u16>,
    pub restart: Restart,
    pub essential: bool,
    pub grace_period: Option<Duration>,
}

impl Service {
    /// A service running `cmd` with every other setting at its default.
    #[must_use]
    pub fn new(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            cwd: None,
            env: None,
            deps: Vec::new(),
            port: None,
            restart: Restart::Never,
            essential: true,
            grace_period: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Restart {
    #[default]
    Never,
    /// Restart only after a non-zero exit.
    OnFailure(RetryPolicy),
    /// Restart after any exit that was not requested by the launcher.
    Always(RetryPolicy),
}

impl Restart {
    /// Returns the retry policy if a process that exited with `code` should be restarted.
    #[must_use]
    pub fn policy_for(&self, code: i32) -> Option<&RetryPolicy> {
        match self {
            Restart::Never => None,
            Restart::OnFailure(policy) => (code != 0).then_some(policy),
            Restart::Always(policy) => Some(policy),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Delay before restart number `attempt` (1-based): the initial backoff
    /// doubled for every previous attempt, capped at `max_backoff`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff
            .checked_mul(1 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
