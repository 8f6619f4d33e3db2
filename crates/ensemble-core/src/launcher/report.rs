use std::fmt;

/// Why supervision ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A stop was requested by the named signal.
    Signal(String),
    /// An essential service failed for good.
    ServiceFailed(String),
    /// An essential service without a restart policy exited cleanly.
    ServiceStopped(String),
    /// Nothing is left running and nothing will be restarted.
    AllExited,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Signal(signal) => write!(f, "received {signal}"),
            Outcome::ServiceFailed(service) => write!(f, "essential service `{service}` failed"),
            Outcome::ServiceStopped(service) => write!(f, "essential service `{service}` exited"),
            Outcome::AllExited => f.write_str("all services exited"),
        }
    }
}

/// Result of a full launcher run, after everything has been stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub outcome: Outcome,
    /// Services that ended in the failed state.
    pub failed: Vec<String>,
}

impl Report {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !matches!(self.outcome, Outcome::ServiceFailed(_))
    }

    /// Process exit code for the launcher: 0 on success, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_success())
    }
}
