use std::{fmt, time::SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotStarted,
    Starting,
    Running,
    Failed,
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::NotStarted => "not started",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Failed => "failed",
            Status::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot of a supervised service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceState {
    pub name: String,
    pub pid: Option<u32>,
    pub status: Status,
    pub started_at: Option<SystemTime>,
    pub restarts: u32,
    pub last_exit: Option<i32>,
    pub failure: Option<String>,
}
