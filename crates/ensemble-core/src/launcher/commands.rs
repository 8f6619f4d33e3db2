use std::time::Duration;

use tokio::sync::mpsc::Sender;

use crate::types::Status;

/// Notices that helper tasks send back to the launcher's monitor loop.
#[derive(Debug)]
pub(crate) enum LauncherCommand {
    Exited {
        service: String,
        generation: u64,
        code: i32,
    },
    RestartDue {
        service: String,
        generation: u64,
    },
    Ready {
        service: String,
        generation: u64,
    },
    NotReady {
        service: String,
        generation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LauncherEvent {
    Log {
        service: String,
        stream: OutputStream,
        line: String,
    },
    StatusChanged {
        service: String,
        status: Status,
    },
    Exited {
        service: String,
        code: i32,
    },
    Restarting {
        service: String,
        attempt: u32,
        delay: Duration,
    },
    ForceKilled {
        service: String,
    },
}

/// Cuts a running shutdown short: services still inside their grace period
/// are killed at once. Obtained from [`crate::Launcher::force_stop`].
#[derive(Debug, Clone)]
pub struct ForceStop(Sender<()>);

impl ForceStop {
    pub(crate) fn new(tx: Sender<()>) -> Self {
        Self(tx)
    }

    pub fn force(&self) {
        // A request that is already queued is just as good.
        let _ = self.0.try_send(());
    }
}
