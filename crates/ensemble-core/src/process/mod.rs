use futures::Stream;
use std::fmt::Debug;
use std::pin::Pin;
use std::{path::PathBuf, time::Duration};

use tokio::sync::watch;

use crate::error::Result;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(unix)]
pub mod unix;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Exit code of a process, published once it terminates.
///
/// Holds `None` while the process runs. Processes killed by a signal report
/// `128 + signal`, the way shells do.
pub type ExitWatch = watch::Receiver<Option<i32>>;

#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub name: String,
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ProcId(pub u64);

pub struct Spawned {
    pub id: ProcId,
    pub pid: Option<u32>,
    pub stdout: BoxStream<Vec<u8>>,
    pub stderr: BoxStream<Vec<u8>>,
    pub exit: ExitWatch,
}

impl Debug for Spawned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawned")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("stdout", &"<stream>")
            .field("stderr", &"<stream>")
            .field("exit", &*self.exit.borrow())
            .finish()
    }
}

#[async_trait::async_trait]
pub trait ProcessManager: Send + Sync {
    /// Spawn a new process.
    async fn spawn(&mut self, spec: CommandSpec) -> Result<Spawned>;
    /// Gracefully shutdown a process.
    async fn shutdown(&mut self, id: ProcId) -> Result<()>;
    /// Wait up to `d` for a process to exit, returning its exit code.
    async fn wait(&mut self, id: ProcId, d: Duration) -> Result<Option<i32>>;
    /// Forcefully kill a process and whatever is left of its process tree,
    /// also after the process itself has exited.
    async fn kill(&mut self, id: ProcId) -> Result<()>;
}

/// Waits on an exit watch for at most `d`.
pub(crate) async fn wait_exit(exit: &mut ExitWatch, d: Duration) -> Option<i32> {
    match tokio::time::timeout(d, exit.wait_for(Option::is_some)).await {
        Ok(Ok(code)) => *code,
        // The publisher went away without reporting: treat it as still running.
        Ok(Err(_)) | Err(_) => None,
    }
}
