mod error;
mod launcher;
mod process;
mod types;

pub use error::{Error, Result};
pub use launcher::{
    prepare_directories, startup_order, ForceStop, Launcher, LauncherEvent, Outcome, OutputStream,
    Report,
};
#[cfg(unix)]
pub use process::unix::UnixProcessManager;
pub use process::{BoxStream, CommandSpec, ExitWatch, ProcId, ProcessManager, Spawned};
pub use types::{ServiceState, Status};
