use std::{path::PathBuf, time::Duration};

use crate::process::ProcId;

pub type Result<R, E = Error> = std::result::Result<R, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("service `{0}` not found")]
    ServiceNotFound(String),

    #[error("circular dependency detected")]
    CircularDependencyDetected,

    #[error("services `{first}` and `{second}` both claim port {port}")]
    PortConflict {
        port: u16,
        first: String,
        second: String,
    },

    #[error("port {port} required by service `{service}` is unavailable: {source}")]
    PortUnavailable {
        service: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("directory {} is not usable: {source}", path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("empty cmd for service `{0}`")]
    EmptyCommand(String),

    #[error("cannot spawn service `{service}`: {source}")]
    Spawn {
        service: String,
        source: std::io::Error,
    },

    #[error("service `{service}` exited with code {code} before becoming ready")]
    ExitedBeforeReady { service: String, code: i32 },

    #[error("service `{service}` was not ready within {timeout:?}")]
    ReadinessTimeout { service: String, timeout: Duration },

    #[error("unknown process id {0:?}")]
    UnknownProcess(ProcId),
}
