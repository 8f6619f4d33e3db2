use std::{os::unix::process::ExitStatusExt, process::ExitStatus, time::Duration};

use futures::StreamExt;
use libc::{killpg, setsid, SIGKILL, SIGTERM};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::watch,
};
use tokio_stream::wrappers::SplitStream;

use crate::{
    error::{Error, Result},
    process::{wait_exit, CommandSpec, ExitWatch, ProcId, ProcessManager, Spawned},
};

#[derive(Debug)]
struct ChildRec {
    pgid: libc::pid_t,
    exit: ExitWatch,
}

/// Unix-specific process manager.
///
/// Every child becomes the leader of its own session, so signals reach the
/// whole process tree a service starts.
#[derive(Debug, Default)]
pub struct UnixProcessManager {
    processes: Vec<ChildRec>,
}

impl UnixProcessManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
        }
    }

    fn get(&self, id: ProcId) -> Result<&ChildRec> {
        usize::try_from(id.0)
            .ok()
            .and_then(|index| self.processes.get(index))
            .ok_or(Error::UnknownProcess(id))
    }

    /// Signals the whole process group, including members that outlived the leader.
    fn signal(&self, id: ProcId, signal: libc::c_int) -> Result<()> {
        let proc = self.get(id)?;

        #[allow(unsafe_code)]
        let rc = unsafe { killpg(proc.pgid, signal) };
        if rc == -1 {
            let err = std::io::Error::last_os_error();
            // ESRCH: the group is gone. EPERM after the leader exited: only zombies are left.
            let gone = match err.raw_os_error() {
                Some(libc::ESRCH) => true,
                Some(libc::EPERM) => proc.exit.borrow().is_some(),
                _ => false,
            };
            if !gone {
                return Err(Error::Io(err));
            }
        }

        Ok(())
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[async_trait::async_trait]
impl ProcessManager for UnixProcessManager {
    async fn spawn(&mut self, spec: CommandSpec) -> Result<Spawned> {
        let Some((program, args)) = spec.cmd.split_first() else {
            return Err(Error::EmptyCommand(spec.name));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        #[allow(unsafe_code)]
        unsafe {
            cmd.pre_exec(|| {
                if setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            service: spec.name.clone(),
            source,
        })?;

        let pid = child.id();
        let pgid = pid
            .and_then(|pid| libc::pid_t::try_from(pid).ok())
            .ok_or_else(|| Error::Io(std::io::Error::other("pid not available")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("stderr not piped")))?;

        let out_stream = SplitStream::new(BufReader::new(stdout).split(b'\n'))
            .filter_map(|res| async move { res.ok() });
        let err_stream = SplitStream::new(BufReader::new(stderr).split(b'\n'))
            .filter_map(|res| async move { res.ok() });

        let (exit_tx, exit_rx) = watch::channel(None);
        let name = spec.name;
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(err) => {
                    tracing::error!("Failed to wait for {name:?}: {err}");
                    -1
                }
            };
            exit_tx.send_replace(Some(code));
        });

        let id = ProcId(self.processes.len() as u64);
        self.processes.push(ChildRec {
            pgid,
            exit: exit_rx.clone(),
        });

        Ok(Spawned {
            id,
            pid,
            stdout: Box::pin(out_stream),
            stderr: Box::pin(err_stream),
            exit: exit_rx,
        })
    }

    async fn shutdown(&mut self, id: ProcId) -> Result<()> {
        self.signal(id, SIGTERM)
    }

    async fn wait(&mut self, id: ProcId, d: Duration) -> Result<Option<i32>> {
        let mut exit = self.get(id)?.exit.clone();
        Ok(wait_exit(&mut exit, d).await)
    }

    async fn kill(&mut self, id: ProcId) -> Result<()> {
        self.signal(id, SIGKILL)
    }
}
