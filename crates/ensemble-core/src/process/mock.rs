use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::{Error, Result},
    process::{wait_exit, CommandSpec, ProcId, ProcessManager, Spawned},
};

/// How the next process spawned for a service behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// Runs until asked to stop, then exits with 0.
    RunUntilStopped,
    /// Exits on its own with the given code.
    ExitAfter(Duration, i32),
    /// Starts accepting connections on `port` after a while and runs until stopped.
    Listen { port: u16, after: Duration },
    /// Accepts connections on `port` right away, then exits on its own.
    ListenThenExit {
        port: u16,
        exit_after: Duration,
        code: i32,
    },
    /// Ignores graceful stop requests and only dies when killed.
    IgnoreStop,
    /// Fails to spawn at all.
    FailSpawn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Spawn(String),
    Shutdown(String),
    Kill(String),
}

#[derive(Debug)]
struct MockProc {
    name: String,
    behavior: Behavior,
    exit: Arc<watch::Sender<Option<i32>>>,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<Behavior>>,
    calls: Vec<Call>,
    processes: Vec<MockProc>,
}

/// Scripted process manager; clones share state so tests can inspect calls
/// after handing one to a launcher.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockProcessManager {
    state: Arc<Mutex<MockState>>,
}

impl MockProcessManager {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queues behaviors for successive spawns of `name`; once the queue is
    /// empty processes run until stopped.
    pub(crate) fn script(&self, name: &str, behaviors: impl IntoIterator<Item = Behavior>) {
        self.lock()
            .scripts
            .entry(name.to_owned())
            .or_default()
            .extend(behaviors);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn spawn_count(&self, name: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Spawn(n) if n == name))
            .count()
    }
}

#[async_trait]
impl ProcessManager for MockProcessManager {
    async fn spawn(&mut self, spec: CommandSpec) -> Result<Spawned> {
        let mut state = self.lock();
        state.calls.push(Call::Spawn(spec.name.clone()));

        let behavior = state
            .scripts
            .get_mut(&spec.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Behavior::RunUntilStopped);

        if behavior == Behavior::FailSpawn {
            return Err(Error::Spawn {
                service: spec.name,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let (listen, exit_after) = match behavior {
            Behavior::ExitAfter(after, code) => (None, Some((after, code))),
            Behavior::Listen { port, after } => (Some((port, after)), None),
            Behavior::ListenThenExit {
                port,
                exit_after,
                code,
            } => (Some((port, Duration::ZERO)), Some((exit_after, code))),
            Behavior::RunUntilStopped | Behavior::IgnoreStop | Behavior::FailSpawn => (None, None),
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let exit_tx = Arc::new(exit_tx);
        if let Some((port, after)) = listen {
            let mut exit = exit_rx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(after) => {}
                    _ = exit.wait_for(Option::is_some) => return,
                }
                let listener = match TcpListener::bind(("127.0.0.1", port)).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        tracing::warn!("Mock cannot listen on {port}: {err}");
                        return;
                    }
                };
                // The port is released together with the process.
                let _ = exit.wait_for(Option::is_some).await;
                drop(listener);
            });
        }
        if let Some((after, code)) = exit_after {
            let mut exit = exit_rx.clone();
            let exit_tx = Arc::clone(&exit_tx);
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(after) => {
                        exit_tx.send_if_modified(|current| {
                            if current.is_none() {
                                *current = Some(code);
                                true
                            } else {
                                false
                            }
                        });
                    }
                    _ = exit.wait_for(Option::is_some) => {}
                }
            });
        }

        let id = ProcId(state.processes.len() as u64);
        state.processes.push(MockProc {
            name: spec.name,
            behavior,
            exit: exit_tx,
        });

        // The senders are dropped right away so the output streams end immediately.
        let (_, stdout) = mpsc::channel(1);
        let (_, stderr) = mpsc::channel(1);
        Ok(Spawned {
            id,
            pid: None,
            stdout: Box::pin(ReceiverStream::new(stdout)),
            stderr: Box::pin(ReceiverStream::new(stderr)),
            exit: exit_rx,
        })
    }

    async fn shutdown(&mut self, id: ProcId) -> Result<()> {
        let mut state = self.lock();
        let index = usize::try_from(id.0).map_err(|_| Error::UnknownProcess(id))?;
        let proc = state
            .processes
            .get(index)
            .ok_or(Error::UnknownProcess(id))?;
        let name = proc.name.clone();
        if proc.behavior != Behavior::IgnoreStop && proc.exit.borrow().is_none() {
            proc.exit.send_replace(Some(0));
        }
        state.calls.push(Call::Shutdown(name));
        Ok(())
    }

    async fn wait(&mut self, id: ProcId, d: Duration) -> Result<Option<i32>> {
        let mut exit = {
            let state = self.lock();
            let index = usize::try_from(id.0).map_err(|_| Error::UnknownProcess(id))?;
            state
                .processes
                .get(index)
                .ok_or(Error::UnknownProcess(id))?
                .exit
                .subscribe()
        };
        Ok(wait_exit(&mut exit, d).await)
    }

    async fn kill(&mut self, id: ProcId) -> Result<()> {
        let mut state = self.lock();
        let index = usize::try_from(id.0).map_err(|_| Error::UnknownProcess(id))?;
        let proc = state
            .processes
            .get(index)
            .ok_or(Error::UnknownProcess(id))?;
        let name = proc.name.clone();
        if proc.exit.borrow().is_none() {
            proc.exit.send_replace(Some(128 + 9));
        }
        state.calls.push(Call::Kill(name));
        Ok(())
    }
}
