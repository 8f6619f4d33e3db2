use std::{
    collections::BTreeMap,
    future::Future,
    time::{Duration, SystemTime},
};

use ensemble_types::{LauncherSettings, Project, Service};
use futures::StreamExt;
use tokio::{
    sync::mpsc::{self, Receiver, Sender},
    time::Instant,
};

use crate::{
    error::{Error, Result},
    launcher::{
        commands::{ForceStop, LauncherCommand, LauncherEvent, OutputStream},
        order::{toposort, DependencyGraph},
        preflight,
        readiness::{wait_until_ready, Readiness},
        report::{Outcome, Report},
    },
    process::{BoxStream, CommandSpec, ExitWatch, ProcId, ProcessManager},
    types::{ServiceState, Status},
};

const CHANNEL_SIZE: usize = 100;
const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Record {
    service: Service,
    status: Status,
    proc_id: Option<ProcId>,
    pid: Option<u32>,
    exit: Option<ExitWatch>,
    /// Bumped on every spawn; notices about older processes are ignored.
    generation: u64,
    /// Consecutive restarts since the service last ran for `stable_after`.
    restarts: u32,
    restart_pending: bool,
    started_at: Option<SystemTime>,
    running_since: Option<Instant>,
    last_exit: Option<i32>,
    failure: Option<String>,
}

impl Record {
    fn new(service: Service) -> Self {
        Self {
            service,
            status: Status::NotStarted,
            proc_id: None,
            pid: None,
            exit: None,
            generation: 0,
            restarts: 0,
            restart_pending: false,
            started_at: None,
            running_since: None,
            last_exit: None,
            failure: None,
        }
    }

    fn is_settled(&self) -> bool {
        match self.status {
            Status::NotStarted | Status::Stopped => true,
            Status::Failed => !self.restart_pending,
            Status::Starting | Status::Running => false,
        }
    }
}

async fn follow_output(
    stream: OutputStream,
    mut output: BoxStream<Vec<u8>>,
    service: String,
    tx: Sender<LauncherEvent>,
) {
    // Keep draining after the receiver is gone so the child never blocks on a full pipe.
    while let Some(line) = output.next().await {
        if tx.is_closed() {
            continue;
        }
        let line = String::from_utf8_lossy(&line)
            .trim_end_matches('\r')
            .to_owned();
        let _ = tx
            .send(LauncherEvent::Log {
                service: service.clone(),
                stream,
                line,
            })
            .await;
    }
}

/// Starts, watches and stops the services of one project.
///
/// The launcher is the only owner of the service records; helper tasks talk
/// back to it through a command channel that [`Launcher::monitor`] drains.
#[derive(Debug)]
pub struct Launcher<P: ProcessManager> {
    pm: P,
    settings: LauncherSettings,
    services: BTreeMap<String, Record>,
    selected: Vec<String>,
    /// Services in the order they were first started.
    started: Vec<String>,
    shutting_down: bool,
    /// Set once a forced stop was requested; remaining services skip their grace period.
    forced: bool,

    commands_tx: Sender<LauncherCommand>,
    commands_rx: Receiver<LauncherCommand>,

    events_tx: Sender<LauncherEvent>,

    force_tx: Sender<()>,
    force_rx: Receiver<()>,
}

impl<P: ProcessManager> Launcher<P> {
    pub fn new(project: Project, pm: P) -> (Self, Receiver<LauncherEvent>) {
        let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_SIZE);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_SIZE);
        let (force_tx, force_rx) = mpsc::channel(1);

        let services = project
            .services
            .into_iter()
            .map(|(name, service)| (name, Record::new(service)))
            .collect();

        (
            Self {
                pm,
                settings: project.launcher,
                services,
                selected: Vec::new(),
                started: Vec::new(),
                shutting_down: false,
                forced: false,
                commands_tx,
                commands_rx,
                events_tx,
                force_tx,
                force_rx,
            },
            events_rx,
        )
    }

    /// Restricts the launcher to `services` and their dependencies. An empty
    /// list keeps every service.
    pub fn select(&mut self, services: Vec<String>) {
        self.selected = services;
    }

    #[must_use]
    pub fn status(&self, service: &str) -> Option<Status> {
        self.services.get(service).map(|record| record.status)
    }

    #[must_use]
    pub fn states(&self) -> Vec<ServiceState> {
        self.services
            .iter()
            .map(|(name, record)| ServiceState {
                name: name.clone(),
                pid: record.pid,
                status: record.status,
                started_at: record.started_at,
                restarts: record.restarts,
                last_exit: record.last_exit,
                failure: record.failure.clone(),
            })
            .collect()
    }

    /// Handle that makes a running [`Launcher::shutdown`] kill the remaining
    /// services right away instead of waiting out their grace periods.
    #[must_use]
    pub fn force_stop(&self) -> ForceStop {
        ForceStop::new(self.force_tx.clone())
    }

    /// Services in the order they were started.
    #[must_use]
    pub fn started(&self) -> &[String] {
        &self.started
    }

    /// Starts every selected service in dependency order, each one only
    /// after the services it depends on are running.
    ///
    /// # Errors
    ///
    /// Returns an error, without starting the remaining services, if the
    /// dependency graph is invalid, two services claim the same port, a
    /// directory or port is unusable, or a service fails to spawn or become
    /// ready. Services that were already started keep running until
    /// [`Launcher::shutdown`].
    pub async fn start_all(&mut self) -> Result<()> {
        let order = {
            let graph: DependencyGraph<'_> = self
                .services
                .iter()
                .map(|(name, record)| (name.as_str(), record.service.deps.as_slice()))
                .collect();
            toposort(&graph, &self.selected)?
        };
        self.services.retain(|name, _| order.contains(name));
        tracing::info!("Starting services in order {order:?}");

        preflight::check_port_conflicts(
            self.services
                .iter()
                .map(|(name, record)| (name.as_str(), record.service.port)),
        )?;
        preflight::prepare_directories(&self.settings.directories)?;
        for (name, record) in &self.services {
            if let Some(port) = record.service.port {
                preflight::check_port_available(name, port)?;
            }
        }

        for name in order {
            self.start_service(&name).await?;

            let (port, exit) = {
                let record = self.record(&name)?;
                (record.service.port, record.exit.clone())
            };
            let Some(exit) = exit else {
                return Err(Error::ServiceNotFound(name));
            };

            match wait_until_ready(port, self.settings.readiness_timeout, exit).await {
                Readiness::Ready => self.mark_running(&name).await,
                Readiness::Exited(code) => {
                    let proc_id = self.services.get_mut(&name).and_then(|record| {
                        record.exit = None;
                        record.last_exit = Some(code);
                        record.failure = Some(format!("exited with code {code} during startup"));
                        record.proc_id.take()
                    });
                    if let Some(proc_id) = proc_id {
                        self.reap(&name, proc_id).await;
                    }
                    self.set_status(&name, Status::Failed).await;
                    return Err(Error::ExitedBeforeReady {
                        service: name,
                        code,
                    });
                }
                Readiness::TimedOut => {
                    let timeout = self.settings.readiness_timeout;
                    if let Some(record) = self.services.get_mut(&name) {
                        record.failure = Some(format!("not ready within {timeout:?}"));
                    }
                    return Err(Error::ReadinessTimeout {
                        service: name,
                        timeout,
                    });
                }
            }
        }

        Ok(())
    }

    /// Supervises the running services until `shutdown` resolves, an
    /// essential service is lost, or every service has settled.
    ///
    /// `shutdown` yields the name of the signal that requested the stop.
    pub async fn monitor<F>(&mut self, shutdown: F) -> Outcome
    where
        F: Future<Output = String>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        tracing::info!("Monitoring {} services", self.services.len());

        loop {
            if self.services.values().all(Record::is_settled) {
                tracing::info!("All services have exited");
                return Outcome::AllExited;
            }

            let command = tokio::select! {
                signal = &mut shutdown => {
                    tracing::info!("Received {signal}, shutting down");
                    return Outcome::Signal(signal);
                }
                command = self.commands_rx.recv() => command,
            };
            let Some(command) = command else {
                return Outcome::AllExited;
            };

            if let Some(outcome) = self.handle_command(command).await {
                return outcome;
            }
        }
    }

    /// Stops every started service in reverse startup order.
    ///
    /// Each service gets its grace period to exit after a graceful stop
    /// request and is killed afterwards, together with anything left in its
    /// process group. Pending restarts are cancelled. After a
    /// [`ForceStop::force`] the remaining services are killed without waiting.
    pub async fn shutdown(&mut self) {
        self.shutting_down = true;
        tracing::info!("Stopping services");

        let order: Vec<String> = self.started.iter().rev().cloned().collect();
        for name in order {
            self.stop_service(&name).await;
        }

        tracing::info!("All services stopped");
    }

    /// Starts everything, supervises until `shutdown` resolves or the unit
    /// can no longer run, then stops everything.
    ///
    /// # Errors
    ///
    /// Returns the startup error if [`Launcher::start_all`] fails; services
    /// started before the failure are stopped first.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<Report>
    where
        F: Future<Output = String>,
    {
        let mut shutdown = std::pin::pin!(shutdown);

        let started = tokio::select! {
            result = self.start_all() => Ok(result),
            signal = &mut shutdown => Err(signal),
        };

        let outcome = match started {
            Ok(Ok(())) => self.monitor(&mut shutdown).await,
            Ok(Err(err)) => {
                tracing::error!("Startup failed: {err}");
                self.shutdown().await;
                return Err(err);
            }
            Err(signal) => {
                tracing::info!("Received {signal} during startup");
                Outcome::Signal(signal)
            }
        };

        self.shutdown().await;
        Ok(self.report(outcome))
    }

    #[must_use]
    pub fn report(&self, outcome: Outcome) -> Report {
        let failed = self
            .services
            .iter()
            .filter(|(_, record)| record.status == Status::Failed)
            .map(|(name, _)| name.clone())
            .collect();

        Report { outcome, failed }
    }

    fn record(&self, name: &str) -> Result<&Record> {
        self.services
            .get(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_owned()))
    }

    fn is_current(&self, name: &str, generation: u64) -> bool {
        !self.shutting_down
            && self
                .services
                .get(name)
                .is_some_and(|record| record.generation == generation)
    }

    async fn emit(&self, event: LauncherEvent) {
        if self.events_tx.send(event).await.is_err() {
            tracing::trace!("No event subscribers left");
        }
    }

    async fn set_status(&mut self, name: &str, status: Status) {
        if let Some(record) = self.services.get_mut(name) {
            record.status = status;
        }
        tracing::debug!("Service {name:?} is {status}");

        self.emit(LauncherEvent::StatusChanged {
            service: name.to_owned(),
            status,
        })
        .await;
    }

    async fn mark_running(&mut self, name: &str) {
        if let Some(record) = self.services.get_mut(name) {
            record.running_since = Some(Instant::now());
        }
        tracing::info!("Service {name:?} is running");
        self.set_status(name, Status::Running).await;
    }

    async fn start_service(&mut self, name: &str) -> Result<()> {
        let (generation, spec) = {
            let record = self
                .services
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_owned()))?;
            record.generation += 1;
            record.running_since = None;

            let spec = CommandSpec {
                name: name.to_owned(),
                cmd: record.service.cmd.clone(),
                cwd: record.service.cwd.clone(),
                env: record
                    .service
                    .env
                    .clone()
                    .map(|h| h.into_iter().collect())
                    .unwrap_or_default(),
            };
            (record.generation, spec)
        };

        if !self.started.iter().any(|started| started == name) {
            self.started.push(name.to_owned());
        }
        self.set_status(name, Status::Starting).await;

        let spawned = match self.pm.spawn(spec).await {
            Ok(spawned) => spawned,
            Err(err) => {
                tracing::error!("Failed to spawn service {name:?}: {err}");
                if let Some(record) = self.services.get_mut(name) {
                    record.failure = Some(err.to_string());
                }
                self.set_status(name, Status::Failed).await;
                return Err(err);
            }
        };

        if let Some(record) = self.services.get_mut(name) {
            record.proc_id = Some(spawned.id);
            record.pid = spawned.pid;
            record.exit = Some(spawned.exit.clone());
            record.started_at = Some(SystemTime::now());
        }
        tracing::info!("Spawned service {name:?} with pid {:?}", spawned.pid);

        tokio::spawn(follow_output(
            OutputStream::Stdout,
            spawned.stdout,
            name.to_owned(),
            self.events_tx.clone(),
        ));
        tokio::spawn(follow_output(
            OutputStream::Stderr,
            spawned.stderr,
            name.to_owned(),
            self.events_tx.clone(),
        ));
        self.watch_exit(name.to_owned(), generation, spawned.exit);

        Ok(())
    }

    fn watch_exit(&self, service: String, generation: u64, mut exit: ExitWatch) {
        let commands_tx = self.commands_tx.clone();
        tokio::spawn(async move {
            let code = match exit.wait_for(Option::is_some).await {
                Ok(code) => code.unwrap_or(-1),
                Err(_) => -1,
            };
            if let Err(err) = commands_tx
                .send(LauncherCommand::Exited {
                    service,
                    generation,
                    code,
                })
                .await
            {
                tracing::debug!("Launcher is gone, dropping exit notice: {err}");
            }
        });
    }

    fn watch_readiness(&self, service: String, generation: u64, port: Option<u16>, exit: ExitWatch) {
        let commands_tx = self.commands_tx.clone();
        let timeout = self.settings.readiness_timeout;
        tokio::spawn(async move {
            let command = match wait_until_ready(port, timeout, exit).await {
                Readiness::Ready => LauncherCommand::Ready {
                    service,
                    generation,
                },
                Readiness::TimedOut => LauncherCommand::NotReady {
                    service,
                    generation,
                },
                // The exit watcher reports this one.
                Readiness::Exited(_) => return,
            };
            let _ = commands_tx.send(command).await;
        });
    }

    fn schedule_restart(&self, service: String, generation: u64, delay: Duration) {
        let commands_tx = self.commands_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands_tx
                .send(LauncherCommand::RestartDue {
                    service,
                    generation,
                })
                .await;
        });
    }

    async fn handle_command(&mut self, command: LauncherCommand) -> Option<Outcome> {
        tracing::debug!("Handling command: {command:?}");

        match command {
            LauncherCommand::Exited {
                service,
                generation,
                code,
            } => self.on_exit(&service, generation, code).await,
            LauncherCommand::RestartDue {
                service,
                generation,
            } => self.restart(&service, generation).await,
            LauncherCommand::Ready {
                service,
                generation,
            } => {
                if self.is_current(&service, generation)
                    && self.status(&service) == Some(Status::Starting)
                {
                    self.mark_running(&service).await;
                }
                None
            }
            LauncherCommand::NotReady {
                service,
                generation,
            } => {
                self.on_not_ready(&service, generation).await;
                None
            }
        }
    }

    async fn on_exit(&mut self, name: &str, generation: u64, code: i32) -> Option<Outcome> {
        if !self.is_current(name, generation) {
            tracing::debug!("Ignoring stale exit of service {name:?}");
            return None;
        }

        let stable_after = self.settings.stable_after;
        let (policy, restarts, essential, proc_id) = {
            let record = self.services.get_mut(name)?;
            if record.status == Status::Stopped {
                return None;
            }
            let proc_id = record.proc_id.take();
            record.pid = None;
            record.exit = None;
            record.last_exit = Some(code);
            if record
                .running_since
                .take()
                .is_some_and(|since| since.elapsed() >= stable_after)
            {
                record.restarts = 0;
            }
            (
                record.service.restart.policy_for(code).copied(),
                record.restarts,
                record.service.essential,
                proc_id,
            )
        };

        // Children of the exited process would keep its ports and fool the
        // readiness check of the next attempt.
        if let Some(proc_id) = proc_id {
            self.reap(name, proc_id).await;
        }

        self.emit(LauncherEvent::Exited {
            service: name.to_owned(),
            code,
        })
        .await;

        match policy {
            Some(policy) if restarts < policy.max_retries => {
                let attempt = restarts + 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    "Service {name:?} exited with code {code}, restart {attempt}/{} in {delay:?}",
                    policy.max_retries
                );
                if let Some(record) = self.services.get_mut(name) {
                    record.restarts = attempt;
                    record.restart_pending = true;
                    record.failure = Some(format!("exited with code {code}"));
                }
                self.set_status(name, Status::Failed).await;
                self.emit(LauncherEvent::Restarting {
                    service: name.to_owned(),
                    attempt,
                    delay,
                })
                .await;
                self.schedule_restart(name.to_owned(), generation, delay);
                None
            }
            Some(policy) => {
                tracing::error!(
                    "Service {name:?} exited with code {code}, retry budget of {} exhausted",
                    policy.max_retries
                );
                if let Some(record) = self.services.get_mut(name) {
                    record.restart_pending = false;
                    record.failure = Some(format!(
                        "exited with code {code} after {} restarts",
                        policy.max_retries
                    ));
                }
                self.set_status(name, Status::Failed).await;
                essential.then(|| Outcome::ServiceFailed(name.to_owned()))
            }
            None if code == 0 => {
                tracing::info!("Service {name:?} exited");
                self.set_status(name, Status::Stopped).await;
                essential.then(|| Outcome::ServiceStopped(name.to_owned()))
            }
            None => {
                tracing::error!("Service {name:?} exited with code {code}");
                if let Some(record) = self.services.get_mut(name) {
                    record.failure = Some(format!("exited with code {code}"));
                }
                self.set_status(name, Status::Failed).await;
                essential.then(|| Outcome::ServiceFailed(name.to_owned()))
            }
        }
    }

    async fn restart(&mut self, name: &str, generation: u64) -> Option<Outcome> {
        if !self.is_current(name, generation) {
            return None;
        }
        {
            let record = self.services.get_mut(name)?;
            if !record.restart_pending {
                return None;
            }
            record.restart_pending = false;
        }

        tracing::info!("Restarting service {name:?}");
        if let Err(err) = self.start_service(name).await {
            // A failed spawn uses up a restart attempt like any other crash.
            let generation = self.services.get(name)?.generation;
            tracing::warn!("Restart of service {name:?} failed: {err}");
            return self.on_exit(name, generation, -1).await;
        }

        let record = self.services.get(name)?;
        if let Some(exit) = record.exit.clone() {
            self.watch_readiness(
                name.to_owned(),
                record.generation,
                record.service.port,
                exit,
            );
        }
        None
    }

    async fn on_not_ready(&mut self, name: &str, generation: u64) {
        if !self.is_current(name, generation) || self.status(name) != Some(Status::Starting) {
            return;
        }
        let timeout = self.settings.readiness_timeout;
        let Some(proc_id) = self.services.get_mut(name).and_then(|record| {
            record.failure = Some(format!("not ready within {timeout:?}"));
            record.proc_id
        }) else {
            return;
        };

        // Killing it turns this into an ordinary exit handled by the restart policy.
        tracing::warn!("Service {name:?} not ready within {timeout:?}, killing it");
        if let Err(err) = self.pm.kill(proc_id).await {
            tracing::error!("Failed to kill service {name:?}: {err}");
        }
    }

    /// Kills whatever an exited process left behind in its group.
    async fn reap(&mut self, name: &str, proc_id: ProcId) {
        if let Err(err) = self.pm.kill(proc_id).await {
            tracing::warn!("Failed to clean up after service {name:?}: {err}");
        }
    }

    async fn stop_service(&mut self, name: &str) {
        let default_grace = self.settings.grace_period;
        let Some(record) = self.services.get_mut(name) else {
            return;
        };
        let pending = std::mem::take(&mut record.restart_pending);
        let status = record.status;
        let grace = record.service.grace_period.unwrap_or(default_grace);
        let proc_id = record.proc_id.take();
        record.running_since = None;

        let Some(proc_id) = proc_id else {
            // A failure only waiting for its restart was transient.
            if status != Status::Stopped && (status != Status::Failed || pending) {
                self.set_status(name, Status::Stopped).await;
            }
            return;
        };

        let graceful = if self.forced {
            None
        } else {
            tracing::info!("Stopping service {name:?}");
            if let Err(err) = self.pm.shutdown(proc_id).await {
                tracing::warn!("Failed to request stop of service {name:?}: {err}");
            }

            tokio::select! {
                waited = self.pm.wait(proc_id, grace) => match waited {
                    Ok(code) => code,
                    Err(err) => {
                        tracing::warn!("Failed to wait for service {name:?}: {err}");
                        None
                    }
                },
                _ = self.force_rx.recv() => {
                    self.forced = true;
                    None
                }
            }
        };

        let code = if let Some(code) = graceful {
            self.reap(name, proc_id).await;
            Some(code)
        } else {
            if self.forced {
                tracing::warn!("Forced stop, killing service {name:?}");
            } else {
                tracing::warn!("Service {name:?} did not stop within {grace:?}, killing it");
            }
            if let Err(err) = self.pm.kill(proc_id).await {
                tracing::error!("Failed to kill service {name:?}: {err}");
            }
            self.emit(LauncherEvent::ForceKilled {
                service: name.to_owned(),
            })
            .await;
            self.pm.wait(proc_id, KILL_WAIT).await.ok().flatten()
        };

        if let Some(record) = self.services.get_mut(name) {
            record.pid = None;
            record.exit = None;
            if code.is_some() {
                record.last_exit = code;
            }
        }
        self.set_status(name, Status::Stopped).await;
    }
}
