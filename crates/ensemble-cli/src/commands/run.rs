use std::{process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use ensemble_config::load_from_path;
use ensemble_core::{ForceStop, Launcher, LauncherEvent, Status, UnixProcessManager};
use tokio::signal::{
    self,
    unix::{signal as unix_signal, SignalKind},
};

use super::resolve_file;
use crate::logger::Logger;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn run(
    file: Option<String>,
    services: Vec<String>,
    kill_timeout: Option<u64>,
) -> Result<ExitCode> {
    let path = resolve_file(file);
    let mut project =
        load_from_path(&path).with_context(|| format!("invalid config {}", path.display()))?;
    if let Some(seconds) = kill_timeout {
        project.launcher.grace_period = Duration::from_secs(seconds);
    }

    let mut logger = Logger::default().with_log_dir(project.launcher.log_dir.clone());
    let (mut launcher, mut events) = Launcher::new(project, UnixProcessManager::new());
    launcher.select(services);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&mut logger, event);
        }
    });

    let force = launcher.force_stop();
    let result = launcher.run(shutdown_signal(force)).await;

    // Output tasks hold the other senders and finish once the pipes close.
    drop(launcher);
    if tokio::time::timeout(DRAIN_TIMEOUT, printer).await.is_err() {
        tracing::debug!("Gave up draining service output");
    }

    let report = result?;
    let mut logger = Logger::default();
    if report.is_success() {
        logger.system(&format!("Stopped: {}", report.outcome));
    } else {
        logger.error(&format!(
            "Stopped: {}, failed services: {}",
            report.outcome,
            report.failed.join(", ")
        ));
    }

    Ok(ExitCode::from(report.exit_code()))
}

fn print_event(logger: &mut Logger, event: LauncherEvent) {
    match event {
        LauncherEvent::Log { service, line, .. } => logger.log(&service, &line),
        LauncherEvent::StatusChanged { service, status } => match status {
            Status::Failed => logger.error(&format!("Service {service} failed")),
            Status::NotStarted => {}
            _ => logger.system(&format!("Service {service} is {status}")),
        },
        LauncherEvent::Exited { service, code } => {
            logger.system(&format!("Service {service} exited with code {code}"));
        }
        LauncherEvent::Restarting {
            service,
            attempt,
            delay,
        } => logger.warn(&format!(
            "Restarting service {service} in {delay:?} (attempt {attempt})"
        )),
        LauncherEvent::ForceKilled { service } => {
            logger.warn(&format!("Service {service} was killed"));
        }
    }
}

/// Resolves with the name of the first SIGINT or SIGTERM.
///
/// A second signal while services are being stopped kills them right away.
async fn shutdown_signal(force: ForceStop) -> String {
    let mut sigterm = match unix_signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::warn!("Cannot listen for SIGTERM: {err}");
            let _ = signal::ctrl_c().await;
            return "SIGINT".to_owned();
        }
    };

    let name = tokio::select! {
        _ = signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };

    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::warn!("Second signal: killing the remaining services");
        force.force();
    });

    name.to_owned()
}
