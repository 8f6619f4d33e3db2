use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    time::Duration,
};

use ensemble_types::{LauncherSettings, Project, Restart, RetryPolicy, Service};

use crate::{
    raw::{RawLauncher, RawProject, RawRestart, RawService},
    ConfigError,
};

impl TryFrom<RawProject> for Project {
    type Error = ConfigError;

    fn try_from(raw_project: RawProject) -> Result<Self, Self::Error> {
        let mut problems = Vec::new();

        let services: BTreeMap<String, Service> = raw_project
            .services
            .into_iter()
            .map(|(name, raw_service)| {
                let service = to_service(&name, raw_service, &mut problems);
                (name, service)
            })
            .collect();

        check_deps(&services, &mut problems);
        check_ports(&services, &mut problems);

        let launcher = to_launcher(raw_project.launcher);

        if !problems.is_empty() {
            return Err(ConfigError::Validation(problems.join("; ")));
        }

        Ok(Project {
            version: raw_project.version,
            launcher,
            services,
        })
    }
}

fn to_launcher(raw: RawLauncher) -> LauncherSettings {
    let defaults = LauncherSettings::default();

    LauncherSettings {
        grace_period: raw
            .grace_period_ms
            .map_or(defaults.grace_period, Duration::from_millis),
        readiness_timeout: raw
            .readiness_timeout_ms
            .map_or(defaults.readiness_timeout, Duration::from_millis),
        stable_after: raw
            .stable_after_ms
            .map_or(defaults.stable_after, Duration::from_millis),
        directories: raw
            .directories
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect(),
        log_dir: raw.log_dir.map(PathBuf::from),
    }
}

fn to_service(name: &str, raw: RawService, problems: &mut Vec<String>) -> Service {
    if raw.cmd.is_empty() {
        problems.push(format!("service `{name}`: cmd is empty"));
    }
    if raw.cmd.iter().any(|c| c.trim().is_empty()) {
        problems.push(format!("service `{name}`: cmd contains empty element"));
    }
    if raw.port == Some(0) {
        problems.push(format!("service `{name}`: port 0 is not a listening port"));
    }

    let defaults = RetryPolicy::default();
    let policy = RetryPolicy {
        max_retries: raw.max_retries.unwrap_or(defaults.max_retries),
        backoff: raw
            .backoff_ms
            .map_or(defaults.backoff, Duration::from_millis),
        max_backoff: raw
            .max_backoff_ms
            .map_or(defaults.max_backoff, Duration::from_millis),
    };
    if policy.max_backoff < policy.backoff {
        problems.push(format!(
            "service `{name}`: max_backoff_ms is smaller than backoff_ms"
        ));
    }

    let restart = match raw.restart.unwrap_or(RawRestart::Never) {
        RawRestart::Never => Restart::Never,
        RawRestart::OnFailure => Restart::OnFailure(policy),
        RawRestart::Always => Restart::Always(policy),
    };

    Service {
        cmd: raw.cmd,
        cwd: raw.cwd.map(PathBuf::from),
        env: raw.env,
        deps: raw.deps.unwrap_or_default(),
        port: raw.port,
        restart,
        essential: raw.essential.unwrap_or(true),
        grace_period: raw.grace_period_ms.map(Duration::from_millis),
    }
}

fn check_deps(services: &BTreeMap<String, Service>, problems: &mut Vec<String>) {
    for (name, service) in services {
        for dep in &service.deps {
            if dep == name {
                problems.push(format!("service `{name}`: depends on itself"));
            } else if !services.contains_key(dep) {
                problems.push(format!("service `{name}`: unknown dependency `{dep}`"));
            }
        }
    }
}

fn check_ports(services: &BTreeMap<String, Service>, problems: &mut Vec<String>) {
    let mut claimed: HashMap<u16, &str> = HashMap::new();
    for (name, service) in services {
        let Some(port) = service.port else {
            continue;
        };
        if let Some(owner) = claimed.insert(port, name) {
            problems.push(format!(
                "services `{owner}` and `{name}` both claim port {port}"
            ));
        }
    }
}
