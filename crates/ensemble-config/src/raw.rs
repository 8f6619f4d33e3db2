use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawProject {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub launcher: RawLauncher,
    pub services: BTreeMap<String, RawService>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawLauncher {
    pub grace_period_ms: Option<u64>,
    pub readiness_timeout_ms: Option<u64>,
    pub stable_after_ms: Option<u64>,
    pub directories: Option<Vec<String>>,
    pub log_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawService {
    pub cmd: Vec<String>,
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
    pub deps: Option<Vec<String>>,
    pub port: Option<u16>,
    pub restart: Option<RawRestart>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub essential: Option<bool>,
    pub grace_period_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum RawRestart {
    Never,
    OnFailure,
    Always,
}
