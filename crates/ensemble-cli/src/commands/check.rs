use std::process::ExitCode;

use anyhow::{Context, Result};
use ensemble_config::load_from_path;
use ensemble_core::startup_order;

use super::resolve_file;
use crate::logger::Logger;

pub fn check(file: Option<String>) -> Result<ExitCode> {
    let path = resolve_file(file);
    let project =
        load_from_path(&path).with_context(|| format!("invalid config {}", path.display()))?;
    let order = startup_order(&project, &[])?;

    let mut logger = Logger::default();
    logger.system(&format!(
        "{} is valid: {} services, startup order {}",
        path.display(),
        order.len(),
        order.join(" -> ")
    ));

    Ok(ExitCode::SUCCESS)
}
