//! Checks that run before any service is spawned.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    net::TcpListener,
    path::PathBuf,
};

use crate::error::{Error, Result};

const WRITE_PROBE: &str = ".ensemble-write-check";

/// Fails if two services declare the same listening port.
pub(crate) fn check_port_conflicts<'a>(
    services: impl IntoIterator<Item = (&'a str, Option<u16>)>,
) -> Result<()> {
    let mut claimed: HashMap<u16, &str> = HashMap::new();
    for (name, port) in services {
        let Some(port) = port else {
            continue;
        };
        if let Some(first) = claimed.insert(port, name) {
            return Err(Error::PortConflict {
                port,
                first: first.to_owned(),
                second: name.to_owned(),
            });
        }
    }
    Ok(())
}

/// Fails if `port` cannot be bound right now, e.g. because another process holds it.
pub(crate) fn check_port_available(service: &str, port: u16) -> Result<()> {
    TcpListener::bind(("0.0.0.0", port))
        .map(drop)
        .map_err(|source| Error::PortUnavailable {
            service: service.to_owned(),
            port,
            source,
        })
}

/// Creates every directory and verifies it accepts new files.
///
/// # Errors
///
/// Returns [`Error::Directory`] for the first directory that cannot be created or written.
pub fn prepare_directories(directories: &[PathBuf]) -> Result<()> {
    for dir in directories {
        let directory_error = |source| Error::Directory {
            path: dir.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(directory_error)?;

        let probe = dir.join(WRITE_PROBE);
        OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&probe)
            .map_err(directory_error)?;
        fs::remove_file(&probe).map_err(directory_error)?;

        tracing::debug!("Directory {} is ready", dir.display());
    }
    Ok(())
}
