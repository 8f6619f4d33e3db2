use std::path::{Path, PathBuf};

mod check;
mod run;

pub use check::check;
pub use run::run;

use crate::DEFAULT_FILENAMES;

/// The file given on the command line, or the first default file that exists.
fn resolve_file(file: Option<String>) -> PathBuf {
    file.map_or_else(
        || {
            DEFAULT_FILENAMES
                .iter()
                .map(Path::new)
                .find(|path| path.exists())
                .unwrap_or_else(|| Path::new(DEFAULT_FILENAMES[0]))
                .to_path_buf()
        },
        PathBuf::from,
    )
}
