mod commands;
mod order;
mod preflight;
mod readiness;
mod report;
mod supervisor;


pub use commands::{ForceStop, LauncherEvent, OutputStream};
pub use order::startup_order;
pub use preflight::prepare_directories;
pub use report::{Outcome, Report};
pub use supervisor::Launcher;
