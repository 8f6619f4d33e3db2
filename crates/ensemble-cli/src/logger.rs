use colored::{Color, Colorize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{self, Stdout, Write};
use std::path::PathBuf;

/// Prints service output and launcher notices with colored prefixes.
pub struct Logger<W: Write = Stdout> {
    output: W,
    /// When set, service lines are also appended to `<dir>/<service>.log`.
    log_dir: Option<PathBuf>,
    files: HashMap<String, File>,
}

impl<W: Write> Logger<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            log_dir: None,
            files: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    fn string_to_color(s: &str) -> Color {
        let colors = [
            Color::Green,
            Color::Blue,
            Color::Magenta,
            Color::Cyan,
            Color::BrightGreen,
            Color::BrightBlue,
            Color::BrightMagenta,
            Color::BrightCyan,
        ];

        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        let hash = hasher.finish();

        let idx = usize::try_from(hash).unwrap_or_default() % colors.len();
        colors[idx]
    }

    pub fn log(&mut self, service_name: &str, message: &str) {
        let prefix = format!("[{service_name}]").color(Self::string_to_color(service_name));
        for line in message.lines() {
            let _ = writeln!(self.output, "{prefix} {line}");
        }
        self.mirror(service_name, message);
    }

    pub fn system(&mut self, message: &str) {
        self.prefixed("[system]".color(Color::Red), message);
    }

    pub fn warn(&mut self, message: &str) {
        self.prefixed("[system]".color(Color::Yellow).bold(), message);
    }

    pub fn error(&mut self, message: &str) {
        self.prefixed("[system]".color(Color::Red).bold(), message);
    }

    fn prefixed(&mut self, prefix: colored::ColoredString, message: &str) {
        for line in message.lines() {
            let _ = writeln!(self.output, "{prefix} {line}");
        }
    }

    fn mirror(&mut self, service_name: &str, message: &str) {
        let Some(dir) = &self.log_dir else {
            return;
        };

        if !self.files.contains_key(service_name) {
            let path = dir.join(format!("{service_name}.log"));
            let opened = fs::create_dir_all(dir).and_then(|()| {
                OpenOptions::new().create(true).append(true).open(&path)
            });
            match opened {
                Ok(file) => {
                    self.files.insert(service_name.to_owned(), file);
                }
                Err(err) => {
                    tracing::warn!(
                        "Cannot open {}: {err}, no longer mirroring logs",
                        path.display()
                    );
                    self.log_dir = None;
                    return;
                }
            }
        }

        let Some(file) = self.files.get_mut(service_name) else {
            return;
        };
        let written = message.lines().try_for_each(|line| writeln!(file, "{line}"));
        if let Err(err) = written {
            tracing::warn!(
                "Cannot write the log of {service_name}: {err}, no longer mirroring logs"
            );
            self.log_dir = None;
            self.files.clear();
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(io::stdout())
    }
}
