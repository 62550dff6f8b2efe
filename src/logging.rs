//! Process-wide logging setup and the per-host job log.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use env_logger::{Env, Target};
use log::{Level, LevelFilter};

/// File the process-wide log goes to when a log directory is given.
pub const PROCESS_LOG: &str = "confcollect.log";

/// Sets up `env_logger`. `RUST_LOG` still wins over `level`. Output goes to
/// stderr, or is appended to [`PROCESS_LOG`] inside `log_dir`.
pub fn init_logging(level: LevelFilter, log_dir: Option<&Path>) -> io::Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level.as_str()));
    builder.format_timestamp_millis();
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(PROCESS_LOG))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.try_init().map_err(io::Error::other)
}

/// Log handle scoped to one job.
///
/// Records are appended to `<log_dir>/collect<adapter>.<host>.log` as
/// tab-separated `timestamp, adapter, LEVEL, message` lines and always
/// mirrored to the `log` facade.
pub struct HostLog {
    adapter: &'static str,
    host: String,
    level: LevelFilter,
    file: Option<Mutex<File>>,
}

impl HostLog {
    pub fn file_name(adapter: &str, host: &str) -> String {
        format!("collect{adapter}.{host}.log")
    }

    /// Opens the per-host file. A file that cannot be opened only costs the
    /// per-host copy; records still reach the process log.
    pub fn open(log_dir: Option<&Path>, adapter: &'static str, host: &str, level: LevelFilter) -> Self {
        let file = log_dir.and_then(|dir| {
            let path: PathBuf = dir.join(Self::file_name(adapter, host));
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(Mutex::new(file)),
                Err(err) => {
                    log::warn!("cannot open {}: {err}", path.display());
                    None
                }
            }
        });
        Self {
            adapter,
            host: host.to_string(),
            level,
            file,
        }
    }

    /// A handle that only mirrors to the `log` facade.
    pub fn detached(adapter: &'static str, host: &str) -> Self {
        Self::open(None, adapter, host, LevelFilter::Off)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn log(&self, level: Level, message: impl Display) {
        log::log!(target: "confcollect::host", level, "{} {}: {message}", self.adapter, self.host);
        if level > self.level {
            return;
        }
        if let Some(file) = &self.file
            && let Ok(mut file) = file.lock()
        {
            let line = format!(
                "{}\t{}\t{}\t{message}\n",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                self.adapter,
                level
            );
            let _ = file.write_all(line.as_bytes());
        }
    }

    pub fn debug(&self, message: impl Display) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.log(Level::Error, message);
    }

    pub fn begin(&self) {
        self.info(format_args!("BEGIN {}", self.host));
    }

    pub fn end(&self) {
        self.info(format_args!("END {}", self.host));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_tab_separated_and_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = HostLog::open(Some(dir.path()), "scp", "r1.example.org", LevelFilter::Info);
        log.begin();
        log.debug("not written at info");
        log.error("ProtocolError: no prompt");
        log.end();

        let text = std::fs::read_to_string(dir.path().join("collectscp.r1.example.org.log"))
            .expect("log file");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(&fields[1..], ["scp", "ERROR", "ProtocolError: no prompt"]);
        assert!(lines[0].ends_with("\tINFO\tBEGIN r1.example.org"));
        assert!(lines[2].ends_with("\tINFO\tEND r1.example.org"));
    }

    #[test]
    fn missing_directory_is_tolerated() {
        let log = HostLog::open(
            Some(Path::new("/nonexistent/confcollect")),
            "urlget",
            "h",
            LevelFilter::Debug,
        );
        log.info("still fine");
        assert_eq!(log.host(), "h");
    }
}
