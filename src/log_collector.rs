//! Run logging: colored console output plus a complete log file per run.
//!
//! # Architecture
//!
//! ```text
//! log::info!() / log::debug!() ...
//!     |
//! [LogCollector] (implements log::Log)
//!     |                         |
//!     | Info and above          | every level (crossbeam channel)
//!     v                         v
//! stdout (colored)        [DiskPersister thread]
//!                               |
//!                         logs/<YYYYmmdd_HHMMSS>.log
//! ```
//!
//! External tool output is logged at `Debug`, so makepkg and mkarchiso
//! chatter lands only in the file while the console keeps the stage summary.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use owo_colors::OwoColorize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Internal log line or flush marker
enum LogMessage {
    Line(LogLine),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
    /// `HH:MM:SS.mmm` at creation
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, message: String) -> Self {
        LogLine {
            level,
            message,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    /// Line as written to the log file.
    pub fn formatted(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// Logs directory under the working root: `<work_root>/logs`
pub fn logs_dir(work_root: &Path) -> PathBuf {
    work_root.join("logs")
}

/// Console rendering of a record that passed the console level.
fn console_line(level: Level, message: &str) -> String {
    match level {
        Level::Error => format!("{} {}", "ERROR:".red().bold(), message.red()),
        Level::Warn => format!("{} {}", "WARNING:".yellow().bold(), message),
        _ => format!("{} {}", "==>".green().bold(), message),
    }
}

/// `log::Log` sink persisting every record to disk.
#[derive(Clone)]
pub struct LogCollector {
    /// crossbeam unbounded: sending never blocks the pipeline
    tx: Sender<LogMessage>,
    log_path: PathBuf,
    console_level: LevelFilter,
}

impl LogCollector {
    /// Create the log file for this run and spawn the persister thread.
    pub fn new(log_dir: &Path) -> Result<Self, String> {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create logs directory: {}", e))?;

        let log_path = log_dir.join(format!("{}.log", Local::now().format("%Y%m%d_%H%M%S")));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| format!("Failed to create log file {}: {}", log_path.display(), e))?;

        let (tx, rx) = unbounded::<LogMessage>();

        // OS thread rather than a tokio task: it outlives the runtime and
        // drains lines sent during shutdown
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let _ = file.write_all(line.formatted().as_bytes());
                    }
                    LogMessage::Flush(done) => {
                        let _ = file.flush();
                        let _ = file.sync_data();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            log_path,
            console_level: LevelFilter::Info,
        })
    }

    /// File receiving this run's log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Queue a line for the log file. Never blocks.
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Wait until every line sent before this call is on disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        tokio::task::spawn_blocking(move || rx.recv())
            .await
            .map_err(|e| format!("Flush task failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Register a clone as the global `log` logger, file level `Debug`.
    pub fn install(&self) -> Result<(), String> {
        log::set_boxed_logger(Box::new(self.clone()))
            .map(|()| log::set_max_level(LevelFilter::Debug))
            .map_err(|e| format!("Failed to set global logger: {}", e))
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        if record.level() <= self.console_level {
            println!("{}", console_line(record.level(), &message));
        }
        self.log_line(LogLine::new(record.level(), message));
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_collector_creates_timestamped_log_file() {
        let temp = TempDir::new().unwrap();
        let collector = LogCollector::new(&logs_dir(temp.path())).unwrap();

        let path = collector.log_path();
        assert_eq!(path.parent().unwrap(), temp.path().join("logs"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "20261016_120000.log".len());
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_wait_for_empty_persists_every_line() {
        let temp = TempDir::new().unwrap();
        let collector = LogCollector::new(temp.path()).unwrap();

        for i in 0..500 {
            collector.log_line(LogLine::new(Level::Debug, format!("[makepkg] line {}", i)));
        }
        collector.log_line(LogLine::new(Level::Info, "[Build] [DONE] finished".to_string()));
        collector.wait_for_empty().await.unwrap();

        let content = fs::read_to_string(collector.log_path()).unwrap();
        assert_eq!(content.lines().count(), 501);
        assert!(content.contains("] [DEBUG] [makepkg] line 499\n"));
        assert!(content.ends_with("] [INFO] [Build] [DONE] finished\n"));
    }

    #[test]
    fn test_formatted_line_shape() {
        let line = LogLine::new(Level::Warn, "careful".to_string());
        let formatted = line.formatted();
        assert!(formatted.starts_with('['));
        assert_eq!(&formatted[13..], "] [WARN] careful\n");
    }

    #[test]
    fn test_console_line_tags_level() {
        assert!(console_line(Level::Error, "boom").contains("ERROR:"));
        assert!(console_line(Level::Warn, "hm").contains("WARNING:"));
        assert!(console_line(Level::Info, "ok").contains("==>"));
    }
}
