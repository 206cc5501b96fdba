use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;
use swarm_config::LOG_DIR;

/// File-backed log sink. Each process role writes to
/// `./logs/<ip>:<port>/<role>.txt`; the file is truncated at startup.
/// The mutex makes each entry atomic; nothing else is held while writing.
pub struct Logger {
    path: PathBuf,
    file: Mutex<File>,
}

impl Logger {
    /// Create (or truncate) the log file for `endpoint`/`role`.
    pub fn create(endpoint: &str, role: &str) -> io::Result<Logger> {
        let dir = PathBuf::from(LOG_DIR).join(endpoint);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{role}.txt"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Logger { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one timestamped entry. Logging failures are swallowed; the
    /// sink must never take a command handler down.
    pub fn log(&self, kind: &str, content: impl AsRef<str>) {
        let stamp = Local::now().format("%d/%m/%Y %H:%M:%S");
        let line = format!("[{stamp}][{kind}] {}\n", content.as_ref().trim_end());
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }

    pub fn info(&self, content: impl AsRef<str>) {
        self.log("INFO", content);
    }

    pub fn success(&self, content: impl AsRef<str>) {
        self.log("SUCCESS", content);
    }

    pub fn error(&self, content: impl AsRef<str>) {
        self.log("ERROR", content);
    }

    /// Protocol traffic in either direction.
    pub fn command(&self, content: impl AsRef<str>) {
        self.log("COMMAND", content);
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_entries_are_appended_with_kind() {
        let endpoint = format!("test-logger-{}", std::process::id());
        let logger = Logger::create(&endpoint, "general").unwrap();
        logger.info("first");
        logger.error("second");
        let text = fs::read_to_string(logger.path()).unwrap();
        assert!(text.contains("[INFO] first"));
        assert!(text.contains("[ERROR] second"));
        fs::remove_dir_all(PathBuf::from(LOG_DIR).join(endpoint)).unwrap();
    }

    #[test]
    fn test_create_truncates_previous_run() {
        let endpoint = format!("test-logger-trunc-{}", std::process::id());
        {
            let logger = Logger::create(&endpoint, "general").unwrap();
            logger.info("stale");
        }
        let logger = Logger::create(&endpoint, "general").unwrap();
        logger.info("fresh");
        let text = fs::read_to_string(logger.path()).unwrap();
        assert!(!text.contains("stale"));
        assert!(text.contains("fresh"));
        fs::remove_dir_all(PathBuf::from(LOG_DIR).join(endpoint)).unwrap();
    }
}
