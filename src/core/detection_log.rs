use crate::common::error::Result;
use crate::core::provider::FaceLocation;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStatus {
    Authorised,
    Unauthorised,
}

impl DetectionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            DetectionStatus::Authorised => "Authorised",
            DetectionStatus::Unauthorised => "Unauthorised",
        }
    }
}

/// One logged sighting. Immutable once written; the log is append-only.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Local>,
    pub name: String,
    pub status: DetectionStatus,
    pub location: FaceLocation,
}

const CSV_HEADER: &str = "timestamp,name,status,location";

/// Appends detection events to a CSV file, debounced per identity.
///
/// A given identity (the "Unauthorised" bucket included) is logged at most
/// once per rolling window; identities never block each other. Debounce
/// entries live for the process lifetime.
pub struct DetectionLogger {
    path: PathBuf,
    debounce: Duration,
    last_seen: HashMap<String, Instant>,
}

impl DetectionLogger {
    /// Opens the log, writing the CSV header if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>, debounce: Duration) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(&path, format!("{}\n", CSV_HEADER))?;
        }
        Ok(Self {
            path,
            debounce,
            last_seen: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff `name` has not been stamped within the debounce window
    /// ending at `now`. A true result stamps `now` as the new last-seen time.
    pub fn should_log_at(&mut self, name: &str, now: Instant) -> bool {
        match self.last_seen.get(name) {
            Some(&last) if now.saturating_duration_since(last) <= self.debounce => false,
            _ => {
                self.last_seen.insert(name.to_string(), now);
                true
            }
        }
    }

    pub fn should_log(&mut self, name: &str) -> bool {
        self.should_log_at(name, Instant::now())
    }

    pub fn log(&mut self, event: &DetectionEvent) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{},{},{},\"{},{},{},{}\"",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.name,
            event.status.as_str(),
            event.location.top,
            event.location.right,
            event.location.bottom,
            event.location.left,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn logger(debounce_secs: u64) -> (tempfile::TempDir, DetectionLogger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = DetectionLogger::open(
            dir.path().join("detections.csv"),
            Duration::from_secs(debounce_secs),
        )
        .unwrap();
        (dir, logger)
    }

    #[test]
    fn debounce_window_per_identity() {
        let (_dir, mut logger) = logger(10);
        let t = Instant::now();

        assert!(logger.should_log_at("alice", t));
        assert!(!logger.should_log_at("alice", t + Duration::from_secs(5)));
        assert!(logger.should_log_at("alice", t + Duration::from_secs(11)));
    }

    #[test]
    fn identities_do_not_block_each_other() {
        let (_dir, mut logger) = logger(10);
        let t = Instant::now();

        assert!(logger.should_log_at("alice", t));
        assert!(logger.should_log_at("Unauthorised", t + Duration::from_secs(1)));
        assert!(logger.should_log_at("bob", t + Duration::from_secs(2)));
        assert!(!logger.should_log_at("alice", t + Duration::from_secs(3)));
    }

    #[test]
    fn successful_log_restarts_the_window() {
        let (_dir, mut logger) = logger(10);
        let t = Instant::now();

        assert!(logger.should_log_at("alice", t));
        assert!(logger.should_log_at("alice", t + Duration::from_secs(11)));
        // Window restarted at t+11; t+15 is only 4s later
        assert!(!logger.should_log_at("alice", t + Duration::from_secs(15)));
    }

    #[test]
    fn header_written_once_and_rows_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.csv");

        let mut logger = DetectionLogger::open(&path, Duration::from_secs(10)).unwrap();
        let event = DetectionEvent {
            timestamp: Local.with_ymd_and_hms(2025, 4, 29, 14, 52, 3).unwrap(),
            name: "alice".into(),
            status: DetectionStatus::Authorised,
            location: FaceLocation { top: 40, right: 200, bottom: 160, left: 80 },
        };
        logger.log(&event).unwrap();
        drop(logger);

        // Reopening must not rewrite the header or clobber rows
        let _logger = DetectionLogger::open(&path, Duration::from_secs(10)).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "timestamp,name,status,location");
        assert_eq!(lines[1], "2025-04-29 14:52:03,alice,Authorised,\"40,200,160,80\"");
    }
}
