// Log sink for gpio-shutdown: stdout plus a size-rotated local file
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Cannot open log file {0}: {1}")]
    Open(PathBuf, io::Error),
}

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERRO",
        })
    }
}

/// Append-only log file that rolls over to `<path>.1 .. <path>.<keep>`
/// once it would grow past `max_size` bytes.
#[derive(Debug)]
pub struct RollingFile {
    path: PathBuf,
    max_size: u64,
    keep: u32,
    file: File,
    size: u64,
}

impl RollingFile {
    pub fn open<P: AsRef<Path>>(path: P, max_size: u64, keep: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LogError::Open(path.clone(), e))?;
        }
        let file = Self::open_append(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path,
            max_size,
            keep,
            file,
            size,
        })
    }

    fn open_append(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| LogError::Open(path.to_path_buf(), e))
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// Shift backups up by one and start a fresh file
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.keep == 0 {
            fs::remove_file(&self.path)?;
        } else {
            let _ = fs::remove_file(self.backup_path(self.keep));
            for index in (1..self.keep).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
        }

        self.file = Self::open_append(&self.path).map_err(|e| match e {
            LogError::Open(_, err) => err,
        })?;
        self.size = 0;
        Ok(())
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let len = line.len() as u64;
        if self.size > 0 && self.size + len > self.max_size {
            self.rotate()?;
        }
        self.file.write_all(line.as_bytes())?;
        self.size += len;
        Ok(())
    }
}

static SINK: Mutex<Option<RollingFile>> = Mutex::new(None);

/// Start mirroring log records into `path`
pub fn init<P: AsRef<Path>>(path: P, max_size: u64, keep: u32) -> Result<()> {
    let file = RollingFile::open(path, max_size, keep)?;
    if let Ok(mut sink) = SINK.lock() {
        *sink = Some(file);
    }
    Ok(())
}

/// Format a record the way it appears on stdout and in the file
pub fn format_record(level: Level, message: &str) -> String {
    format!(
        "{} {}: {}\n",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        level,
        message
    )
}

pub fn log(level: Level, message: &str) {
    let line = format_record(level, message);

    let _ = io::stdout().lock().write_all(line.as_bytes());

    if let Ok(mut sink) = SINK.lock() {
        if let Some(file) = sink.as_mut() {
            if let Err(e) = file.write_line(&line) {
                // Keep logging to stdout; a broken file must not take the monitor down
                let _ = writeln!(io::stderr(), "WARN: log file disabled: {}", e);
                *sink = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_record_has_timestamp_and_level() {
        let line = format_record(Level::Warn, "pin 3 read failed");
        assert!(line.ends_with(" WARN: pin 3 read failed\n"));
        // 2026-01-01T00:00:00.000+00:00
        let stamp = line.split(' ').next().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn test_rolling_file_rotates_and_keeps_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.log");
        let mut file = RollingFile::open(&path, 10, 2).unwrap();

        file.write_line("aaaaaaaa\n").unwrap();
        file.write_line("bbbbbbbb\n").unwrap();
        file.write_line("cccccccc\n").unwrap();
        file.write_line("dddddddd\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddddd\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("monitor.log.1")).unwrap(),
            "cccccccc\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("monitor.log.2")).unwrap(),
            "bbbbbbbb\n"
        );
        assert!(!dir.path().join("monitor.log.3").exists());
    }

    #[test]
    fn test_rolling_file_appends_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("monitor.log");
        {
            let mut file = RollingFile::open(&path, 1024, 3).unwrap();
            file.write_line("first\n").unwrap();
        }
        let mut file = RollingFile::open(&path, 1024, 3).unwrap();
        file.write_line("second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_rolling_file_without_backups_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.log");
        let mut file = RollingFile::open(&path, 4, 0).unwrap();
        file.write_line("one\n").unwrap();
        file.write_line("two\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two\n");
        assert!(!dir.path().join("monitor.log.1").exists());
    }
}
