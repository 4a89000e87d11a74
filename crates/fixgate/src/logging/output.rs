// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log output destinations (console and file).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use parking_lot::Mutex;

/// Output destination for formatted log lines.
///
/// Implementations must be thread-safe; the backend calls `write` from any
/// thread that logs.
pub trait Output: Send + Sync {
    /// Write one formatted line.
    fn write(&self, level: log::Level, message: &str) -> io::Result<()>;

    /// Flush buffered output.
    fn flush(&self) -> io::Result<()>;
}

/// Writes log lines to stderr.
///
/// Errors and warnings go out immediately; stderr is line-buffered enough
/// for the volumes the gateway produces off the hot path.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for ConsoleOutput {
    fn write(&self, _level: log::Level, message: &str) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        stderr.write_all(message.as_bytes())?;
        stderr.write_all(b"\n")
    }

    fn flush(&self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Appends log lines to a file.
///
/// The file handle lives behind a mutex; contention is acceptable because
/// logging volume is low outside error storms.
pub struct FileOutput {
    file: Mutex<File>,
}

impl FileOutput {
    /// Open (or create) the log file at `path` in append mode.
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl Output for FileOutput {
    fn write(&self, _level: log::Level, message: &str) -> io::Result<()> {
        let mut file = self.file.lock();
        file.write_all(message.as_bytes())?;
        file.write_all(b"\n")
    }

    fn flush(&self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_write() {
        let out = ConsoleOutput::new();
        out.write(log::Level::Info, "console test line")
            .expect("stderr write should succeed");
        out.flush().expect("stderr flush should succeed");
    }

    #[test]
    fn test_file_output_appends() {
        let path = std::env::temp_dir().join("fixgate_log_test.log");
        let _ = std::fs::remove_file(&path);

        let out = FileOutput::new(&path).expect("log file should open");
        out.write(log::Level::Info, "line one")
            .expect("file write should succeed");
        out.write(log::Level::Warn, "line two")
            .expect("file write should succeed");
        out.flush().expect("file flush should succeed");

        let contents = std::fs::read_to_string(&path).expect("log file should be readable");
        assert!(contents.contains("line one"));
        assert!(contents.contains("line two"));

        let _ = std::fs::remove_file(&path);
    }
}
