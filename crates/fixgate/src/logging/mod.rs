// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging backend for the `log` facade.
//!
//! The crate logs through the standard `log` macros (`debug!`, `info!`,
//! `warn!`, `error!`). This module supplies the backend: an [`Output`]
//! trait with console and file implementations, installed once via
//! [`init_logger`]. Hot paths only format log arguments on error branches,
//! so an uninitialized logger costs a single atomic load per call site.
//!
//! # Example
//!
//! ```no_run
//! use fixgate::logging::{init_logger, ConsoleOutput};
//! use std::sync::Arc;
//!
//! init_logger(Arc::new(ConsoleOutput::new()), log::LevelFilter::Info);
//! log::info!("gateway starting");
//! ```

mod output;

pub use output::{ConsoleOutput, FileOutput, Output};

use std::sync::Arc;
use std::sync::OnceLock;

use crate::clock;

static BACKEND: OnceLock<GatewayLogger> = OnceLock::new();

/// `log::Log` implementation dispatching to an [`Output`].
struct GatewayLogger {
    output: Arc<dyn Output>,
}

impl log::Log for GatewayLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Microsecond timestamps keep lines sortable without the cost of a
        // wall-clock formatting round-trip per record.
        let line = format!(
            "[{:>12}us] [{:5}] [{}] {}",
            clock::nanos_to_micros(clock::now_nanos()),
            record.level(),
            record.target(),
            record.args()
        );
        let _ = self.output.write(record.level(), &line);
    }

    fn flush(&self) {
        let _ = self.output.flush();
    }
}

/// Install the global logging backend.
///
/// First call wins; later calls (including from tests running in the same
/// process) are silent no-ops, matching `log::set_logger` semantics.
pub fn init_logger(output: Arc<dyn Output>, level: log::LevelFilter) {
    let backend = BACKEND.get_or_init(|| GatewayLogger { output });
    if log::set_logger(backend).is_ok() {
        log::set_max_level(level);
    }
}

/// Flush the installed backend, if any.
pub fn flush_logger() {
    if let Some(backend) = BACKEND.get() {
        let _ = backend.output.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CaptureOutput {
        lines: Mutex<Vec<String>>,
    }

    impl Output for CaptureOutput {
        fn write(&self, _level: log::Level, message: &str) -> std::io::Result<()> {
            self.lines.lock().push(message.to_string());
            Ok(())
        }

        fn flush(&self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        let out = Arc::new(ConsoleOutput::new());
        init_logger(out.clone(), log::LevelFilter::Warn);
        // Second init must not panic or replace the backend.
        init_logger(out, log::LevelFilter::Trace);
        flush_logger();
    }

    #[test]
    fn test_capture_output_records_lines() {
        let capture = CaptureOutput {
            lines: Mutex::new(Vec::new()),
        };
        capture
            .write(log::Level::Info, "hello")
            .expect("capture write should not fail");
        assert_eq!(capture.lines.lock().len(), 1);
    }
}
