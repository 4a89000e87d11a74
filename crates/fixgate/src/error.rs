// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.
//!
//! Hot paths (parser, pool, queues) never construct this type; they return
//! tagged results (`ParseStatus`, `Option`, `bool`) instead. `Error` covers
//! the cold control plane: configuration, connection setup, egress
//! lifecycle.
//!
//! # Example
//!
//! ```rust,no_run
//! use fixgate::{Error, Result};
//!
//! fn check_capacity(cap: usize) -> Result<()> {
//!     if cap == 0 {
//!         return Err(Error::InvalidConfig("pool capacity must be > 0".into()));
//!     }
//!     Ok(())
//! }
//! ```

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by fixgate control-plane operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration value rejected (detail in message).
    InvalidConfig(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(std::io::Error),
    /// Outbound connect failed (address in message).
    ConnectFailed(String),
    /// Operation attempted on a connection that is not established.
    NotConnected,
    /// Send failed after the connection went down.
    SendFailed(String),

    // ========================================================================
    // Egress Errors
    // ========================================================================
    /// A queue refused the message (full under a non-blocking policy).
    QueueFull { priority: &'static str },
    /// Egress manager used before `start()` or after `shutdown()`.
    InvalidState(String),
    /// Worker thread failed to spawn.
    SpawnFailed(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Object pool exhausted.
    PoolExhausted { pool: String },
    /// Pool reset attempted while allocations are live.
    PoolBusy { allocated: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::ConnectFailed(addr) => write!(f, "Connect failed: {}", addr),
            Error::NotConnected => write!(f, "Connection not established"),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::QueueFull { priority } => write!(f, "Queue full for priority {}", priority),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::SpawnFailed(msg) => write!(f, "Thread spawn failed: {}", msg),
            Error::PoolExhausted { pool } => write!(f, "Pool exhausted: {}", pool),
            Error::PoolBusy { allocated } => {
                write!(f, "Pool reset refused: {} allocations live", allocated)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = Error::InvalidConfig("bad".into());
        assert_eq!(e.to_string(), "Invalid configuration: bad");

        let e = Error::QueueFull { priority: "CRITICAL" };
        assert!(e.to_string().contains("CRITICAL"));

        let e = Error::PoolBusy { allocated: 3 };
        assert!(e.to_string().contains('3'));
    }

    #[test]
    fn test_io_conversion_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(std::error::Error::source(&e).is_some());
    }
}
