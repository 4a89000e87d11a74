// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration types.
//!
//! Plain structs with documented defaults. Nothing here reads files or the
//! environment; callers construct a config, tweak the fields they care
//! about, and hand it to the component.
//!
//! # Example
//!
//! ```
//! use fixgate::config::{GatewayConfig, OverflowPolicy};
//!
//! let config = GatewayConfig {
//!     parser: fixgate::config::ParserConfig {
//!         validate_checksum: false,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert_eq!(config.queues.overflow_policy, OverflowPolicy::DropOldest);
//! ```

use std::time::Duration;

/// Behavior of a bounded queue when a push finds it full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the lowest-priority, most-recently queued entry to make room.
    #[default]
    DropOldest,
    /// Refuse the incoming message, keep the queue untouched.
    DropNewest,
    /// Block the producer (bounded by `push_timeout`) until space frees up.
    Block,
    /// Non-blocking refuse; identical to DropNewest but counted separately.
    Reject,
}

/// Stream parser configuration.
#[derive(Clone, Debug)]
pub struct ParserConfig {
    /// Maximum accepted FIX message size in bytes.
    ///
    /// A BodyLength header that implies a larger message is rejected with
    /// `MessageTooLarge` and no message is emitted. Default: 8192.
    pub max_message_size: usize,

    /// Recompute and verify CheckSum(10) on every decoded message.
    ///
    /// Default: true. Disable only for trusted inbound links.
    pub validate_checksum: bool,

    /// Reject structurally suspicious input (non-digit tag bytes, bad
    /// trailer shape) instead of tolerating it. Default: true.
    pub strict_validation: bool,

    /// Consecutive recoverable errors before the circuit breaker opens.
    /// Default: 10.
    pub max_consecutive_errors: usize,

    /// Scan forward to the next BeginString after a recoverable error.
    ///
    /// When disabled, any recoverable error is surfaced directly and the
    /// parser resets to idle. Default: true.
    pub error_recovery_enabled: bool,

    /// How long an open circuit breaker refuses input before closing
    /// again on its own. Default: 1000 ms.
    pub error_recovery_timeout: Duration,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_message_size: 8192,
            validate_checksum: true,
            strict_validation: true,
            max_consecutive_errors: 10,
            error_recovery_enabled: true,
            error_recovery_timeout: Duration::from_millis(1000),
        }
    }
}

/// Object pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of slots. Fixed for the pool's lifetime. Default: 8192.
    pub capacity: usize,

    /// Name used for the process-wide registry and log lines.
    pub name: String,

    /// Touch every slot at construction to force page residency.
    /// Default: true.
    pub prewarm: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 8192,
            name: "message_pool".to_string(),
            prewarm: true,
        }
    }
}

/// Per-priority queue capacities and overflow behavior.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// CRITICAL lane capacity. Default: 1024.
    pub critical_capacity: usize,

    /// HIGH lane capacity. Default: 2048.
    pub high_capacity: usize,

    /// MEDIUM lane capacity. Default: 4096.
    pub medium_capacity: usize,

    /// LOW lane capacity. Default: 8192.
    pub low_capacity: usize,

    /// What a full queue does with an incoming push (heap variant only;
    /// the lock-free lanes always drop-on-full). Default: DropOldest.
    pub overflow_policy: OverflowPolicy,

    /// Bound on a producer blocked by `OverflowPolicy::Block`.
    /// Default: 100 ms.
    pub push_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            critical_capacity: 1024,
            high_capacity: 2048,
            medium_capacity: 4096,
            low_capacity: 8192,
            overflow_policy: OverflowPolicy::DropOldest,
            push_timeout: Duration::from_millis(100),
        }
    }
}

/// Egress manager configuration.
#[derive(Clone, Debug)]
pub struct EgressConfig {
    /// Queue sizing and overflow behavior.
    pub queues: QueueConfig,

    /// Core index per priority lane, `[low, medium, high, critical]`.
    ///
    /// `None` entries leave that worker floating. Default: all None.
    pub core_map: [Option<usize>; 4],

    /// Attempt to pin each sender worker to its mapped core.
    /// Pin failures are logged warnings, never errors. Default: false.
    pub enable_core_pinning: bool,

    /// Request SCHED_FIFO priority 99 for sender workers (Linux; Darwin
    /// gets a QoS hint). Requires privileges. Default: false.
    pub enable_real_time_priority: bool,

    /// Use lock-free ring queues instead of the blocking heap.
    /// Default: true.
    pub lock_free_queues: bool,

    /// Per-message send retries before giving up. Default: 3.
    pub max_retries: u32,

    /// Base backoff between retries; attempt `n` waits `base × n`.
    /// Default: 1 ms.
    pub retry_base_timeout: Duration,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            queues: QueueConfig::default(),
            core_map: [None; 4],
            enable_core_pinning: false,
            enable_real_time_priority: false,
            lock_free_queues: true,
            max_retries: 3,
            retry_base_timeout: Duration::from_millis(1),
        }
    }
}

/// TCP connection tuning.
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub nodelay: bool,

    /// Enable SO_KEEPALIVE. Default: true.
    pub keepalive: bool,

    /// Kernel send/receive buffer size. Default: 64 KiB.
    pub socket_buffer_size: usize,

    /// Receive-loop read buffer size. Default: 8 KiB.
    pub read_buffer_size: usize,

    /// Outbound connect timeout. Default: 5 s.
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: true,
            socket_buffer_size: 64 * 1024,
            read_buffer_size: 8 * 1024,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Top-level bundle handed to a gateway assembly.
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    /// Inbound stream parser settings.
    pub parser: ParserConfig,

    /// FixMessage pool settings.
    pub pool: PoolConfig,

    /// Outbound queue settings (also reachable via `egress.queues`).
    pub queues: QueueConfig,

    /// Egress manager settings.
    pub egress: EgressConfig,

    /// TCP connection settings.
    pub tcp: TcpConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_defaults() {
        let c = ParserConfig::default();
        assert_eq!(c.max_message_size, 8192);
        assert!(c.validate_checksum);
        assert!(c.strict_validation);
        assert_eq!(c.max_consecutive_errors, 10);
        assert!(c.error_recovery_enabled);
        assert_eq!(c.error_recovery_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_queue_defaults_match_priority_ladder() {
        let c = QueueConfig::default();
        assert_eq!(c.critical_capacity, 1024);
        assert_eq!(c.high_capacity, 2048);
        assert_eq!(c.medium_capacity, 4096);
        assert_eq!(c.low_capacity, 8192);
        assert_eq!(c.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_tcp_defaults() {
        let c = TcpConfig::default();
        assert!(c.nodelay);
        assert!(c.keepalive);
        assert_eq!(c.socket_buffer_size, 64 * 1024);
        assert_eq!(c.read_buffer_size, 8 * 1024);
    }

    #[test]
    fn test_egress_defaults() {
        let c = EgressConfig::default();
        assert!(!c.enable_core_pinning);
        assert!(!c.enable_real_time_priority);
        assert!(c.lock_free_queues);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.core_map, [None; 4]);
    }
}
