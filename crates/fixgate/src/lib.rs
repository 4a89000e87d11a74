// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # fixgate — low-latency FIX 4.4 gateway data plane
//!
//! The three subsystems that carry a FIX gateway's hot path:
//!
//! - a **resumable stream parser** that frames and decodes FIX 4.4 from
//!   an arbitrarily fragmented TCP byte stream, with explicit recovery
//!   from malformed input and fast paths for hot message types;
//! - a **lock-free object pool** (Treiber-stack slab) delivering
//!   sub-microsecond allocation with fixed capacity and no page faults
//!   after warm-up;
//! - **priority-routed egress**: four priority lanes, each drained by a
//!   dedicated, optionally core-pinned sender worker writing to one TCP
//!   endpoint.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fixgate::config::{EgressConfig, GatewayConfig, PoolConfig};
//! use fixgate::egress::EgressManager;
//! use fixgate::message::{MessageKind, Priority};
//! use fixgate::protocol::{FixMessage, StreamFixParser};
//! use fixgate::transport::TcpConnection;
//! use fixgate::core::ObjectPool;
//! use std::sync::Arc;
//!
//! fn main() -> fixgate::Result<()> {
//!     let config = GatewayConfig::default();
//!
//!     // Inbound: connection -> parser -> pool-allocated messages.
//!     let connection = Arc::new(TcpConnection::connect(
//!         "127.0.0.1:9880".parse().expect("addr"),
//!         config.tcp.clone(),
//!     )?);
//!     let pool = Arc::new(ObjectPool::<FixMessage>::new(8192, "fix_pool")?);
//!     let mut parser = StreamFixParser::new(config.parser.clone(), pool);
//!
//!     // Outbound: egress manager with four pinned workers.
//!     let mut egress = EgressManager::new(connection, config.egress, config.pool)?;
//!     egress.start()?;
//!
//!     let msg = egress
//!         .create_message("hb-1", b"...".to_vec(), Priority::High, MessageKind::Heartbeat)
//!         .expect("pool has capacity");
//!     egress.route(msg)?;
//!     # let _ = &mut parser;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |        order flow, session logic (out of scope here)               |
//! +--------------------------------------------------------------------+
//! |  Inbound                          |  Outbound                      |
//! |  TcpConnection (rx thread)        |  EgressManager                 |
//! |        v                          |    route() by priority         |
//! |  StreamFixParser                  |    4 x queue (heap | ring)     |
//! |    framing -> state machine       |    4 x SenderWorker (pinned)   |
//! |        v                          |        v                       |
//! |  ObjectPool<FixMessage>           |  TcpConnection (send mutex)    |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`protocol::StreamFixParser`] | Byte stream in, pooled [`protocol::FixMessage`]s out |
//! | [`core::ObjectPool`] | Fixed-capacity lock-free allocator |
//! | [`queue::HeapPriorityQueue`] | Blocking priority queue (mutex + condvars) |
//! | [`queue::LanePriorityQueue`] | Lock-free four-lane priority queue |
//! | [`egress::EgressManager`] | Queues, workers, pinning, shared socket |
//! | [`transport::TcpConnection`] | Non-blocking socket with receive thread |

/// Monotonic nanosecond clock shared by all timestamps.
pub mod clock;
/// Configuration types with documented defaults.
pub mod config;
/// Lock-free building blocks (object pool, MPMC ring, pool registry).
pub mod core;
/// Priority-routed egress pipeline (manager, workers, affinity).
pub mod egress;
/// Crate error type.
pub mod error;
/// Logging backend for the `log` facade (console and file outputs).
pub mod logging;
/// Routing envelope and priority model.
pub mod message;
/// Counters, gauges, and latency recorders.
pub mod metrics;
/// FIX 4.4 protocol: fields, messages, builder, stream parser.
pub mod protocol;
/// Priority queues (blocking heap and lock-free lanes).
pub mod queue;
/// TCP transport.
pub mod transport;

pub use config::GatewayConfig;
pub use crate::core::{ObjectPool, PoolBox};
pub use egress::EgressManager;
pub use error::{Error, Result};
pub use message::{Message, MessageKind, MessageState, Priority};
pub use protocol::{FixMessage, FixMessageBuilder, ParseStatus, StreamFixParser};
pub use queue::{HeapPriorityQueue, LanePriorityQueue, PriorityQueue, SingleLaneQueue};
pub use transport::TcpConnection;

/// fixgate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
