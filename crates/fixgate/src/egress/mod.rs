// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Priority-routed egress: four queues, four pinned workers, one socket.
//!
//! The [`EgressManager`] owns a message pool, one queue per priority
//! (blocking heap or lock-free ring, chosen at construction, sized to
//! that priority's capacity), one sender worker per queue, and the
//! shared [`TcpConnection`]. `route()` stamps the queue-entry mark and
//! pushes by priority; `shutdown()` drains workers against a deadline
//! and disconnects.
//!
//! ```text
//! route(msg) --> [CRITICAL q] --> worker 0 (core A) --\
//!           \--> [HIGH     q] --> worker 1 (core B) ---+--> TcpConnection
//!            \-> [MEDIUM   q] --> worker 2 (core C) --/
//!             \> [LOW      q] --> worker 3 (core D) -/
//! ```

pub mod affinity;
pub mod sender;

pub use sender::{SenderStats, SenderWorker, SenderWorkerConfig};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{EgressConfig, PoolConfig};
use crate::core::{ObjectPool, PoolBox};
use crate::error::{Error, Result};
use crate::message::{Message, MessageKind, Priority};
use crate::queue::{HeapPriorityQueue, PriorityQueue, QueueStats, SingleLaneQueue};
use crate::transport::TcpConnection;

/// The handle type flowing through the egress queues: pool-backed
/// envelopes released automatically when delivery finishes.
pub type RoutedMessage = PoolBox<Message>;

/// Egress pipeline: pool, queues, workers, shared connection.
pub struct EgressManager {
    config: EgressConfig,
    pool: Arc<ObjectPool<Message>>,
    connection: Arc<TcpConnection>,
    queues: [Arc<dyn PriorityQueue<RoutedMessage>>; 4],
    workers: Vec<SenderWorker<RoutedMessage>>,
    started: bool,
}

impl EgressManager {
    /// Build the pipeline. Queues and workers are created here; threads
    /// spawn in [`start`](Self::start).
    pub fn new(
        connection: Arc<TcpConnection>,
        config: EgressConfig,
        pool_config: PoolConfig,
    ) -> Result<Self> {
        let pool = Arc::new(ObjectPool::new(pool_config.capacity, pool_config.name)?);
        if pool_config.prewarm {
            pool.prewarm();
        }

        // One queue per priority, each sized to exactly that priority's
        // capacity; route() segregates by priority, so the lock-free
        // variant needs a single ring per queue, not four.
        let capacities = [
            config.queues.low_capacity,
            config.queues.medium_capacity,
            config.queues.high_capacity,
            config.queues.critical_capacity,
        ];
        let queues: [Arc<dyn PriorityQueue<RoutedMessage>>; 4] = if config.lock_free_queues {
            [
                Self::ring_queue(capacities[0]),
                Self::ring_queue(capacities[1]),
                Self::ring_queue(capacities[2]),
                Self::ring_queue(capacities[3]),
            ]
        } else {
            [
                Self::heap_queue(capacities[0], &config),
                Self::heap_queue(capacities[1], &config),
                Self::heap_queue(capacities[2], &config),
                Self::heap_queue(capacities[3], &config),
            ]
        };

        let workers = Priority::DESCENDING
            .iter()
            .rev() // construct Low..Critical so worker index == lane index
            .map(|&priority| {
                let worker_config = SenderWorkerConfig {
                    priority,
                    max_retries: config.max_retries,
                    retry_base_timeout: config.retry_base_timeout,
                    core: config.core_map[priority.lane()],
                    enable_core_pinning: config.enable_core_pinning,
                    enable_real_time_priority: config.enable_real_time_priority,
                };
                SenderWorker::new(
                    worker_config,
                    Arc::clone(&queues[priority.lane()]),
                    Arc::clone(&connection),
                )
            })
            .collect();

        Ok(Self {
            config,
            pool,
            connection,
            queues,
            workers,
            started: false,
        })
    }

    fn ring_queue(capacity: usize) -> Arc<dyn PriorityQueue<RoutedMessage>> {
        Arc::new(SingleLaneQueue::new(capacity))
    }

    fn heap_queue(
        capacity: usize,
        config: &EgressConfig,
    ) -> Arc<dyn PriorityQueue<RoutedMessage>> {
        Arc::new(HeapPriorityQueue::new(
            capacity,
            config.queues.overflow_policy,
            config.queues.push_timeout,
        ))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn pool(&self) -> &Arc<ObjectPool<Message>> {
        &self.pool
    }

    pub fn connection(&self) -> &Arc<TcpConnection> {
        &self.connection
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Stats of the queue serving `priority`.
    pub fn queue_stats(&self, priority: Priority) -> &QueueStats {
        self.queues[priority.lane()].stats()
    }

    /// Stats of the worker serving `priority`.
    pub fn worker_stats(&self, priority: Priority) -> &Arc<SenderStats> {
        self.workers[priority.lane()].stats()
    }

    /// Total residual messages across all queues.
    pub fn queued_len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the four workers. Errors only here, on spawn failure.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::InvalidState("egress manager already started".into()));
        }
        for worker in &mut self.workers {
            worker.start()?;
        }
        self.started = true;
        log::info!(
            "egress started: 4 workers -> {} (pinning {})",
            self.connection.peer_addr(),
            if self.config.enable_core_pinning {
                "on"
            } else {
                "off"
            }
        );
        Ok(())
    }

    /// Signal workers to stop without waiting.
    pub fn stop(&self) {
        for queue in &self.queues {
            queue.shutdown();
        }
        for worker in &self.workers {
            worker.stop();
        }
    }

    /// Stop workers, join them against `timeout`, disconnect the socket.
    /// Workers that miss the deadline are detached; their queues drain
    /// through destructors.
    pub fn shutdown(&mut self, timeout: Duration) {
        if !self.started {
            return;
        }
        self.stop();

        let deadline = Instant::now() + timeout;
        for worker in &mut self.workers {
            worker.join_by(deadline);
        }

        self.connection.disconnect();
        self.pool.shutdown();
        self.started = false;
        log::info!("egress shut down ({} messages left queued)", self.queued_len());
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Allocate an envelope from the egress pool.
    ///
    /// `None` when the pool is exhausted; callers treat that as
    /// backpressure.
    pub fn create_message(
        &self,
        message_id: impl Into<String>,
        payload: Vec<u8>,
        priority: Priority,
        kind: MessageKind,
    ) -> Option<RoutedMessage> {
        self.pool
            .allocate(Message::new(message_id, payload, priority, kind))
    }

    /// Route a message to the queue matching its priority.
    ///
    /// A refused push is reported, not silently dropped — unless the
    /// queue's own overflow policy already evicted something, which its
    /// drop counter records.
    pub fn route(&self, msg: RoutedMessage) -> Result<()> {
        if !self.started {
            return Err(Error::InvalidState("egress manager not started".into()));
        }
        let priority = msg.priority();
        msg.mark_queued();
        self.queues[priority.lane()]
            .push(msg)
            .map_err(|_| Error::QueueFull {
                priority: priority.as_str(),
            })
    }
}

impl Drop for EgressManager {
    fn drop(&mut self) {
        if self.started {
            self.shutdown(Duration::from_millis(500));
        }
    }
}

impl std::fmt::Debug for EgressManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressManager")
            .field("started", &self.started)
            .field("queued", &self.queued_len())
            .field("pool_allocated", &self.pool.stats().allocated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, TcpConfig};
    use std::io::Read;
    use std::net::TcpListener;

    fn loopback() -> (Arc<TcpConnection>, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = TcpConnection::connect(addr, TcpConfig::default()).expect("connect");
        let (server, _) = listener.accept().expect("accept");
        (Arc::new(client), server)
    }

    fn small_egress_config(lock_free: bool) -> EgressConfig {
        EgressConfig {
            queues: QueueConfig {
                critical_capacity: 16,
                high_capacity: 16,
                medium_capacity: 16,
                low_capacity: 16,
                ..Default::default()
            },
            lock_free_queues: lock_free,
            ..Default::default()
        }
    }

    fn small_pool_config() -> PoolConfig {
        PoolConfig {
            capacity: 64,
            name: "egress_test_pool".to_string(),
            prewarm: true,
        }
    }

    fn read_exactly(server: &mut std::net::TcpStream, want: usize) -> Vec<u8> {
        server
            .set_read_timeout(Some(Duration::from_secs(3)))
            .expect("timeout");
        let mut wire = Vec::with_capacity(want);
        let mut buf = vec![0u8; 4096];
        while wire.len() < want {
            match server.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => wire.extend_from_slice(&buf[..n]),
                Err(e) => panic!("server read failed: {}", e),
            }
        }
        wire
    }

    #[test]
    fn test_route_delivers_over_both_variants() {
        for lock_free in [true, false] {
            let (connection, mut server) = loopback();
            let mut manager = EgressManager::new(
                connection,
                small_egress_config(lock_free),
                small_pool_config(),
            )
            .expect("manager");
            manager.start().expect("start");

            for (id, priority) in [
                ("c", Priority::Critical),
                ("h", Priority::High),
                ("m", Priority::Medium),
                ("l", Priority::Low),
            ] {
                let msg = manager
                    .create_message(id, format!("MSG-{}\x01", id).into_bytes(), priority, MessageKind::Order)
                    .expect("pool allocation");
                manager.route(msg).expect("route");
            }

            let wire = read_exactly(&mut server, 24);
            assert_eq!(wire.len(), 24, "lock_free={}", lock_free);

            manager.shutdown(Duration::from_secs(1));
            assert_eq!(
                manager.pool().stats().allocated(),
                0,
                "all envelopes must return to the pool (lock_free={})",
                lock_free
            );
        }
    }

    #[test]
    fn test_route_before_start_fails() {
        let (connection, _server) = loopback();
        let manager = EgressManager::new(
            connection,
            small_egress_config(true),
            small_pool_config(),
        )
        .expect("manager");

        let msg = manager
            .create_message("early", b"x".to_vec(), Priority::Low, MessageKind::Order)
            .expect("allocation");
        assert!(matches!(
            manager.route(msg),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_double_start_rejected() {
        let (connection, _server) = loopback();
        let mut manager = EgressManager::new(
            connection,
            small_egress_config(true),
            small_pool_config(),
        )
        .expect("manager");
        manager.start().expect("first start");
        assert!(manager.start().is_err());
        manager.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_pool_exhaustion_reports_none() {
        let (connection, _server) = loopback();
        let manager = EgressManager::new(
            connection,
            small_egress_config(true),
            PoolConfig {
                capacity: 2,
                name: "tiny_egress_pool".to_string(),
                prewarm: false,
            },
        )
        .expect("manager");

        let a = manager
            .create_message("a", Vec::new(), Priority::Low, MessageKind::Order)
            .expect("first");
        let _b = manager
            .create_message("b", Vec::new(), Priority::Low, MessageKind::Order)
            .expect("second");
        assert!(manager
            .create_message("c", Vec::new(), Priority::Low, MessageKind::Order)
            .is_none());
        assert_eq!(manager.pool().stats().allocation_failures(), 1);

        drop(a);
        assert!(manager
            .create_message("d", Vec::new(), Priority::Low, MessageKind::Order)
            .is_some());
    }

    #[test]
    fn test_shutdown_joins_and_disconnects() {
        let (connection, _server) = loopback();
        let mut manager = EgressManager::new(
            connection,
            small_egress_config(true),
            small_pool_config(),
        )
        .expect("manager");
        manager.start().expect("start");
        assert!(manager.is_started());

        manager.shutdown(Duration::from_secs(1));
        assert!(!manager.is_started());
        assert!(!manager.connection().is_connected());
        assert!(manager.pool().is_shutdown());
    }

    #[test]
    fn test_queue_full_reported() {
        let (connection, _server) = loopback();
        // Workers never started: pushes accumulate until the lane fills.
        let manager = EgressManager::new(
            connection,
            EgressConfig {
                queues: QueueConfig {
                    critical_capacity: 4,
                    high_capacity: 4,
                    medium_capacity: 4,
                    low_capacity: 4,
                    ..Default::default()
                },
                lock_free_queues: true,
                ..Default::default()
            },
            small_pool_config(),
        )
        .expect("manager");

        // Route without started workers is refused; use the queue
        // directly to fill the low lane instead.
        let queue = &manager.queues[Priority::Low.lane()];
        for i in 0..4 {
            let msg = manager
                .create_message(format!("f{}", i), Vec::new(), Priority::Low, MessageKind::Order)
                .expect("allocation");
            queue.push(msg).expect("lane has room");
        }
        let overflow = manager
            .create_message("of", Vec::new(), Priority::Low, MessageKind::Order)
            .expect("allocation");
        assert!(queue.push(overflow).is_err());
        assert_eq!(queue.stats().dropped(), 1);
    }
}
