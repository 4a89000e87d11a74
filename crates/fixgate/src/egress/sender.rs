// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-lane sender worker.
//!
//! Each worker drains one priority queue into the shared TCP connection:
//! pop (10 ms blocking for the heap variant; the lock-free lanes sleep
//! 100 µs internally when idle), send, and on retryable failure back off
//! exponentially (`base × retry_count`) up to the configured retry cap.
//! Giving up marks the message Failed and fires its error callback.
//!
//! On shutdown the worker drains whatever is still queued with single
//! best-effort sends before exiting.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::egress::affinity;
use crate::error::{Error, Result};
use crate::message::{Message, MessageState, Prioritized, Priority};
use crate::queue::PriorityQueue;
use crate::transport::TcpConnection;

/// Blocking-pop bound per loop iteration.
const POP_TIMEOUT: Duration = Duration::from_millis(10);

/// Error code reported on retry exhaustion when the I/O layer gave none.
const SEND_GIVE_UP_CODE: i32 = -1;

/// Worker counters (relaxed atomics, diagnostics only).
#[derive(Debug, Default)]
pub struct SenderStats {
    sent: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    drained_on_shutdown: AtomicU64,
}

impl SenderStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn drained_on_shutdown(&self) -> u64 {
        self.drained_on_shutdown.load(Ordering::Relaxed)
    }
}

/// Placement and retry policy for one worker.
#[derive(Clone, Debug)]
pub struct SenderWorkerConfig {
    pub priority: Priority,
    pub max_retries: u32,
    pub retry_base_timeout: Duration,
    /// Core index to pin to, when pinning is enabled.
    pub core: Option<usize>,
    pub enable_core_pinning: bool,
    pub enable_real_time_priority: bool,
}

/// One sender thread bound to one priority queue.
///
/// Generic over the queue item so both `Arc<Message>` and pool-backed
/// handles flow through; the item only needs to expose the envelope.
pub struct SenderWorker<T>
where
    T: Prioritized + Deref<Target = Message> + Send + 'static,
{
    config: SenderWorkerConfig,
    queue: Arc<dyn PriorityQueue<T>>,
    connection: Arc<TcpConnection>,
    running: Arc<AtomicBool>,
    stats: Arc<SenderStats>,
    handle: Option<thread::JoinHandle<()>>,
}

impl<T> SenderWorker<T>
where
    T: Prioritized + Deref<Target = Message> + Send + 'static,
{
    pub fn new(
        config: SenderWorkerConfig,
        queue: Arc<dyn PriorityQueue<T>>,
        connection: Arc<TcpConnection>,
    ) -> Self {
        Self {
            config,
            queue,
            connection,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SenderStats::default()),
            handle: None,
        }
    }

    pub fn priority(&self) -> Priority {
        self.config.priority
    }

    pub fn stats(&self) -> &Arc<SenderStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the worker thread.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::InvalidState("sender worker already started".into()));
        }

        self.running.store(true, Ordering::Release);

        let config = self.config.clone();
        let queue = Arc::clone(&self.queue);
        let connection = Arc::clone(&self.connection);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);

        let name = format!("fixgate-tx-{}", config.priority.as_str().to_lowercase());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run_loop(config, queue, connection, running, stats))
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Signal the loop to exit after its drain pass.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stop and wait for the thread until `deadline`. A worker that does
    /// not exit in time is detached.
    pub fn join_by(&mut self, deadline: std::time::Instant) -> bool {
        self.stop();
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return true,
        };

        while std::time::Instant::now() < deadline {
            if handle.is_finished() {
                let _ = handle.join();
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }

        log::warn!(
            "{} sender did not exit before the deadline; detaching",
            self.config.priority
        );
        drop(handle);
        false
    }
}

/// Worker thread body.
fn run_loop<T>(
    config: SenderWorkerConfig,
    queue: Arc<dyn PriorityQueue<T>>,
    connection: Arc<TcpConnection>,
    running: Arc<AtomicBool>,
    stats: Arc<SenderStats>,
) where
    T: Prioritized + Deref<Target = Message> + Send + 'static,
{
    // Placement applies to the calling thread, so it happens here.
    if config.enable_core_pinning {
        if let Some(core) = config.core {
            affinity::pin_current_thread(core);
        }
    }
    if config.enable_real_time_priority {
        affinity::set_real_time(config.priority);
    }

    log::info!("{} sender worker started", config.priority);

    while running.load(Ordering::Acquire) {
        if let Some(msg) = queue.pop(POP_TIMEOUT) {
            deliver(&config, &connection, &stats, &msg);
        }
    }

    // Best-effort drain: one attempt per residual message.
    let mut drained = 0u64;
    while let Some(msg) = queue.try_pop() {
        msg.transition(MessageState::Sending);
        match connection.send(msg.payload()) {
            Ok(()) => {
                msg.complete();
                stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                msg.fail(SEND_GIVE_UP_CODE, &format!("shutdown drain: {}", e));
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        drained += 1;
    }
    if drained > 0 {
        stats
            .drained_on_shutdown
            .fetch_add(drained, Ordering::Relaxed);
    }

    log::info!("{} sender worker stopped", config.priority);
}

/// Send one message with exponential-backoff retries.
fn deliver<T>(
    config: &SenderWorkerConfig,
    connection: &TcpConnection,
    stats: &SenderStats,
    msg: &T,
) where
    T: Deref<Target = Message>,
{
    msg.transition(MessageState::Sending);

    loop {
        match connection.send(msg.payload()) {
            Ok(()) => {
                msg.complete();
                stats.sent.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(err) => {
                let retries = msg.bump_retry();
                if retries > config.max_retries {
                    let code = match &err {
                        Error::Io(e) => e.raw_os_error().unwrap_or(SEND_GIVE_UP_CODE),
                        _ => SEND_GIVE_UP_CODE,
                    };
                    log::warn!(
                        "{} send gave up after {} retries: {}",
                        config.priority,
                        retries - 1,
                        err
                    );
                    msg.fail(code, &err.to_string());
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                stats.retried.fetch_add(1, Ordering::Relaxed);
                thread::sleep(config.retry_base_timeout * retries);
            }
        }
    }
}
