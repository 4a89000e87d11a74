// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking TCP connection with a dedicated receive thread.
//!
//! The connection owns an IPv4 stream configured for low latency
//! (TCP_NODELAY, SO_KEEPALIVE, SO_LINGER(on, 0), 64 KiB kernel buffers)
//! and runs one receive thread that hands raw bytes to the registered
//! data callback — the parser's feed. Sends go out with MSG_NOSIGNAL and
//! loop over partial writes.
//!
//! # Socket sharing
//!
//! Four sender workers share one connection. A send mutex is held for
//! exactly one message's partial-send loop, so the bytes of two messages
//! are never interleaved on the wire; workers block on the mutex only
//! while another worker is mid-message.
//!
//! Callbacks are hot-swappable (`arc-swap`): the receive loop reads the
//! current callback per chunk without locking.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::config::TcpConfig;
use crate::error::{Error, Result};

/// Sleep between empty non-blocking reads.
const RECV_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Sleep between partial-send retries while the kernel buffer drains.
const SEND_RETRY_SLEEP: Duration = Duration::from_micros(100);

#[cfg(target_os = "linux")]
const SEND_FLAGS: i32 = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: i32 = 0;

/// Raw inbound bytes, straight off the socket.
pub type DataCallback = Arc<Box<dyn Fn(&[u8]) + Send + Sync>>;

/// Peer closed or the connection died.
pub type DisconnectCallback = Arc<Box<dyn Fn() + Send + Sync>>;

/// Transport-level error (receive loop or send path).
pub type TransportErrorCallback = Arc<Box<dyn Fn(&io::Error) + Send + Sync>>;

/// Connection counters (relaxed atomics, diagnostics only).
#[derive(Debug, Default)]
pub struct TcpConnectionStats {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    partial_sends: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

impl TcpConnectionStats {
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn partial_sends(&self) -> u64 {
        self.partial_sends.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    pub fn recv_errors(&self) -> u64 {
        self.recv_errors.load(Ordering::Relaxed)
    }
}

/// Callback slots shared with the receive thread.
struct Callbacks {
    data: ArcSwapOption<Box<dyn Fn(&[u8]) + Send + Sync>>,
    disconnect: ArcSwapOption<Box<dyn Fn() + Send + Sync>>,
    error: ArcSwapOption<Box<dyn Fn(&io::Error) + Send + Sync>>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            data: ArcSwapOption::empty(),
            disconnect: ArcSwapOption::empty(),
            error: ArcSwapOption::empty(),
        }
    }
}

/// A low-latency TCP connection to one FIX endpoint.
pub struct TcpConnection {
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,

    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    recv_thread: Mutex<Option<thread::JoinHandle<()>>>,

    /// Serializes whole messages across sender workers; held only for
    /// the duration of one message's partial-send loop.
    send_lock: Mutex<()>,

    callbacks: Arc<Callbacks>,
    stats: Arc<TcpConnectionStats>,
    config: TcpConfig,
}

impl TcpConnection {
    /// Connect to `addr` and apply the low-latency socket options.
    pub fn connect(addr: SocketAddr, config: TcpConfig) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;

        socket
            .connect_timeout(&addr.into(), config.connect_timeout)
            .map_err(|e| {
                log::warn!("connect to {} failed: {}", addr, e);
                Error::ConnectFailed(format!("{}: {}", addr, e))
            })?;

        let stream: TcpStream = socket.into();
        Self::from_stream(stream, config)
    }

    /// Wrap an already-established stream (accepted side, tests).
    pub fn from_stream(stream: TcpStream, config: TcpConfig) -> Result<Self> {
        let sock = SockRef::from(&stream);
        if config.nodelay {
            sock.set_nodelay(true)?;
        }
        if config.keepalive {
            sock.set_keepalive(true)?;
        }
        // Linger(0): RST on close, no TIME_WAIT pileup on restart.
        sock.set_linger(Some(Duration::from_secs(0)))?;
        sock.set_send_buffer_size(config.socket_buffer_size)?;
        sock.set_recv_buffer_size(config.socket_buffer_size)?;
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        sock.set_nosigpipe(true)?;

        stream.set_nonblocking(true)?;

        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;

        Ok(Self {
            stream,
            local_addr,
            peer_addr,
            connected: Arc::new(AtomicBool::new(true)),
            stop: Arc::new(AtomicBool::new(false)),
            recv_thread: Mutex::new(None),
            send_lock: Mutex::new(()),
            callbacks: Arc::new(Callbacks::default()),
            stats: Arc::new(TcpConnectionStats::default()),
            config,
        })
    }

    // ========================================================================
    // Callback registration
    // ========================================================================

    /// Register the inbound byte sink (normally the parser feed).
    pub fn set_data_callback(&self, cb: DataCallback) {
        self.callbacks.data.store(Some(cb));
    }

    pub fn set_disconnect_callback(&self, cb: DisconnectCallback) {
        self.callbacks.disconnect.store(Some(cb));
    }

    pub fn set_error_callback(&self, cb: TransportErrorCallback) {
        self.callbacks.error.store(Some(cb));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn stats(&self) -> &TcpConnectionStats {
        &self.stats
    }

    // ========================================================================
    // Receive loop
    // ========================================================================

    /// Spawn the receive thread. Bytes land in the data callback in
    /// arrival order; the loop exits on stop, peer close, or hard error.
    pub fn start_receive_loop(&self) -> Result<()> {
        let mut slot = self.recv_thread.lock();
        if slot.is_some() {
            return Err(Error::InvalidState("receive loop already running".into()));
        }

        let stream = self.stream.try_clone().map_err(Error::Io)?;
        let stop = Arc::clone(&self.stop);
        let connected = Arc::clone(&self.connected);
        let callbacks = Arc::clone(&self.callbacks);
        let stats = Arc::clone(&self.stats);
        let read_size = self.config.read_buffer_size;
        let peer = self.peer_addr;

        let handle = thread::Builder::new()
            .name("fixgate-tcp-rx".to_string())
            .spawn(move || {
                receive_loop(stream, stop, connected, callbacks, stats, read_size, peer);
            })
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;

        *slot = Some(handle);
        Ok(())
    }

    // ========================================================================
    // Send path
    // ========================================================================

    /// Send one whole message.
    ///
    /// Holds the connection's send mutex across the partial-send loop so
    /// concurrent workers never interleave message bytes. Returns
    /// `WouldBlock` (as `Error::Io`) only when nothing was written — the
    /// caller can back off and retry; once any byte is on the wire the
    /// loop finishes the message.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let _guard = self.send_lock.lock();
        let sock = SockRef::from(&self.stream);
        let mut sent = 0;

        while sent < bytes.len() {
            match sock.send_with_flags(&bytes[sent..], SEND_FLAGS) {
                Ok(n) => {
                    sent += n;
                    self.stats.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                    if sent < bytes.len() {
                        self.stats.partial_sends.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if sent == 0 {
                        return Err(Error::Io(e));
                    }
                    // Mid-message: finish it, the kernel buffer drains in
                    // microseconds at these sizes.
                    thread::sleep(SEND_RETRY_SLEEP);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    if matches!(
                        e.kind(),
                        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                    ) {
                        self.mark_down();
                    }
                    if let Some(cb) = &*self.callbacks.error.load() {
                        cb(&e);
                    }
                    return Err(Error::SendFailed(format!("{}: {}", self.peer_addr, e)));
                }
            }
        }

        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn mark_down(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            if let Some(cb) = &*self.callbacks.disconnect.load() {
                cb();
            }
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stop the receive loop, close the socket, drop connection state.
    pub fn disconnect(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        if let Some(handle) = self.recv_thread.lock().take() {
            let _ = handle.join();
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("local", &self.local_addr)
            .field("peer", &self.peer_addr)
            .field("connected", &self.is_connected())
            .field("messages_sent", &self.stats.messages_sent())
            .finish()
    }
}

/// Receive thread body: read, dispatch, sleep on empty.
fn receive_loop(
    mut stream: TcpStream,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    callbacks: Arc<Callbacks>,
    stats: Arc<TcpConnectionStats>,
    read_size: usize,
    peer: SocketAddr,
) {
    let mut buf = vec![0u8; read_size];

    while !stop.load(Ordering::Acquire) {
        match stream.read(&mut buf) {
            Ok(0) => {
                // Peer closed.
                log::info!("peer {} closed the connection", peer);
                if connected.swap(false, Ordering::AcqRel) {
                    if let Some(cb) = &*callbacks.disconnect.load() {
                        cb();
                    }
                }
                return;
            }
            Ok(n) => {
                stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                if let Some(cb) = &*callbacks.data.load() {
                    cb(&buf[..n]);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(RECV_IDLE_SLEEP);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                if stop.load(Ordering::Acquire) {
                    return; // Shutdown raced the read; not an error.
                }
                log::warn!("receive loop on {} failed: {}", peer, e);
                stats.recv_errors.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = &*callbacks.error.load() {
                    cb(&e);
                }
                if connected.swap(false, Ordering::AcqRel) {
                    if let Some(cb) = &*callbacks.disconnect.load() {
                        cb();
                    }
                }
                return;
            }
        }
    }
}
