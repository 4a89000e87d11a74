// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Routing envelope for outbound traffic.
//!
//! A [`Message`] carries serialized payload bytes through the priority
//! queues to a sender worker. Lifecycle marks (creation, queue entry,
//! send) are plain nanosecond integers in atomics so pipeline stages on
//! different threads can stamp and read them without locks; the queues
//! provide the ownership hand-off.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock;

/// Egress priority. Higher drains first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    #[default]
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// All priorities, highest first (the lane drain order).
    pub const DESCENDING: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Lane index (0 = Low .. 3 = Critical).
    #[inline]
    pub fn lane(self) -> usize {
        self as usize
    }

    pub fn from_u8(value: u8) -> Option<Priority> {
        match value {
            0 => Some(Priority::Low),
            1 => Some(Priority::Medium),
            2 => Some(Priority::High),
            3 => Some(Priority::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of an envelope's payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Order,
    Cancel,
    Fill,
    Heartbeat,
    Logon,
    Logout,
    Reject,
    Accept,
    Error,
    #[default]
    Unknown,
}

/// Delivery state. Advances monotonically; the numeric order is the legal
/// transition order (Pending can jump straight to Failed on give-up).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageState {
    #[default]
    Pending = 0,
    Sending = 1,
    Sent = 2,
    Failed = 3,
    Expired = 4,
}

impl MessageState {
    fn from_u8(value: u8) -> MessageState {
        match value {
            0 => MessageState::Pending,
            1 => MessageState::Sending,
            2 => MessageState::Sent,
            3 => MessageState::Failed,
            _ => MessageState::Expired,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageState::Sent | MessageState::Failed | MessageState::Expired
        )
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageState::Pending => "Pending",
            MessageState::Sending => "Sending",
            MessageState::Sent => "Sent",
            MessageState::Failed => "Failed",
            MessageState::Expired => "Expired",
        };
        f.write_str(s)
    }
}

/// Invoked when a message is confirmed sent.
pub type CompletionCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Invoked when delivery gives up; carries the error code and detail.
pub type ErrorCallback = Arc<dyn Fn(&Message, i32, &str) + Send + Sync>;

/// Application hook invoked alongside completion.
pub type UserCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Timestamp value meaning "not recorded yet".
const UNSET: u64 = 0;

/// Outbound routing envelope.
pub struct Message {
    // --- identity ---
    message_id: String,
    seq_num: u64,

    // --- payload & routing ---
    payload: Vec<u8>,
    priority: Priority,
    kind: MessageKind,
    session_id: String,
    destination: String,

    // --- lifecycle marks (nanos since the process epoch, 0 = unset) ---
    creation_ns: AtomicU64,
    queue_entry_ns: AtomicU64,
    send_ns: AtomicU64,
    deadline_ns: AtomicU64,

    // --- delivery state ---
    state: AtomicU8,
    retry_count: AtomicU32,
    last_error: Mutex<Option<(i32, String)>>,

    // --- hooks ---
    on_complete: Option<CompletionCallback>,
    on_error: Option<ErrorCallback>,
    on_user: Option<UserCallback>,
}

impl Message {
    /// Build an envelope; the creation mark is stamped immediately.
    pub fn new(
        message_id: impl Into<String>,
        payload: Vec<u8>,
        priority: Priority,
        kind: MessageKind,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            seq_num: 0,
            payload,
            priority,
            kind,
            session_id: String::new(),
            destination: String::new(),
            creation_ns: AtomicU64::new(clock::now_nanos()),
            queue_entry_ns: AtomicU64::new(UNSET),
            send_ns: AtomicU64::new(UNSET),
            deadline_ns: AtomicU64::new(UNSET),
            state: AtomicU8::new(MessageState::Pending as u8),
            retry_count: AtomicU32::new(0),
            last_error: Mutex::new(None),
            on_complete: None,
            on_error: None,
            on_user: None,
        }
    }

    // ========================================================================
    // Builder-style setters (used before the envelope enters a queue)
    // ========================================================================

    pub fn with_seq_num(mut self, seq_num: u64) -> Self {
        self.seq_num = seq_num;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_deadline(self, deadline_ns: u64) -> Self {
        self.deadline_ns.store(deadline_ns, Ordering::Release);
        self
    }

    pub fn on_complete(mut self, cb: CompletionCallback) -> Self {
        self.on_complete = Some(cb);
        self
    }

    pub fn on_error(mut self, cb: ErrorCallback) -> Self {
        self.on_error = Some(cb);
        self
    }

    pub fn on_user(mut self, cb: UserCallback) -> Self {
        self.on_user = Some(cb);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn state(&self) -> MessageState {
        MessageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Last delivery error, if any.
    pub fn last_error(&self) -> Option<(i32, String)> {
        self.last_error.lock().clone()
    }

    pub fn creation_ns(&self) -> u64 {
        self.creation_ns.load(Ordering::Acquire)
    }

    pub fn queue_entry_ns(&self) -> u64 {
        self.queue_entry_ns.load(Ordering::Acquire)
    }

    pub fn send_ns(&self) -> u64 {
        self.send_ns.load(Ordering::Acquire)
    }

    pub fn deadline_ns(&self) -> u64 {
        self.deadline_ns.load(Ordering::Acquire)
    }

    // ========================================================================
    // Pipeline stamps
    // ========================================================================

    /// Stamp queue entry. Called by the queue on push.
    pub fn mark_queued(&self) {
        self.queue_entry_ns
            .store(clock::now_nanos(), Ordering::Release);
    }

    /// Stamp the send instant. Called by the sender worker on success.
    pub fn mark_sent(&self) {
        self.send_ns.store(clock::now_nanos(), Ordering::Release);
    }

    /// Bump the retry counter, returning the new count.
    pub fn bump_retry(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Whether the deadline (if set) has passed at `now_ns`.
    pub fn is_expired_at(&self, now_ns: u64) -> bool {
        let deadline = self.deadline_ns.load(Ordering::Acquire);
        deadline != UNSET && now_ns > deadline
    }

    /// Advance the delivery state.
    ///
    /// Only forward transitions are applied (the numeric state order);
    /// anything else is a silent no-op returning `false`.
    pub fn transition(&self, to: MessageState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if to as u8 <= current {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Record a delivery failure: state, error slot, error callback.
    pub fn fail(&self, code: i32, detail: &str) {
        *self.last_error.lock() = Some((code, detail.to_string()));
        self.transition(MessageState::Failed);
        if let Some(cb) = &self.on_error {
            cb(self, code, detail);
        }
    }

    /// Record a successful send: stamp, state, completion + user hooks.
    pub fn complete(&self) {
        self.mark_sent();
        self.transition(MessageState::Sent);
        if let Some(cb) = &self.on_complete {
            cb(self);
        }
        if let Some(cb) = &self.on_user {
            cb(self);
        }
    }

    /// Queue latency in nanoseconds, when both marks are populated.
    pub fn queue_latency_ns(&self) -> Option<u64> {
        let entry = self.queue_entry_ns();
        let send = self.send_ns();
        if entry == UNSET || send == UNSET {
            return None;
        }
        Some(send.saturating_sub(entry))
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("message_id", &self.message_id)
            .field("seq_num", &self.seq_num)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("payload_len", &self.payload.len())
            .field("retries", &self.retry_count())
            .finish()
    }
}

/// Anything the priority queues can route.
pub trait Prioritized {
    fn priority(&self) -> Priority;
}

impl Prioritized for Message {
    fn priority(&self) -> Priority {
        self.priority
    }
}

impl<T: Prioritized> Prioritized for Arc<T> {
    fn priority(&self) -> Priority {
        (**self).priority()
    }
}

impl<T: Prioritized> Prioritized for Box<T> {
    fn priority(&self) -> Priority {
        (**self).priority()
    }
}

impl<T: Prioritized> Prioritized for crate::core::PoolBox<T> {
    fn priority(&self) -> Priority {
        (**self).priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::DESCENDING[0], Priority::Critical);
        assert_eq!(Priority::from_u8(2), Some(Priority::High));
        assert_eq!(Priority::from_u8(9), None);
    }

    #[test]
    fn test_timestamps_ordered_through_pipeline() {
        let msg = Message::new("m1", b"x".to_vec(), Priority::High, MessageKind::Order);
        assert!(msg.creation_ns() > 0);
        assert_eq!(msg.queue_entry_ns(), 0);

        msg.mark_queued();
        msg.mark_sent();

        assert!(msg.creation_ns() <= msg.queue_entry_ns());
        assert!(msg.queue_entry_ns() <= msg.send_ns());
        assert!(msg.queue_latency_ns().is_some());
    }

    #[test]
    fn test_state_advances_monotonically() {
        let msg = Message::new("m2", Vec::new(), Priority::Low, MessageKind::Heartbeat);
        assert_eq!(msg.state(), MessageState::Pending);

        assert!(msg.transition(MessageState::Sending));
        assert!(msg.transition(MessageState::Sent));
        // Backwards transition is refused.
        assert!(!msg.transition(MessageState::Sending));
        assert_eq!(msg.state(), MessageState::Sent);
    }

    #[test]
    fn test_pending_to_failed_on_give_up() {
        let msg = Message::new("m3", Vec::new(), Priority::Low, MessageKind::Order);
        assert!(msg.transition(MessageState::Failed));
        assert!(msg.state().is_terminal());
    }

    #[test]
    fn test_fail_invokes_error_callback() {
        let fired = Arc::new(AtomicBool::new(false));
        let observer = Arc::clone(&fired);

        let msg = Message::new("m4", Vec::new(), Priority::High, MessageKind::Order).on_error(
            Arc::new(move |m, code, detail| {
                assert_eq!(m.message_id(), "m4");
                assert_eq!(code, 32);
                assert_eq!(detail, "broken pipe");
                observer.store(true, Ordering::Release);
            }),
        );

        msg.fail(32, "broken pipe");
        assert!(fired.load(Ordering::Acquire));
        assert_eq!(msg.state(), MessageState::Failed);
        assert_eq!(msg.last_error(), Some((32, "broken pipe".to_string())));
    }

    #[test]
    fn test_complete_invokes_hooks() {
        let count = Arc::new(AtomicU32::new(0));

        let c1 = Arc::clone(&count);
        let c2 = Arc::clone(&count);
        let msg = Message::new("m5", Vec::new(), Priority::Critical, MessageKind::Order)
            .on_complete(Arc::new(move |_| {
                c1.fetch_add(1, Ordering::Relaxed);
            }))
            .on_user(Arc::new(move |_| {
                c2.fetch_add(1, Ordering::Relaxed);
            }));

        msg.complete();
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(msg.state(), MessageState::Sent);
    }

    #[test]
    fn test_deadline_expiry() {
        let msg = Message::new("m6", Vec::new(), Priority::Low, MessageKind::Order)
            .with_deadline(clock::now_nanos() + 1_000_000_000);
        assert!(!msg.is_expired_at(clock::now_nanos()));
        assert!(msg.is_expired_at(msg.deadline_ns() + 1));

        let no_deadline = Message::new("m7", Vec::new(), Priority::Low, MessageKind::Order);
        assert!(!no_deadline.is_expired_at(u64::MAX));
    }

    #[test]
    fn test_retry_counter() {
        let msg = Message::new("m8", Vec::new(), Priority::Medium, MessageKind::Order);
        assert_eq!(msg.retry_count(), 0);
        assert_eq!(msg.bump_retry(), 1);
        assert_eq!(msg.bump_retry(), 2);
        assert_eq!(msg.retry_count(), 2);
    }
}
