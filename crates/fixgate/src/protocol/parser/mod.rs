// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resumable FIX 4.4 stream parser.
//!
//! TCP delivers FIX traffic as an arbitrarily fragmented byte stream. The
//! parser turns that stream into pool-allocated [`FixMessage`]s in two
//! stages:
//!
//! 1. **Framing** — locate one complete message: scan for the BeginString,
//!    validate BodyLength, check the trailer shape. Incomplete input is
//!    held in a bounded carry-over buffer and `NeedMoreData` is returned.
//! 2. **Decode** — drive the field state machine over the framed bytes,
//!    capture `(tag, value)` pairs, validate the checksum, and emit a
//!    message allocated from the pool.
//!
//! # State machine
//!
//! ```text
//! Idle -> ParsingBeginString -> ParsingBodyLength -> ParsingTag
//!      -> ExpectingEquals -> ParsingValue -> ExpectingSoh
//!            |                                   |
//!            +--> ParsingChecksum <--------------+   (body complete)
//!                      |
//!                      v
//!               MessageComplete -> Idle
//!
//! any state --error--> ErrorRecovery -> CorruptedSkip -> Idle
//! ```
//!
//! # Byte accounting
//!
//! `bytes_consumed` counts the caller's input only. On `Success` the
//! remainder after the message stays with the caller; on `NeedMoreData`
//! and on recoverable errors the unconsumed tail moves into the carry
//! buffer and the whole input counts as consumed. Summed over all calls,
//! consumed bytes equal the stream length once the carry is empty.
//!
//! Recoverable errors scan forward to the next `8=FIX` and count the
//! skipped bytes as corruption. A run of consecutive errors beyond the
//! configured limit opens a circuit breaker that refuses input until
//! [`reset_circuit_breaker`](StreamFixParser::reset_circuit_breaker).

pub mod fast_path;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memchr::{memchr, memmem};

use crate::clock;
use crate::config::ParserConfig;
use crate::core::{ObjectPool, PoolBox};
use crate::protocol::fields::{tags, MAX_TAG, SOH};
use crate::protocol::fmt;
use crate::protocol::message::{mod256, FixMessage};

/// Carry-over capacity: a partial message may never exceed this.
pub const CARRY_OVER_LIMIT: usize = 16 * 1024;

/// `10=DDD<SOH>`.
const CHECKSUM_FIELD_LEN: usize = 7;

/// `8=FIX.4.4<SOH>`.
const BEGIN_FIELD_LEN: usize = 10;

/// Needle for framing and recovery scans; version bytes are validated
/// separately so foreign versions surface as `UnsupportedVersion` instead
/// of silent corruption.
const BEGIN_NEEDLE: &[u8] = b"8=FIX";

// ============================================================================
// States and statuses
// ============================================================================

/// Decoder state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParseState {
    #[default]
    Idle,
    ParsingBeginString,
    ParsingBodyLength,
    ParsingTag,
    ExpectingEquals,
    ParsingValue,
    ExpectingSoh,
    ParsingChecksum,
    MessageComplete,
    ErrorRecovery,
    CorruptedSkip,
}

impl ParseState {
    /// Legal transition table (the error edge into `ErrorRecovery` is
    /// allowed from every state but `MessageComplete`).
    fn can_transition_to(self, to: ParseState) -> bool {
        use ParseState::*;
        if to == ErrorRecovery {
            return !matches!(self, MessageComplete);
        }
        matches!(
            (self, to),
            (Idle, ParsingBeginString)
                | (ParsingBeginString, ParsingBodyLength)
                | (ParsingBodyLength, ParsingTag)
                | (ParsingTag, ExpectingEquals)
                | (ExpectingEquals, ParsingValue)
                | (ParsingValue, ExpectingSoh)
                | (ExpectingSoh, ParsingTag)
                | (ExpectingSoh, ParsingChecksum)
                | (ParsingChecksum, MessageComplete)
                | (MessageComplete, Idle)
                | (ErrorRecovery, Idle)
                | (ErrorRecovery, CorruptedSkip)
                | (CorruptedSkip, Idle)
                | (CorruptedSkip, ErrorRecovery)
        )
    }
}

impl std::fmt::Display for ParseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParseState::Idle => "Idle",
            ParseState::ParsingBeginString => "ParsingBeginString",
            ParseState::ParsingBodyLength => "ParsingBodyLength",
            ParseState::ParsingTag => "ParsingTag",
            ParseState::ExpectingEquals => "ExpectingEquals",
            ParseState::ParsingValue => "ParsingValue",
            ParseState::ExpectingSoh => "ExpectingSoh",
            ParseState::ParsingChecksum => "ParsingChecksum",
            ParseState::MessageComplete => "MessageComplete",
            ParseState::ErrorRecovery => "ErrorRecovery",
            ParseState::CorruptedSkip => "CorruptedSkip",
        };
        f.write_str(s)
    }
}

/// Outcome classification for one parse call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// One message decoded.
    Success,
    /// Input ends mid-message; remainder held in the carry-over buffer.
    NeedMoreData,
    /// Structure violated (bad framing, missing delimiter, bad trailer).
    InvalidFormat,
    /// A tag or value could not be parsed.
    FieldParseError,
    /// Declared and computed checksums differ.
    ChecksumError,
    /// BodyLength exceeds the configured maximum, or a partial message
    /// outgrew the carry-over buffer.
    MessageTooLarge,
    /// BeginString names a FIX version this gateway does not speak.
    UnsupportedVersion,
    /// The message pool is exhausted; input was left unconsumed.
    AllocationFailed,
    /// The circuit breaker is open; input was refused.
    CircuitOpen,
}

impl ParseStatus {
    /// Recoverable errors trigger a forward scan for the next message.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ParseStatus::InvalidFormat | ParseStatus::FieldParseError | ParseStatus::ChecksumError
        )
    }

    fn index(self) -> usize {
        match self {
            ParseStatus::Success => 0,
            ParseStatus::NeedMoreData => 1,
            ParseStatus::InvalidFormat => 2,
            ParseStatus::FieldParseError => 3,
            ParseStatus::ChecksumError => 4,
            ParseStatus::MessageTooLarge => 5,
            ParseStatus::UnsupportedVersion => 6,
            ParseStatus::AllocationFailed => 7,
            ParseStatus::CircuitOpen => 8,
        }
    }
}

const STATUS_COUNT: usize = 9;

impl std::fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParseStatus::Success => "Success",
            ParseStatus::NeedMoreData => "NeedMoreData",
            ParseStatus::InvalidFormat => "InvalidFormat",
            ParseStatus::FieldParseError => "FieldParseError",
            ParseStatus::ChecksumError => "ChecksumError",
            ParseStatus::MessageTooLarge => "MessageTooLarge",
            ParseStatus::UnsupportedVersion => "UnsupportedVersion",
            ParseStatus::AllocationFailed => "AllocationFailed",
            ParseStatus::CircuitOpen => "CircuitOpen",
        };
        f.write_str(s)
    }
}

/// Result of one [`StreamFixParser::parse`] call.
#[derive(Debug)]
pub struct ParseOutcome {
    pub status: ParseStatus,
    /// Bytes of the caller's input consumed by this call.
    pub bytes_consumed: usize,
    /// The decoded message on `Success`.
    pub message: Option<PoolBox<FixMessage>>,
    /// Human-readable detail on failure.
    pub error_detail: Option<String>,
    /// Parser state after the call.
    pub final_state: ParseState,
    /// Offset into the caller's input where the error was detected, when
    /// it lies within this call's input (errors inside carried-over bytes
    /// report 0).
    pub error_offset: Option<usize>,
}

// ============================================================================
// Statistics
// ============================================================================

/// Parser counters. Relaxed atomics so monitoring threads can read them
/// while the owning thread parses; they are not a synchronization channel.
#[derive(Debug, Default)]
pub struct ParserStats {
    total_messages: AtomicU64,
    status_counts: [AtomicU64; STATUS_COUNT],
    parse_nanos_total: AtomicU64,
    parse_nanos_min: AtomicU64,
    parse_nanos_max: AtomicU64,
    state_transitions: AtomicU64,
    illegal_transitions: AtomicU64,
    partial_messages: AtomicU64,
    recoveries_attempted: AtomicU64,
    recoveries_completed: AtomicU64,
    corrupted_bytes_skipped: AtomicU64,
    fast_path_hits: AtomicU64,
    fast_path_fallbacks: AtomicU64,
}

impl ParserStats {
    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn count_for(&self, status: ParseStatus) -> u64 {
        self.status_counts[status.index()].load(Ordering::Relaxed)
    }

    pub fn parse_nanos_total(&self) -> u64 {
        self.parse_nanos_total.load(Ordering::Relaxed)
    }

    pub fn parse_nanos_min(&self) -> u64 {
        self.parse_nanos_min.load(Ordering::Relaxed)
    }

    pub fn parse_nanos_max(&self) -> u64 {
        self.parse_nanos_max.load(Ordering::Relaxed)
    }

    pub fn state_transitions(&self) -> u64 {
        self.state_transitions.load(Ordering::Relaxed)
    }

    pub fn illegal_transitions(&self) -> u64 {
        self.illegal_transitions.load(Ordering::Relaxed)
    }

    pub fn partial_messages(&self) -> u64 {
        self.partial_messages.load(Ordering::Relaxed)
    }

    pub fn recoveries_attempted(&self) -> u64 {
        self.recoveries_attempted.load(Ordering::Relaxed)
    }

    pub fn recoveries_completed(&self) -> u64 {
        self.recoveries_completed.load(Ordering::Relaxed)
    }

    pub fn corrupted_bytes_skipped(&self) -> u64 {
        self.corrupted_bytes_skipped.load(Ordering::Relaxed)
    }

    pub fn fast_path_hits(&self) -> u64 {
        self.fast_path_hits.load(Ordering::Relaxed)
    }

    pub fn fast_path_fallbacks(&self) -> u64 {
        self.fast_path_fallbacks.load(Ordering::Relaxed)
    }

    fn record_call(&self, status: ParseStatus, nanos: u64) {
        self.status_counts[status.index()].fetch_add(1, Ordering::Relaxed);
        if status == ParseStatus::Success {
            self.total_messages.fetch_add(1, Ordering::Relaxed);
        }
        self.parse_nanos_total.fetch_add(nanos, Ordering::Relaxed);
        self.parse_nanos_max.fetch_max(nanos, Ordering::Relaxed);
        // min starts at 0 meaning "unset"; seed it on the first sample.
        let _ =
            self.parse_nanos_min
                .compare_exchange(0, nanos.max(1), Ordering::Relaxed, Ordering::Relaxed);
        self.parse_nanos_min
            .fetch_min(nanos.max(1), Ordering::Relaxed);
    }

    fn record_skipped(&self, bytes: usize) {
        if bytes > 0 {
            self.corrupted_bytes_skipped
                .fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// Parse context
// ============================================================================

/// Per-message working state, reset after every emit or recovery.
#[derive(Debug, Default)]
struct ParseContext {
    state: ParseState,
    /// Absolute start of the in-flight message within the work buffer.
    message_start: usize,
    expected_body_length: usize,
    body_bytes_parsed: usize,
    current_tag: u32,
    /// Value bytes of the field under construction.
    value_accum: Vec<u8>,
    /// Completed fields for the in-flight message.
    fields: Vec<(u32, String)>,
    consecutive_errors: usize,
}

impl ParseContext {
    /// Clear the in-flight message; keeps the error counter (it tracks
    /// the session, not one message).
    fn reset_message(&mut self) {
        self.message_start = 0;
        self.expected_body_length = 0;
        self.body_bytes_parsed = 0;
        self.current_tag = 0;
        self.value_accum.clear();
        self.fields.clear();
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Internal error carrier for the decode stage.
struct DecodeError {
    status: ParseStatus,
    detail: String,
    /// Absolute offset in the work buffer.
    offset: usize,
}

/// Streaming FIX 4.4 decoder bound to a message pool.
///
/// One parser instance serves one inbound byte stream and must be used
/// from one thread; the carry-over buffer and context are not shared.
pub struct StreamFixParser {
    config: ParserConfig,
    pool: Arc<ObjectPool<FixMessage>>,
    carry: Vec<u8>,
    context: ParseContext,
    /// When the circuit breaker opened (nanos), `None` while closed. The
    /// breaker closes again after `error_recovery_timeout` elapses or on
    /// an external reset.
    circuit_open_at: Option<u64>,
    stats: ParserStats,
}

impl StreamFixParser {
    pub fn new(config: ParserConfig, pool: Arc<ObjectPool<FixMessage>>) -> Self {
        Self {
            config,
            pool,
            carry: Vec::with_capacity(1024),
            context: ParseContext::default(),
            circuit_open_at: None,
            stats: ParserStats::default(),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    pub fn state(&self) -> ParseState {
        self.context.state
    }

    /// Whether a partial message is being carried between calls.
    pub fn has_partial_message(&self) -> bool {
        !self.carry.is_empty()
    }

    pub fn partial_size(&self) -> usize {
        self.carry.len()
    }

    pub fn is_circuit_open(&self) -> bool {
        self.circuit_open_at.is_some()
    }

    /// Close the breaker and clear the consecutive-error counter.
    pub fn reset_circuit_breaker(&mut self) {
        self.circuit_open_at = None;
        self.context.consecutive_errors = 0;
    }

    /// Drop all carried state and return to Idle.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.context.reset_message();
        self.context.state = ParseState::Idle;
    }

    // ========================================================================
    // Entry point
    // ========================================================================

    /// Consume bytes from the stream; emit at most one message.
    ///
    /// Call repeatedly over a buffer, advancing by `bytes_consumed`, until
    /// it is exhausted (see [`parse_all`](Self::parse_all)).
    pub fn parse(&mut self, input: &[u8]) -> ParseOutcome {
        let start = clock::now_nanos();
        let outcome = self.parse_inner(input);
        self.stats
            .record_call(outcome.status, clock::now_nanos().saturating_sub(start));
        outcome
    }

    /// Parse every message in `input`, collecting the outcomes.
    ///
    /// Stops on an unconsumable outcome (`AllocationFailed`,
    /// `CircuitOpen`, zero-length consumption) to avoid spinning. After
    /// the input is exhausted, messages the recovery path stashed into
    /// the carry buffer are drained as well.
    pub fn parse_all(&mut self, input: &[u8]) -> Vec<ParseOutcome> {
        let mut outcomes = Vec::new();
        let mut offset = 0;
        while offset < input.len() {
            let outcome = self.parse(&input[offset..]);
            let consumed = outcome.bytes_consumed;
            outcomes.push(outcome);
            if consumed == 0 {
                break;
            }
            offset += consumed;
        }

        // Error recovery can leave one or more complete messages in the
        // carry (everything after a corrupt frame is stashed there).
        // Drain them; stop as soon as a pass makes no progress.
        while self.has_partial_message() {
            let before = self.partial_size();
            let outcome = self.parse(&[]);
            let status = outcome.status;
            if status == ParseStatus::Success {
                outcomes.push(outcome);
                continue;
            }
            if self.partial_size() >= before {
                break; // genuine partial tail, waiting on more input
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    fn parse_inner(&mut self, input: &[u8]) -> ParseOutcome {
        if let Some(opened_at) = self.circuit_open_at {
            let cooled_down = clock::now_nanos().saturating_sub(opened_at)
                >= self.config.error_recovery_timeout.as_nanos() as u64;
            if cooled_down {
                log::info!("parser circuit breaker cooled down; resuming");
                self.reset_circuit_breaker();
            } else {
                return ParseOutcome {
                    status: ParseStatus::CircuitOpen,
                    bytes_consumed: 0,
                    message: None,
                    error_detail: Some(format!(
                        "circuit breaker open after {} consecutive errors",
                        self.context.consecutive_errors
                    )),
                    final_state: self.context.state,
                    error_offset: None,
                };
            }
        }

        if input.is_empty() && self.carry.is_empty() {
            self.note_error("empty input");
            self.context.state = ParseState::ErrorRecovery;
            return ParseOutcome {
                status: ParseStatus::InvalidFormat,
                bytes_consumed: 0,
                message: None,
                error_detail: Some("empty input".to_string()),
                final_state: ParseState::ErrorRecovery,
                error_offset: Some(0),
            };
        }

        let carry_len = self.carry.len();
        if carry_len == 0 {
            self.frame_and_decode(input, 0)
        } else {
            let mut work = std::mem::take(&mut self.carry);
            work.extend_from_slice(input);
            // frame_and_decode repopulates self.carry as needed.
            self.frame_and_decode(&work, carry_len)
        }
    }

    // ========================================================================
    // Stage 1: framing
    // ========================================================================

    fn frame_and_decode(&mut self, work: &[u8], carry_len: usize) -> ParseOutcome {
        // Locate the BeginString; everything before it is corruption.
        let start = match memmem::find(work, BEGIN_NEEDLE) {
            Some(pos) => pos,
            None => return self.handle_no_begin_string(work, carry_len),
        };
        self.stats.record_skipped(start);

        // Full BeginString field available?
        if work.len() < start + BEGIN_FIELD_LEN {
            return self.need_more_data(work, start, carry_len);
        }

        // Version check: only FIX.4.4 passes.
        if &work[start..start + BEGIN_FIELD_LEN - 1] != b"8=FIX.4.4"
            || work[start + BEGIN_FIELD_LEN - 1] != SOH
        {
            // Fatal per-message, no recovery scan: hand the bytes after
            // the needle back through the carry and return to Idle.
            self.stats.record_skipped(BEGIN_NEEDLE.len());
            self.stash_remainder(work, start + BEGIN_NEEDLE.len());
            self.context.reset_message();
            self.context.state = ParseState::Idle;
            return ParseOutcome {
                status: ParseStatus::UnsupportedVersion,
                bytes_consumed: work.len().saturating_sub(carry_len),
                message: None,
                error_detail: Some("BeginString is not FIX.4.4".to_string()),
                final_state: ParseState::Idle,
                error_offset: Some(start.saturating_sub(carry_len)),
            };
        }

        // BodyLength field: "9=<digits><SOH>".
        let bl_start = start + BEGIN_FIELD_LEN;
        if work.len() < bl_start + 2 {
            return self.need_more_data(work, start, carry_len);
        }
        if &work[bl_start..bl_start + 2] != b"9=" {
            return self.fail_and_resync(
                work,
                carry_len,
                ParseStatus::InvalidFormat,
                "BodyLength(9) must follow BeginString".to_string(),
                bl_start,
                start,
            );
        }

        let digits_start = bl_start + 2;
        // BodyLength digits are bounded: seven digits cover any value the
        // size check below could accept.
        let digits_window_end = (digits_start + 8).min(work.len());
        let digits_end = match memchr(SOH, &work[digits_start..digits_window_end]) {
            Some(rel) => digits_start + rel,
            None if work.len() < digits_start + 8 => {
                return self.need_more_data(work, start, carry_len)
            }
            None => {
                return self.fail_and_resync(
                    work,
                    carry_len,
                    ParseStatus::InvalidFormat,
                    "BodyLength digits not terminated".to_string(),
                    digits_start,
                    start,
                )
            }
        };

        let body_length = match fmt::parse_u64(&work[digits_start..digits_end]) {
            Some(v) if v > 0 => v as usize,
            _ => {
                return self.fail_and_resync(
                    work,
                    carry_len,
                    ParseStatus::InvalidFormat,
                    "BodyLength must be a positive integer".to_string(),
                    digits_start,
                    start,
                )
            }
        };

        let header_end = digits_end + 1;
        let trailer_start = header_end + body_length;
        let message_end = trailer_start + CHECKSUM_FIELD_LEN;

        if body_length > self.config.max_message_size || message_end - start > CARRY_OVER_LIMIT {
            // Fatal per-message: discard the claimed frame wholesale. The
            // remainder of its body arrives as corruption and is skipped
            // by later recovery scans.
            let detail = format!(
                "BodyLength {} exceeds limit (max_message_size {}, carry-over {})",
                body_length, self.config.max_message_size, CARRY_OVER_LIMIT
            );
            self.stats.record_skipped(work.len() - start);
            self.reset();
            return ParseOutcome {
                status: ParseStatus::MessageTooLarge,
                bytes_consumed: work.len().saturating_sub(carry_len),
                message: None,
                error_detail: Some(detail),
                final_state: ParseState::Idle,
                error_offset: Some(digits_start.saturating_sub(carry_len)),
            };
        }

        if work.len() < message_end {
            return self.need_more_data(work, start, carry_len);
        }

        // Trailer shape: "10=DDD<SOH>".
        let trailer = &work[trailer_start..message_end];
        if &trailer[..3] != b"10="
            || !trailer[3].is_ascii_digit()
            || !trailer[4].is_ascii_digit()
            || !trailer[5].is_ascii_digit()
            || trailer[6] != SOH
        {
            return self.fail_and_resync(
                work,
                carry_len,
                ParseStatus::InvalidFormat,
                "trailer is not 10=DDD<SOH>".to_string(),
                trailer_start,
                start,
            );
        }

        // Stage 2 over the framed bytes.
        match self.decode_message(work, start, header_end, body_length, trailer_start) {
            Ok(message) => {
                self.context.consecutive_errors = 0;
                self.context.reset_message();
                self.context.state = ParseState::Idle;
                if message_end < carry_len {
                    // The carry held more than one message (recovery can
                    // stash several); keep the carried tail for the next
                    // call. Input bytes are not duplicated into the carry
                    // because the caller re-feeds them (consumed is 0).
                    self.carry.clear();
                    self.carry.extend_from_slice(&work[message_end..carry_len]);
                }
                // Anything past the message within this call's input
                // stays with the caller.
                ParseOutcome {
                    status: ParseStatus::Success,
                    bytes_consumed: message_end.saturating_sub(carry_len),
                    message: Some(message),
                    error_detail: None,
                    final_state: ParseState::Idle,
                    error_offset: None,
                }
            }
            Err(err) if err.status == ParseStatus::AllocationFailed => {
                // Leave the stream untouched so the caller can retry once
                // the pool drains: restore the carry this call consumed.
                self.carry.clear();
                self.carry.extend_from_slice(&work[..carry_len]);
                self.context.reset_message();
                self.context.state = ParseState::Idle;
                ParseOutcome {
                    status: ParseStatus::AllocationFailed,
                    bytes_consumed: 0,
                    message: None,
                    error_detail: Some(err.detail),
                    final_state: ParseState::Idle,
                    error_offset: None,
                }
            }
            Err(err) => {
                let offset = err.offset;
                self.fail_and_resync(work, carry_len, err.status, err.detail, offset, start)
            }
        }
    }

    /// No BeginString in the buffer: keep any tail that is a prefix of
    /// one, discard the rest as corruption.
    fn handle_no_begin_string(&mut self, work: &[u8], carry_len: usize) -> ParseOutcome {
        let keep = longest_begin_prefix_suffix(work);
        let discarded = work.len() - keep;

        self.carry.clear();
        self.carry.extend_from_slice(&work[work.len() - keep..]);

        if discarded == 0 {
            // The whole buffer might still become a BeginString.
            if carry_len == 0 {
                self.stats.partial_messages.fetch_add(1, Ordering::Relaxed);
            }
            return ParseOutcome {
                status: ParseStatus::NeedMoreData,
                bytes_consumed: work.len().saturating_sub(carry_len),
                message: None,
                error_detail: None,
                final_state: self.context.state,
                error_offset: None,
            };
        }

        self.stats.record_skipped(discarded);
        self.note_error("no BeginString in input");
        // Everything up to the kept tail was skipped; recovery is done.
        let final_state = self.finish_recovery(true);
        ParseOutcome {
            status: ParseStatus::InvalidFormat,
            bytes_consumed: work.len().saturating_sub(carry_len),
            message: None,
            error_detail: Some("no BeginString in input".to_string()),
            final_state,
            error_offset: Some(0),
        }
    }

    /// Hold `[start..]` in the carry-over and ask for more bytes. A
    /// partial message larger than the carry-over limit is a hard error.
    fn need_more_data(&mut self, work: &[u8], start: usize, carry_len: usize) -> ParseOutcome {
        let partial = work.len() - start;
        if partial > CARRY_OVER_LIMIT {
            let detail = format!(
                "partial message of {} bytes exceeds {} byte carry-over limit",
                partial, CARRY_OVER_LIMIT
            );
            self.stats.record_skipped(partial);
            self.reset();
            return ParseOutcome {
                status: ParseStatus::MessageTooLarge,
                bytes_consumed: work.len().saturating_sub(carry_len),
                message: None,
                error_detail: Some(detail),
                final_state: ParseState::Idle,
                error_offset: Some(start.saturating_sub(carry_len)),
            };
        }

        self.carry.clear();
        self.carry.extend_from_slice(&work[start..]);
        if carry_len == 0 {
            self.stats.partial_messages.fetch_add(1, Ordering::Relaxed);
        }
        ParseOutcome {
            status: ParseStatus::NeedMoreData,
            bytes_consumed: work.len().saturating_sub(carry_len),
            message: None,
            error_detail: None,
            final_state: self.context.state,
            error_offset: None,
        }
    }

    // ========================================================================
    // Error recovery
    // ========================================================================

    /// Bump the consecutive-error counter (possibly opening the breaker)
    /// and enter recovery.
    fn note_error(&mut self, detail: &str) {
        self.transition(ParseState::ErrorRecovery);
        self.stats
            .recoveries_attempted
            .fetch_add(1, Ordering::Relaxed);
        self.context.consecutive_errors += 1;
        if self.context.consecutive_errors > self.config.max_consecutive_errors
            && self.circuit_open_at.is_none()
        {
            self.circuit_open_at = Some(clock::now_nanos());
            log::warn!(
                "parser circuit breaker opened after {} consecutive errors ({})",
                self.context.consecutive_errors,
                detail
            );
        }
    }

    /// Leave recovery. `resynced` means a resync point was found (or the
    /// buffer fully drained into it); otherwise the parser stays in
    /// ErrorRecovery awaiting more input.
    fn finish_recovery(&mut self, resynced: bool) -> ParseState {
        let final_state = if resynced {
            self.transition(ParseState::CorruptedSkip);
            self.transition(ParseState::Idle);
            self.stats
                .recoveries_completed
                .fetch_add(1, Ordering::Relaxed);
            ParseState::Idle
        } else {
            ParseState::ErrorRecovery
        };
        self.context.reset_message();
        self.context.state = final_state;
        final_state
    }

    /// Record a recoverable error: scan forward for the next `8=FIX`
    /// after `discard_from`, count the discarded frame as corruption,
    /// stash the remainder in the carry, consume the whole input.
    fn fail_and_resync(
        &mut self,
        work: &[u8],
        carry_len: usize,
        status: ParseStatus,
        detail: String,
        error_abs: usize,
        discard_from: usize,
    ) -> ParseOutcome {
        self.note_error(&detail);

        let scan_from = (discard_from + 1).min(work.len());
        let resync_abs = if self.config.error_recovery_enabled {
            match memmem::find(&work[scan_from..], BEGIN_NEEDLE) {
                Some(rel) => scan_from + rel,
                None => work.len(),
            }
        } else {
            work.len()
        };

        self.stats.record_skipped(resync_abs - discard_from);
        self.stash_remainder(work, resync_abs);

        let final_state = self.finish_recovery(resync_abs < work.len());

        ParseOutcome {
            status,
            bytes_consumed: work.len().saturating_sub(carry_len),
            message: None,
            error_detail: Some(detail),
            final_state,
            error_offset: Some(error_abs.saturating_sub(carry_len)),
        }
    }

    /// Move `work[from..]` into the carry buffer, dropping it as
    /// corruption if it cannot fit.
    fn stash_remainder(&mut self, work: &[u8], from: usize) {
        self.carry.clear();
        let remainder = &work[from.min(work.len())..];
        if remainder.len() > CARRY_OVER_LIMIT {
            self.stats.record_skipped(remainder.len());
            return;
        }
        self.carry.extend_from_slice(remainder);
    }

    // ========================================================================
    // Stage 2: decode
    // ========================================================================

    /// Run the field state machine over one framed message.
    fn decode_message(
        &mut self,
        work: &[u8],
        start: usize,
        header_end: usize,
        body_length: usize,
        trailer_start: usize,
    ) -> Result<PoolBox<FixMessage>, DecodeError> {
        self.context.reset_message();
        self.context.state = ParseState::Idle;
        self.context.message_start = start;
        self.context.expected_body_length = body_length;

        // Fast path for hot message types; structural surprises fall back
        // to the generic machine below.
        match fast_path::try_decode(&self.config, work, start, header_end, trailer_start) {
            fast_path::FastPathResult::Decoded(fields) => {
                self.stats.fast_path_hits.fetch_add(1, Ordering::Relaxed);
                self.context.fields = fields;
                self.context.body_bytes_parsed = body_length;
                self.context.state = ParseState::ParsingChecksum;
                return self.finish_message(work, start, body_length, trailer_start);
            }
            fast_path::FastPathResult::Fallback => {
                self.stats
                    .fast_path_fallbacks
                    .fetch_add(1, Ordering::Relaxed);
            }
            fast_path::FastPathResult::NotHot => {}
        }

        self.transition(ParseState::ParsingBeginString);
        self.transition(ParseState::ParsingBodyLength);
        self.transition(ParseState::ParsingTag);

        let mut pos = header_end;
        loop {
            if pos >= trailer_start {
                return Err(DecodeError {
                    status: ParseStatus::InvalidFormat,
                    detail: format!(
                        "body ended mid-field: {} of {} body bytes parsed",
                        self.context.body_bytes_parsed, body_length
                    ),
                    offset: pos,
                });
            }

            // --- tag ---
            let eq_rel = match memchr(b'=', &work[pos..trailer_start]) {
                Some(rel) => rel,
                None => {
                    return Err(DecodeError {
                        status: ParseStatus::FieldParseError,
                        detail: "field without '=' separator".to_string(),
                        offset: pos,
                    })
                }
            };
            let tag_bytes = &work[pos..pos + eq_rel];
            let tag =
                parse_tag(tag_bytes, self.config.strict_validation).ok_or_else(|| DecodeError {
                    status: ParseStatus::FieldParseError,
                    detail: format!("invalid tag {:?}", String::from_utf8_lossy(tag_bytes)),
                    offset: pos,
                })?;
            self.context.current_tag = tag;
            self.transition(ParseState::ExpectingEquals);
            self.transition(ParseState::ParsingValue);

            // --- value (empty permitted) ---
            let value_start = pos + eq_rel + 1;
            let soh_rel = match memchr(SOH, &work[value_start..trailer_start]) {
                Some(rel) => rel,
                None => {
                    return Err(DecodeError {
                        status: ParseStatus::FieldParseError,
                        detail: format!("value of tag {} not terminated by SOH", tag),
                        offset: value_start,
                    })
                }
            };
            self.context.value_accum.clear();
            self.context
                .value_accum
                .extend_from_slice(&work[value_start..value_start + soh_rel]);
            self.transition(ParseState::ExpectingSoh);

            let field_len = eq_rel + 1 + soh_rel + 1;
            self.context.body_bytes_parsed += field_len;
            let value = String::from_utf8_lossy(&self.context.value_accum).into_owned();
            self.context.fields.push((tag, value));
            pos = value_start + soh_rel + 1;

            if self.context.body_bytes_parsed >= self.context.expected_body_length {
                self.transition(ParseState::ParsingChecksum);
                break;
            }
            self.transition(ParseState::ParsingTag);
        }

        if self.context.body_bytes_parsed != body_length {
            return Err(DecodeError {
                status: ParseStatus::InvalidFormat,
                detail: format!(
                    "body length mismatch: declared {}, walked {}",
                    body_length, self.context.body_bytes_parsed
                ),
                offset: trailer_start,
            });
        }

        self.finish_message(work, start, body_length, trailer_start)
    }

    /// Checksum validation, pool allocation, field population.
    fn finish_message(
        &mut self,
        work: &[u8],
        start: usize,
        body_length: usize,
        trailer_start: usize,
    ) -> Result<PoolBox<FixMessage>, DecodeError> {
        let declared = checksum_digits(&work[trailer_start + 3..trailer_start + 6]);

        if self.config.validate_checksum {
            let computed = mod256(&work[start..trailer_start]);
            if computed != declared {
                return Err(DecodeError {
                    status: ParseStatus::ChecksumError,
                    detail: format!(
                        "checksum mismatch: declared {:03}, computed {:03}",
                        declared, computed
                    ),
                    offset: trailer_start,
                });
            }
        }

        let mut message = self
            .pool
            .allocate(FixMessage::with_field_capacity(
                self.context.fields.len() + 2,
            ))
            .ok_or_else(|| DecodeError {
                status: ParseStatus::AllocationFailed,
                detail: format!("pool '{}' exhausted", self.pool.name()),
                offset: start,
            })?;

        message.set_field(tags::BEGIN_STRING, "FIX.4.4");
        message.set_field_u64(tags::BODY_LENGTH, body_length as u64);
        for (tag, value) in self.context.fields.drain(..) {
            message.set_field(tag, value);
        }

        if !message.has_field(tags::MSG_TYPE) {
            // PoolBox drop releases the slot before recovery runs.
            drop(message);
            return Err(DecodeError {
                status: ParseStatus::InvalidFormat,
                detail: "MsgType(35) missing".to_string(),
                offset: start,
            });
        }

        if self.config.strict_validation {
            let msg_type = message.msg_type();
            for &required in msg_type.required_fields() {
                if !message.has_field(required) {
                    drop(message);
                    return Err(DecodeError {
                        status: ParseStatus::FieldParseError,
                        detail: format!("{} missing required tag {}", msg_type, required),
                        offset: start,
                    });
                }
            }
        }

        // Warm the classification cache before the message leaves.
        let _ = message.msg_type();

        self.transition(ParseState::MessageComplete);
        self.transition(ParseState::Idle);
        Ok(message)
    }

    /// Validated state transition; illegal moves are counted no-ops.
    fn transition(&mut self, to: ParseState) {
        if self.context.state == to {
            return;
        }
        if self.context.state.can_transition_to(to) {
            self.context.state = to;
            self.stats.state_transitions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats
                .illegal_transitions
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for StreamFixParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFixParser")
            .field("state", &self.context.state)
            .field("carry_len", &self.carry.len())
            .field("circuit_open", &self.is_circuit_open())
            .field("messages", &self.stats.total_messages())
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse an ASCII tag number. Strict mode caps tags at five digits.
fn parse_tag(bytes: &[u8], strict: bool) -> Option<u32> {
    if bytes.is_empty() {
        return None;
    }
    let value = fmt::parse_u64(bytes)?;
    if strict && (bytes.len() > 5 || value > u64::from(MAX_TAG)) {
        return None;
    }
    u32::try_from(value).ok()
}

/// Three validated checksum digits to a mod-256 value (e.g. `b"042"`).
fn checksum_digits(digits: &[u8]) -> u8 {
    let value = (u32::from(digits[0] - b'0') * 100)
        + (u32::from(digits[1] - b'0') * 10)
        + u32::from(digits[2] - b'0');
    (value % 256) as u8
}

/// Longest suffix of `work` that is a proper prefix of `8=FIX.4.4`.
fn longest_begin_prefix_suffix(work: &[u8]) -> usize {
    let needle = b"8=FIX.4.4";
    let max = work.len().min(needle.len() - 1);
    for keep in (1..=max).rev() {
        if work[work.len() - keep..] == needle[..keep] {
            return keep;
        }
    }
    0
}
