// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Specialized single-sweep decode for hot message types.
//!
//! NewOrderSingle (D), ExecutionReport (8), and Heartbeat (0) dominate
//! gateway traffic. For those, one forward sweep over `tag=value<SOH>`
//! triples replaces the state-machine dispatch. The sweep must produce
//! exactly what the generic path produces; on any structural surprise
//! (unexpected MsgType position, malformed tag, missing required field,
//! body not ending on a field boundary) it reports
//! [`FastPathResult::Fallback`] and the generic machine decides.

use memchr::memchr;

use crate::config::ParserConfig;
use crate::protocol::fields::{FixMsgType, MAX_TAG, SOH};
use crate::protocol::fmt;

/// Outcome of a fast-path attempt.
#[derive(Debug)]
pub enum FastPathResult {
    /// Hot type decoded; fields captured in wire order.
    Decoded(Vec<(u32, String)>),
    /// Hot type, but the sweep hit a structural surprise.
    Fallback,
    /// Not a hot message type.
    NotHot,
}

/// Attempt the specialized sweep over one framed message.
///
/// `start` points at `8=FIX.4.4`, `header_end` at the first body byte,
/// `trailer_start` at `10=`. Framing has already validated the trailer
/// shape and that the frame is complete.
pub fn try_decode(
    config: &ParserConfig,
    work: &[u8],
    start: usize,
    header_end: usize,
    trailer_start: usize,
) -> FastPathResult {
    // Fixed BeginString comparison (cheap re-validation keeps the fast
    // path self-contained).
    if &work[start..header_end.min(start + 10)] != b"8=FIX.4.4\x01" {
        return FastPathResult::Fallback;
    }

    // The first body field of a well-formed message is MsgType(35).
    let body = &work[header_end..trailer_start];
    let msg_type = match body.strip_prefix(b"35=") {
        Some(rest) => {
            let end = match memchr(SOH, rest) {
                Some(end) => end,
                None => return FastPathResult::Fallback,
            };
            FixMsgType::from_bytes(&rest[..end])
        }
        None => return FastPathResult::NotHot,
    };

    if !msg_type.has_fast_path() {
        return FastPathResult::NotHot;
    }

    // Single forward sweep over tag=value<SOH> triples.
    let mut fields: Vec<(u32, String)> = Vec::with_capacity(16);
    let mut pos = 0;
    while pos < body.len() {
        let eq = match memchr(b'=', &body[pos..]) {
            Some(rel) => rel,
            None => return FastPathResult::Fallback,
        };
        let tag_bytes = &body[pos..pos + eq];
        let tag = match fast_tag(tag_bytes, config.strict_validation) {
            Some(tag) => tag,
            None => return FastPathResult::Fallback,
        };

        let value_start = pos + eq + 1;
        let soh = match memchr(SOH, &body[value_start..]) {
            Some(rel) => rel,
            None => return FastPathResult::Fallback,
        };
        let value = match std::str::from_utf8(&body[value_start..value_start + soh]) {
            Ok(v) => v,
            Err(_) => return FastPathResult::Fallback,
        };

        fields.push((tag, value.to_string()));
        pos = value_start + soh + 1;
    }

    // The sweep must land exactly on the trailer.
    if pos != body.len() {
        return FastPathResult::Fallback;
    }

    // Required-field presence per hot type; absences are structural
    // surprises the generic path reports precisely.
    for &required in msg_type.required_fields() {
        if !fields.iter().any(|(tag, _)| *tag == required) {
            return FastPathResult::Fallback;
        }
    }

    FastPathResult::Decoded(fields)
}

/// Digit-only tag parse, bounded at five digits in strict mode.
#[inline]
fn fast_tag(bytes: &[u8], strict: bool) -> Option<u32> {
    if bytes.is_empty() || (strict && bytes.len() > 5) {
        return None;
    }
    let value = fmt::parse_u64(bytes)?;
    if strict && value > u64::from(MAX_TAG) {
        return None;
    }
    u32::try_from(value).ok()
}
