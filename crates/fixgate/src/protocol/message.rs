// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FIX message representation.
//!
//! A [`FixMessage`] is a tag→value mapping with derived data cached on
//! first use: canonical serialization, BodyLength, CheckSum, and the
//! classified message type. Any mutation invalidates every cache.
//!
//! # Canonical serialization order
//!
//! ```text
//! 8=FIX.4.4 | 9=<len> | 35=<type> | <remaining tags, insertion order> | 10=<cs>
//! ```
//!
//! BodyLength counts the bytes after the BodyLength SOH up to and
//! including the SOH preceding the checksum field. CheckSum is the
//! mod-256 byte sum over everything before `"10="`, three digits.

use super::fields::{tags, FixMsgType, BEGIN_STRING, SENDABLE_REQUIRED, SOH};
use super::fmt;

/// Tag→value mapping with cached derived data.
#[derive(Clone, Debug, Default)]
pub struct FixMessage {
    /// Fields in insertion order. Serialization imposes the canonical
    /// order; insertion order is kept stable for the remaining tags.
    fields: Vec<(u32, String)>,

    // --- caches, all invalidated on mutation ---
    cached_wire: Option<Vec<u8>>,
    cached_body_length: Option<usize>,
    cached_checksum: Option<u8>,
    cached_msg_type: Option<FixMsgType>,
}

impl FixMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the field table (pool-allocated messages reserve once).
    pub fn with_field_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    // ========================================================================
    // Field access
    // ========================================================================

    /// Set a field, replacing any existing value for the tag.
    pub fn set_field(&mut self, tag: u32, value: impl Into<String>) {
        self.invalidate();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(t, _)| *t == tag) {
            slot.1 = value;
        } else {
            self.fields.push((tag, value));
        }
    }

    /// Set an integer field using the deterministic formatter.
    pub fn set_field_u64(&mut self, tag: u32, value: u64) {
        self.set_field(tag, fmt::u64_to_string(value));
    }

    /// Set a decimal field with fixed precision.
    pub fn set_field_f64(&mut self, tag: u32, value: f64, precision: usize) {
        self.set_field(tag, fmt::f64_to_string(value, precision));
    }

    /// Set a single-character field (Side, OrdType, ...).
    pub fn set_field_char(&mut self, tag: u32, value: char) {
        self.set_field(tag, value.to_string());
    }

    pub fn get_field(&self, tag: u32) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_field(&self, tag: u32) -> bool {
        self.fields.iter().any(|(t, _)| *t == tag)
    }

    /// Remove a field. Returns whether it was present.
    pub fn remove_field(&mut self, tag: u32) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(t, _)| *t != tag);
        let removed = self.fields.len() != before;
        if removed {
            self.invalidate();
        }
        removed
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (u32, &str)> {
        self.fields.iter().map(|(t, v)| (*t, v.as_str()))
    }

    /// Clear all fields and caches (pool slot reuse).
    pub fn clear(&mut self) {
        self.fields.clear();
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.cached_wire = None;
        self.cached_body_length = None;
        self.cached_checksum = None;
        self.cached_msg_type = None;
    }

    // ========================================================================
    // Derived data
    // ========================================================================

    /// Classified message type from tag 35 (cached).
    pub fn msg_type(&mut self) -> FixMsgType {
        if let Some(cached) = self.cached_msg_type {
            return cached;
        }
        let classified = self
            .get_field(tags::MSG_TYPE)
            .map(|v| FixMsgType::from_bytes(v.as_bytes()))
            .unwrap_or_default();
        self.cached_msg_type = Some(classified);
        classified
    }

    /// Peek the classification without populating the cache.
    pub fn msg_type_ref(&self) -> FixMsgType {
        self.cached_msg_type.unwrap_or_else(|| {
            self.get_field(tags::MSG_TYPE)
                .map(|v| FixMsgType::from_bytes(v.as_bytes()))
                .unwrap_or_default()
        })
    }

    /// Body tags in canonical order: 35 first, then every remaining tag
    /// in insertion order, excluding 8, 9, and 10.
    fn body_fields(&self) -> impl Iterator<Item = (u32, &str)> {
        let msg_type = self
            .fields
            .iter()
            .find(|(t, _)| *t == tags::MSG_TYPE)
            .map(|(t, v)| (*t, v.as_str()));
        let rest = self.fields.iter().filter_map(|(t, v)| {
            match *t {
                tags::BEGIN_STRING | tags::BODY_LENGTH | tags::MSG_TYPE | tags::CHECK_SUM => None,
                tag => Some((tag, v.as_str())),
            }
        });
        msg_type.into_iter().chain(rest)
    }

    /// BodyLength per the FIX definition (cached).
    pub fn body_length(&mut self) -> usize {
        if let Some(cached) = self.cached_body_length {
            return cached;
        }
        let len: usize = self
            .body_fields()
            .map(|(tag, value)| tag_width(tag) + 1 + value.len() + 1)
            .sum();
        self.cached_body_length = Some(len);
        len
    }

    /// Serialize into the canonical wire form (cached).
    ///
    /// BodyLength and CheckSum are recomputed from the current fields;
    /// stale 9/10 values set by a caller are ignored.
    pub fn serialize(&mut self) -> &[u8] {
        if self.cached_wire.is_none() {
            let body_length = self.body_length();
            let begin = self
                .get_field(tags::BEGIN_STRING)
                .unwrap_or(BEGIN_STRING)
                .to_string();

            let mut wire = Vec::with_capacity(body_length + begin.len() + 24);

            // 8=<version>
            wire.extend_from_slice(b"8=");
            wire.extend_from_slice(begin.as_bytes());
            wire.push(SOH);

            // 9=<len>
            wire.extend_from_slice(b"9=");
            fmt::push_u64(&mut wire, body_length as u64);
            wire.push(SOH);

            // body
            for (tag, value) in self.body_fields() {
                fmt::push_u64(&mut wire, u64::from(tag));
                wire.push(b'=');
                wire.extend_from_slice(value.as_bytes());
                wire.push(SOH);
            }

            // 10=<cs> over everything serialized so far
            let checksum = mod256(&wire);
            wire.extend_from_slice(b"10=");
            fmt::push_checksum(&mut wire, checksum);
            wire.push(SOH);

            self.cached_checksum = Some(checksum);
            self.cached_wire = Some(wire);
        }
        self.cached_wire.as_deref().expect("cache populated above")
    }

    /// CheckSum of the canonical serialization (cached).
    pub fn checksum(&mut self) -> u8 {
        if let Some(cached) = self.cached_checksum {
            return cached;
        }
        self.serialize();
        self.cached_checksum.expect("serialize populates checksum")
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check outbound completeness: the session header fields every
    /// sendable message needs, plus the per-type required body fields.
    ///
    /// Returns the first missing tag. BeginString and BodyLength are
    /// stamped by serialization and therefore only checked for presence
    /// when explicitly set to something other than FIX 4.4.
    pub fn validate_sendable(&self) -> Result<(), u32> {
        for &tag in SENDABLE_REQUIRED {
            match tag {
                // Supplied by serialization.
                tags::BEGIN_STRING | tags::BODY_LENGTH => continue,
                _ => {
                    if !self.has_field(tag) {
                        return Err(tag);
                    }
                }
            }
        }
        for &tag in self.msg_type_ref().required_fields() {
            if !self.has_field(tag) {
                return Err(tag);
            }
        }
        Ok(())
    }
}

/// ASCII width of a tag number (tags are bounded at five digits).
#[inline]
fn tag_width(tag: u32) -> usize {
    match tag {
        0..=9 => 1,
        10..=99 => 2,
        100..=999 => 3,
        1000..=9999 => 4,
        _ => 5,
    }
}

/// Mod-256 byte sum (the FIX CheckSum).
#[inline]
pub fn mod256(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> FixMessage {
        let mut msg = FixMessage::new();
        msg.set_field(tags::MSG_TYPE, "0");
        msg.set_field(tags::SENDER_COMP_ID, "S");
        msg.set_field(tags::TARGET_COMP_ID, "T");
        msg.set_field_u64(tags::MSG_SEQ_NUM, 1);
        msg.set_field(tags::SENDING_TIME, "20231201-12:00:00");
        msg
    }

    #[test]
    fn test_set_get_replace() {
        let mut msg = FixMessage::new();
        msg.set_field(tags::SYMBOL, "AAPL");
        assert_eq!(msg.get_field(tags::SYMBOL), Some("AAPL"));

        msg.set_field(tags::SYMBOL, "MSFT");
        assert_eq!(msg.get_field(tags::SYMBOL), Some("MSFT"));
        assert_eq!(msg.field_count(), 1);

        assert!(msg.remove_field(tags::SYMBOL));
        assert!(!msg.has_field(tags::SYMBOL));
        assert!(!msg.remove_field(tags::SYMBOL));
    }

    #[test]
    fn test_body_length_definition() {
        let mut msg = heartbeat();
        // 35=0| 49=S| 56=T| 34=1| 52=20231201-12:00:00|
        //   5  +  5  +  5  +  5  +         21          = 41
        assert_eq!(msg.body_length(), 41);
    }

    #[test]
    fn test_serialize_canonical_order() {
        let mut msg = heartbeat();
        let wire = msg.serialize().to_vec();
        let text = String::from_utf8(wire.clone()).expect("wire is ASCII");

        assert!(text.starts_with("8=FIX.4.4\x019=41\x0135=0\x01"));
        assert!(text.contains("49=S\x0156=T\x0134=1\x01"));

        // Trailer shape: 10=DDD<SOH> at the very end.
        let tail = &wire[wire.len() - 7..];
        assert_eq!(&tail[..3], b"10=");
        assert!(tail[3].is_ascii_digit());
        assert!(tail[4].is_ascii_digit());
        assert!(tail[5].is_ascii_digit());
        assert_eq!(tail[6], SOH);
    }

    #[test]
    fn test_checksum_matches_mod256_prefix() {
        let mut msg = heartbeat();
        let wire = msg.serialize().to_vec();
        let prefix_end = wire.len() - 7; // strip "10=DDD\x01"
        let expected = mod256(&wire[..prefix_end]);
        assert_eq!(msg.checksum(), expected);
    }

    #[test]
    fn test_mutation_invalidates_caches() {
        let mut msg = heartbeat();
        let before = msg.serialize().to_vec();
        let cs_before = msg.checksum();

        msg.set_field_u64(tags::MSG_SEQ_NUM, 2);
        let after = msg.serialize().to_vec();

        assert_ne!(before, after);
        // Different seqnum, different checksum (bytes differ by one digit).
        assert_ne!(cs_before, msg.checksum());
        assert_eq!(msg.get_field(tags::MSG_SEQ_NUM), Some("2"));
    }

    #[test]
    fn test_serialize_is_cached() {
        let mut msg = heartbeat();
        let a = msg.serialize().as_ptr();
        let b = msg.serialize().as_ptr();
        assert_eq!(a, b, "second serialize must reuse the cache");
    }

    #[test]
    fn test_msg_type_classification_cached() {
        let mut msg = heartbeat();
        assert_eq!(msg.msg_type(), FixMsgType::Heartbeat);

        msg.set_field(tags::MSG_TYPE, "D");
        assert_eq!(msg.msg_type(), FixMsgType::NewOrderSingle);

        let empty = FixMessage::new();
        assert_eq!(empty.msg_type_ref(), FixMsgType::Unknown);
    }

    #[test]
    fn test_unknown_tags_preserved() {
        let mut msg = heartbeat();
        msg.set_field(9876, "custom");
        let wire = msg.serialize().to_vec();
        let text = String::from_utf8(wire).expect("ascii");
        assert!(text.contains("9876=custom\x01"));
    }

    #[test]
    fn test_empty_value_permitted() {
        let mut msg = heartbeat();
        msg.set_field(tags::TEST_REQ_ID, "");
        let wire = msg.serialize().to_vec();
        let text = String::from_utf8(wire).expect("ascii");
        assert!(text.contains("112=\x01"));
    }

    #[test]
    fn test_validate_sendable() {
        let msg = heartbeat();
        assert_eq!(msg.validate_sendable(), Ok(()));

        let mut missing = heartbeat();
        missing.remove_field(tags::SENDING_TIME);
        assert_eq!(missing.validate_sendable(), Err(tags::SENDING_TIME));
    }

    #[test]
    fn test_validate_per_type_required() {
        let mut order = heartbeat();
        order.set_field(tags::MSG_TYPE, "D");
        order.set_field(tags::CL_ORD_ID, "ORD1");
        order.set_field(tags::SYMBOL, "AAPL");
        order.set_field_char(tags::SIDE, '1');
        order.set_field_u64(tags::ORDER_QTY, 100);
        // OrdType (40) missing.
        assert_eq!(order.validate_sendable(), Err(tags::ORD_TYPE));

        order.set_field_char(tags::ORD_TYPE, '2');
        assert_eq!(order.validate_sendable(), Ok(()));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut msg = heartbeat();
        let _ = msg.serialize();
        msg.clear();
        assert_eq!(msg.field_count(), 0);
        assert_eq!(msg.msg_type(), FixMsgType::Unknown);
        assert_eq!(msg.body_length(), 0);
    }

    #[test]
    fn test_decimal_field_formatting() {
        let mut msg = FixMessage::new();
        msg.set_field_f64(tags::PRICE, 101.25, 2);
        assert_eq!(msg.get_field(tags::PRICE), Some("101.25"));
    }
}
