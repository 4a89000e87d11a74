// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound FIX message construction.
//!
//! A [`FixMessageBuilder`] stamps the standard header (sender/target comp
//! IDs, auto-incremented MsgSeqNum, SendingTime), validates required
//! fields, and serializes through [`FixMessage`]. Typed constructors cover
//! the hot outbound types; anything else goes through
//! [`build`](FixMessageBuilder::build) with a caller-assembled message.
//!
//! The builder owns one session's sequence counter and is therefore used
//! from one thread at a time, matching the one-session-per-connection
//! data plane.

use super::fields::{tags, FixMsgType};
use super::message::FixMessage;
use crate::clock;

/// Builder behavior switches.
#[derive(Clone, Debug)]
pub struct BuilderConfig {
    /// Stamp MsgSeqNum(34) from the internal counter. Default: true.
    pub auto_sequence: bool,

    /// Stamp SendingTime(52) with the current UTC time. Default: true.
    pub auto_timestamp: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            auto_sequence: true,
            auto_timestamp: true,
        }
    }
}

/// Build counters (plain integers; the builder is single-threaded).
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_build_nanos: u64,
    pub last_build_nanos: u64,
}

impl BuildStats {
    pub fn average_build_nanos(&self) -> u64 {
        if self.successes == 0 {
            0
        } else {
            self.total_build_nanos / self.successes
        }
    }
}

/// Outbound message builder for one FIX session.
pub struct FixMessageBuilder {
    sender_comp_id: String,
    target_comp_id: String,
    next_seq: u64,
    config: BuilderConfig,
    stats: BuildStats,
}

impl FixMessageBuilder {
    pub fn new(sender_comp_id: impl Into<String>, target_comp_id: impl Into<String>) -> Self {
        Self {
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            next_seq: 1,
            config: BuilderConfig::default(),
            stats: BuildStats::default(),
        }
    }

    pub fn with_config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    /// Next MsgSeqNum the builder will stamp.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Override the sequence counter (session resume).
    pub fn set_next_seq(&mut self, seq: u64) {
        self.next_seq = seq;
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = BuildStats::default();
    }

    // ========================================================================
    // Generic build
    // ========================================================================

    /// Stamp the standard header onto `msg`, validate, and serialize.
    ///
    /// On validation failure the first missing tag is returned, the
    /// sequence counter is not consumed, and the failure is counted.
    pub fn build(&mut self, msg: &mut FixMessage) -> Result<Vec<u8>, u32> {
        let start = clock::now_nanos();
        self.stats.attempts += 1;

        self.stamp_header(msg);

        if let Err(missing) = msg.validate_sendable() {
            self.stats.failures += 1;
            return Err(missing);
        }

        let wire = msg.serialize().to_vec();
        self.next_seq += 1;

        let elapsed = clock::now_nanos().saturating_sub(start);
        self.stats.successes += 1;
        self.stats.total_build_nanos += elapsed;
        self.stats.last_build_nanos = elapsed;

        Ok(wire)
    }

    fn stamp_header(&self, msg: &mut FixMessage) {
        msg.set_field(tags::SENDER_COMP_ID, self.sender_comp_id.as_str());
        msg.set_field(tags::TARGET_COMP_ID, self.target_comp_id.as_str());
        if self.config.auto_sequence || !msg.has_field(tags::MSG_SEQ_NUM) {
            msg.set_field_u64(tags::MSG_SEQ_NUM, self.next_seq);
        }
        if self.config.auto_timestamp || !msg.has_field(tags::SENDING_TIME) {
            msg.set_field(tags::SENDING_TIME, utc_sending_time());
        }
    }

    // ========================================================================
    // Typed constructors
    // ========================================================================

    /// Heartbeat, optionally answering a TestRequest.
    pub fn heartbeat(&mut self, test_req_id: Option<&str>) -> Result<Vec<u8>, u32> {
        let mut msg = FixMessage::with_field_capacity(8);
        msg.set_field(tags::MSG_TYPE, FixMsgType::Heartbeat.as_str());
        if let Some(id) = test_req_id {
            msg.set_field(tags::TEST_REQ_ID, id);
        }
        self.build(&mut msg)
    }

    /// NewOrderSingle. `price` is mandatory for limit orders ('2').
    #[allow(clippy::too_many_arguments)]
    pub fn new_order_single(
        &mut self,
        cl_ord_id: &str,
        symbol: &str,
        side: char,
        quantity: f64,
        ord_type: char,
        price: Option<f64>,
        time_in_force: Option<char>,
    ) -> Result<Vec<u8>, u32> {
        let mut msg = FixMessage::with_field_capacity(16);
        msg.set_field(tags::MSG_TYPE, FixMsgType::NewOrderSingle.as_str());
        msg.set_field(tags::CL_ORD_ID, cl_ord_id);
        msg.set_field(tags::SYMBOL, symbol);
        msg.set_field_char(tags::SIDE, side);
        msg.set_field_f64(tags::ORDER_QTY, quantity, 0);
        msg.set_field_char(tags::ORD_TYPE, ord_type);
        if let Some(price) = price {
            msg.set_field_f64(tags::PRICE, price, 2);
        }
        if let Some(tif) = time_in_force {
            msg.set_field_char(tags::TIME_IN_FORCE, tif);
        }
        self.build(&mut msg)
    }

    /// ExecutionReport for a fill or status change.
    #[allow(clippy::too_many_arguments)]
    pub fn execution_report(
        &mut self,
        order_id: &str,
        exec_id: &str,
        exec_type: char,
        ord_status: char,
        symbol: &str,
        side: char,
        last_qty: f64,
        last_px: f64,
    ) -> Result<Vec<u8>, u32> {
        let mut msg = FixMessage::with_field_capacity(16);
        msg.set_field(tags::MSG_TYPE, FixMsgType::ExecutionReport.as_str());
        msg.set_field(tags::ORDER_ID, order_id);
        msg.set_field(tags::EXEC_ID, exec_id);
        msg.set_field_char(tags::EXEC_TYPE, exec_type);
        msg.set_field_char(tags::ORD_STATUS, ord_status);
        msg.set_field(tags::SYMBOL, symbol);
        msg.set_field_char(tags::SIDE, side);
        msg.set_field_f64(tags::LAST_QTY, last_qty, 0);
        msg.set_field_f64(tags::LAST_PX, last_px, 2);
        self.build(&mut msg)
    }

    /// OrderCancelRequest referencing the original ClOrdID.
    pub fn order_cancel_request(
        &mut self,
        cl_ord_id: &str,
        orig_cl_ord_id: &str,
        symbol: &str,
        side: char,
    ) -> Result<Vec<u8>, u32> {
        /// OrigClOrdID.
        const ORIG_CL_ORD_ID: u32 = 41;

        let mut msg = FixMessage::with_field_capacity(12);
        msg.set_field(tags::MSG_TYPE, FixMsgType::OrderCancelRequest.as_str());
        msg.set_field(tags::CL_ORD_ID, cl_ord_id);
        msg.set_field(ORIG_CL_ORD_ID, orig_cl_ord_id);
        msg.set_field(tags::SYMBOL, symbol);
        msg.set_field_char(tags::SIDE, side);
        self.build(&mut msg)
    }
}

/// Current UTC time as a FIX SendingTime: `YYYYMMDD-HH:MM:SS`.
pub fn utc_sending_time() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_sending_time(now.as_secs())
}

/// Format seconds-since-epoch as `YYYYMMDD-HH:MM:SS` (UTC).
fn format_sending_time(epoch_secs: u64) -> String {
    let days = epoch_secs / 86_400;
    let secs_of_day = epoch_secs % 86_400;

    let (year, month, day) = days_to_date(days);

    format!(
        "{:04}{:02}{:02}-{:02}:{:02}:{:02}",
        year,
        month,
        day,
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60
    )
}

/// Convert days since the Unix epoch to a calendar date.
fn days_to_date(days: u64) -> (u32, u32, u32) {
    let mut year: u32 = 1970;
    let mut remaining = days;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining < days_in_year {
            break;
        }
        remaining -= days_in_year;
        year += 1;
    }

    let days_per_month: [u64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month: u32 = 1;
    for &days_in_month in &days_per_month {
        if remaining < days_in_month {
            break;
        }
        remaining -= days_in_month;
        month += 1;
    }

    (year, month, remaining as u32 + 1)
}

fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::mod256;

    fn builder() -> FixMessageBuilder {
        FixMessageBuilder::new("SENDER", "TARGET")
    }

    #[test]
    fn test_heartbeat_has_header_and_trailer() {
        let wire = builder().heartbeat(None).expect("heartbeat should build");
        let text = String::from_utf8(wire.clone()).expect("ascii");

        assert!(text.starts_with("8=FIX.4.4\x019="));
        assert!(text.contains("35=0\x01"));
        assert!(text.contains("49=SENDER\x01"));
        assert!(text.contains("56=TARGET\x01"));
        assert!(text.contains("34=1\x01"));
        assert!(text.contains("52="));

        let prefix_end = wire.len() - 7;
        let expected = mod256(&wire[..prefix_end]);
        let digits = &text[text.len() - 4..text.len() - 1];
        assert_eq!(digits.parse::<u16>().expect("digits"), u16::from(expected));
    }

    #[test]
    fn test_sequence_increments_per_build() {
        let mut b = builder();
        let first = b.heartbeat(None).expect("build");
        let second = b.heartbeat(None).expect("build");

        assert!(String::from_utf8(first).expect("ascii").contains("34=1\x01"));
        assert!(String::from_utf8(second).expect("ascii").contains("34=2\x01"));
        assert_eq!(b.next_seq(), 3);
    }

    #[test]
    fn test_validation_failure_keeps_sequence() {
        let mut b = builder();
        let mut incomplete = FixMessage::new();
        incomplete.set_field(tags::MSG_TYPE, "D");
        incomplete.set_field(tags::CL_ORD_ID, "X");
        // Symbol missing.
        assert_eq!(b.build(&mut incomplete), Err(tags::SYMBOL));
        assert_eq!(b.next_seq(), 1);
        assert_eq!(b.stats().failures, 1);
        assert_eq!(b.stats().successes, 0);
    }

    #[test]
    fn test_new_order_single_fields() {
        let wire = builder()
            .new_order_single("ORD-1", "AAPL", '1', 100.0, '2', Some(187.45), Some('0'))
            .expect("order should build");
        let text = String::from_utf8(wire).expect("ascii");

        assert!(text.contains("35=D\x01"));
        assert!(text.contains("11=ORD-1\x01"));
        assert!(text.contains("55=AAPL\x01"));
        assert!(text.contains("54=1\x01"));
        assert!(text.contains("38=100\x01"));
        assert!(text.contains("40=2\x01"));
        assert!(text.contains("44=187.45\x01"));
        assert!(text.contains("59=0\x01"));
    }

    #[test]
    fn test_execution_report_fields() {
        let wire = builder()
            .execution_report("OID-9", "EXEC-3", 'F', '2', "MSFT", '2', 50.0, 412.10)
            .expect("report should build");
        let text = String::from_utf8(wire).expect("ascii");

        assert!(text.contains("35=8\x01"));
        assert!(text.contains("37=OID-9\x01"));
        assert!(text.contains("17=EXEC-3\x01"));
        assert!(text.contains("150=F\x01"));
        assert!(text.contains("39=2\x01"));
        assert!(text.contains("32=50\x01"));
        assert!(text.contains("31=412.10\x01"));
    }

    #[test]
    fn test_order_cancel_request_fields() {
        let wire = builder()
            .order_cancel_request("C-2", "ORD-1", "AAPL", '1')
            .expect("cancel should build");
        let text = String::from_utf8(wire).expect("ascii");

        assert!(text.contains("35=F\x01"));
        assert!(text.contains("11=C-2\x01"));
        assert!(text.contains("41=ORD-1\x01"));
    }

    #[test]
    fn test_build_stats_timing() {
        let mut b = builder();
        b.heartbeat(None).expect("build");
        b.heartbeat(None).expect("build");

        let stats = b.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.successes, 2);
        assert!(stats.total_build_nanos >= stats.last_build_nanos);
        assert!(stats.average_build_nanos() <= stats.total_build_nanos);
    }

    #[test]
    fn test_sending_time_format() {
        // 2023-12-01 12:00:00 UTC
        assert_eq!(format_sending_time(1_701_432_000), "20231201-12:00:00");
        // Epoch.
        assert_eq!(format_sending_time(0), "19700101-00:00:00");
        // Leap-year day: 2024-02-29 23:59:59 UTC.
        assert_eq!(format_sending_time(1_709_251_199), "20240229-23:59:59");
    }

    #[test]
    fn test_manual_sequence_mode() {
        let mut b = builder().with_config(BuilderConfig {
            auto_sequence: false,
            auto_timestamp: true,
        });
        let mut msg = FixMessage::new();
        msg.set_field(tags::MSG_TYPE, "0");
        msg.set_field_u64(tags::MSG_SEQ_NUM, 777);
        let wire = b.build(&mut msg).expect("build");
        assert!(String::from_utf8(wire)
            .expect("ascii")
            .contains("34=777\x01"));
    }
}
