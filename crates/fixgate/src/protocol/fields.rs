// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FIX 4.4 tag numbers, message-type classification, and required-field
//! tables.
//!
//! Only the fields the gateway touches are named; unknown tags flow
//! through untouched.

/// FIX field delimiter (ASCII 0x01).
pub const SOH: u8 = 0x01;

/// The only BeginString this gateway speaks.
pub const BEGIN_STRING: &str = "FIX.4.4";

/// `8=FIX.4.4` including the tag prefix, as raw bytes for framing scans.
pub const BEGIN_STRING_FIELD: &[u8] = b"8=FIX.4.4";

/// Well-known tag numbers.
pub mod tags {
    // --- session header ---
    pub const BEGIN_STRING: u32 = 8;
    pub const BODY_LENGTH: u32 = 9;
    pub const MSG_TYPE: u32 = 35;
    pub const SENDER_COMP_ID: u32 = 49;
    pub const TARGET_COMP_ID: u32 = 56;
    pub const MSG_SEQ_NUM: u32 = 34;
    pub const SENDING_TIME: u32 = 52;

    // --- trailer ---
    pub const CHECK_SUM: u32 = 10;

    // --- hot trading fields ---
    pub const AVG_PX: u32 = 6;
    pub const CL_ORD_ID: u32 = 11;
    pub const CUM_QTY: u32 = 14;
    pub const EXEC_ID: u32 = 17;
    pub const LAST_PX: u32 = 31;
    pub const LAST_QTY: u32 = 32;
    pub const ORDER_ID: u32 = 37;
    pub const ORDER_QTY: u32 = 38;
    pub const ORD_STATUS: u32 = 39;
    pub const ORD_TYPE: u32 = 40;
    pub const PRICE: u32 = 44;
    pub const SIDE: u32 = 54;
    pub const SYMBOL: u32 = 55;
    pub const TIME_IN_FORCE: u32 = 59;
    pub const EXEC_TYPE: u32 = 150;
    pub const LEAVES_QTY: u32 = 151;

    // --- session admin payload ---
    pub const TEST_REQ_ID: u32 = 112;
    pub const HEART_BT_INT: u32 = 108;
}

/// Largest tag number the parser accepts (five ASCII digits).
pub const MAX_TAG: u32 = 99_999;

/// Message type from tag 35, cached on every decoded message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FixMsgType {
    Heartbeat,
    TestRequest,
    ResendRequest,
    Reject,
    SequenceReset,
    Logout,
    Logon,
    NewOrderSingle,
    OrderCancelRequest,
    OrderCancelReject,
    ExecutionReport,
    #[default]
    Unknown,
}

impl FixMsgType {
    /// Classify a raw tag-35 value.
    pub fn from_bytes(value: &[u8]) -> FixMsgType {
        match value {
            b"0" => FixMsgType::Heartbeat,
            b"1" => FixMsgType::TestRequest,
            b"2" => FixMsgType::ResendRequest,
            b"3" => FixMsgType::Reject,
            b"4" => FixMsgType::SequenceReset,
            b"5" => FixMsgType::Logout,
            b"A" => FixMsgType::Logon,
            b"D" => FixMsgType::NewOrderSingle,
            b"F" => FixMsgType::OrderCancelRequest,
            b"9" => FixMsgType::OrderCancelReject,
            b"8" => FixMsgType::ExecutionReport,
            _ => FixMsgType::Unknown,
        }
    }

    /// The wire value for tag 35.
    pub fn as_str(self) -> &'static str {
        match self {
            FixMsgType::Heartbeat => "0",
            FixMsgType::TestRequest => "1",
            FixMsgType::ResendRequest => "2",
            FixMsgType::Reject => "3",
            FixMsgType::SequenceReset => "4",
            FixMsgType::Logout => "5",
            FixMsgType::Logon => "A",
            FixMsgType::NewOrderSingle => "D",
            FixMsgType::OrderCancelRequest => "F",
            FixMsgType::OrderCancelReject => "9",
            FixMsgType::ExecutionReport => "8",
            FixMsgType::Unknown => "?",
        }
    }

    /// Hot types with a specialized decode path.
    pub fn has_fast_path(self) -> bool {
        matches!(
            self,
            FixMsgType::NewOrderSingle | FixMsgType::ExecutionReport | FixMsgType::Heartbeat
        )
    }

    /// Body fields required for this type beyond the session header, or
    /// an empty slice when there are none.
    pub fn required_fields(self) -> &'static [u32] {
        match self {
            FixMsgType::NewOrderSingle => NEW_ORDER_SINGLE_REQUIRED,
            FixMsgType::ExecutionReport => EXECUTION_REPORT_REQUIRED,
            _ => &[],
        }
    }
}

impl std::fmt::Display for FixMsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FixMsgType::Heartbeat => "Heartbeat",
            FixMsgType::TestRequest => "TestRequest",
            FixMsgType::ResendRequest => "ResendRequest",
            FixMsgType::Reject => "Reject",
            FixMsgType::SequenceReset => "SequenceReset",
            FixMsgType::Logout => "Logout",
            FixMsgType::Logon => "Logon",
            FixMsgType::NewOrderSingle => "NewOrderSingle",
            FixMsgType::OrderCancelRequest => "OrderCancelRequest",
            FixMsgType::OrderCancelReject => "OrderCancelReject",
            FixMsgType::ExecutionReport => "ExecutionReport",
            FixMsgType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Body fields a NewOrderSingle must carry: ClOrdID, Symbol, Side,
/// OrderQty, OrdType.
pub const NEW_ORDER_SINGLE_REQUIRED: &[u32] = &[
    tags::CL_ORD_ID,
    tags::SYMBOL,
    tags::SIDE,
    tags::ORDER_QTY,
    tags::ORD_TYPE,
];

/// Body fields an ExecutionReport must carry: OrderID, ExecID, ExecType,
/// OrdStatus, Symbol, Side.
pub const EXECUTION_REPORT_REQUIRED: &[u32] = &[
    tags::ORDER_ID,
    tags::EXEC_ID,
    tags::EXEC_TYPE,
    tags::ORD_STATUS,
    tags::SYMBOL,
    tags::SIDE,
];

/// Header fields any sendable message must carry.
pub const SENDABLE_REQUIRED: &[u32] = &[
    tags::BEGIN_STRING,
    tags::BODY_LENGTH,
    tags::MSG_TYPE,
    tags::SENDER_COMP_ID,
    tags::TARGET_COMP_ID,
    tags::MSG_SEQ_NUM,
    tags::SENDING_TIME,
];
