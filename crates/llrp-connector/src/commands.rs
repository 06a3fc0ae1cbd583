//! Outbound LLRP request builders.
//!
//! Each function returns a complete, framed message ready to hand to a
//! [`Transport`](llrp_core::Transport). Like the response decoders in
//! [`crate::messages`], everything here is pure.

use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::frame::encode_message;
use crate::messages::MessageType;
use crate::params::{put_tlv, tlv};
use crate::rospec::RoSpec;

// Reader event types enabled through EventNotificationState.
const EVENT_ROSPEC: u16 = 2;
const EVENT_AISPEC: u16 = 6;

const ROREPORT_TRIGGER_N_TAGS_OR_END_OF_ROSPEC: u8 = 2;
const KEEPALIVE_TRIGGER_PERIODIC: u8 = 1;

// TagReportContentSelector flag bits.
const SELECT_ROSPEC_ID: u16 = 1 << 15;
const SELECT_SPEC_INDEX: u16 = 1 << 14;
const SELECT_ANTENNA_ID: u16 = 1 << 12;
const SELECT_CHANNEL_INDEX: u16 = 1 << 11;
const SELECT_PEAK_RSSI: u16 = 1 << 10;
const SELECT_FIRST_SEEN: u16 = 1 << 9;
const SELECT_LAST_SEEN: u16 = 1 << 8;
const SELECT_TAG_SEEN_COUNT: u16 = 1 << 7;
const SELECT_ACCESS_SPEC_ID: u16 = 1 << 6;

/// Fields requested in every tag report.
pub const TAG_CONTENT_SELECTOR: u16 = SELECT_ROSPEC_ID
    | SELECT_SPEC_INDEX
    | SELECT_ANTENNA_ID
    | SELECT_CHANNEL_INDEX
    | SELECT_PEAK_RSSI
    | SELECT_FIRST_SEEN
    | SELECT_LAST_SEEN
    | SELECT_TAG_SEEN_COUNT
    | SELECT_ACCESS_SPEC_ID;

/// Settings pushed by `SET_READER_CONFIG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfigSpec {
    /// Period of reader-originated keepalives.
    pub keepalive_period: Duration,
    /// Report after this many tags (or at the end of the ROSpec).
    pub report_every_n_tags: u16,
}

impl Default for ReaderConfigSpec {
    fn default() -> Self {
        Self {
            keepalive_period: Duration::from_secs(5),
            report_every_n_tags: 1,
        }
    }
}

pub fn get_reader_capabilities(message_id: u32) -> Vec<u8> {
    // RequestedData 0 = all.
    encode_message(MessageType::GetReaderCapabilities.as_u16(), message_id, &[0])
}

/// `GET_READER_CONFIG` for all antennas, all data, no GPI/GPO filter.
pub fn get_reader_config(message_id: u32) -> Vec<u8> {
    let mut b = BytesMut::with_capacity(7);
    b.put_u16(0);
    b.put_u8(0);
    b.put_u16(0);
    b.put_u16(0);
    encode_message(MessageType::GetReaderConfig.as_u16(), message_id, &b)
}

/// `SET_READER_CONFIG` enabling ROSpec and AISpec events, the report
/// trigger and content selector, periodic keepalives, and holding events
/// and reports until `ENABLE_EVENTS_AND_REPORTS`.
pub fn set_reader_config(message_id: u32, spec: &ReaderConfigSpec) -> Vec<u8> {
    let period_ms = u32::try_from(spec.keepalive_period.as_millis()).unwrap_or(u32::MAX);

    let mut b = BytesMut::new();
    // ResetToFactoryDefault = false.
    b.put_u8(0);

    put_tlv(&mut b, tlv::READER_EVENT_NOTIFICATION_SPEC, |b| {
        for event in [EVENT_ROSPEC, EVENT_AISPEC] {
            put_tlv(b, tlv::EVENT_NOTIFICATION_STATE, |b| {
                b.put_u16(event);
                b.put_u8(0x80);
            });
        }
    });

    put_tlv(&mut b, tlv::RO_REPORT_SPEC, |b| {
        b.put_u8(ROREPORT_TRIGGER_N_TAGS_OR_END_OF_ROSPEC);
        b.put_u16(spec.report_every_n_tags);
        put_tlv(b, tlv::TAG_REPORT_CONTENT_SELECTOR, |b| {
            b.put_u16(TAG_CONTENT_SELECTOR)
        });
    });

    put_tlv(&mut b, tlv::KEEPALIVE_SPEC, |b| {
        b.put_u8(KEEPALIVE_TRIGGER_PERIODIC);
        b.put_u32(period_ms);
    });

    put_tlv(&mut b, tlv::EVENTS_AND_REPORTS, |b| b.put_u8(0x80));

    encode_message(MessageType::SetReaderConfig.as_u16(), message_id, &b)
}

pub fn add_rospec(message_id: u32, rospec: &RoSpec) -> Vec<u8> {
    let mut b = BytesMut::new();
    rospec.encode(&mut b);
    encode_message(MessageType::AddRoSpec.as_u16(), message_id, &b)
}

fn rospec_id_message(message_type: MessageType, message_id: u32, rospec_id: u32) -> Vec<u8> {
    encode_message(message_type.as_u16(), message_id, &rospec_id.to_be_bytes())
}

pub fn enable_rospec(message_id: u32, rospec_id: u32) -> Vec<u8> {
    rospec_id_message(MessageType::EnableRoSpec, message_id, rospec_id)
}

pub fn disable_rospec(message_id: u32, rospec_id: u32) -> Vec<u8> {
    rospec_id_message(MessageType::DisableRoSpec, message_id, rospec_id)
}

pub fn stop_rospec(message_id: u32, rospec_id: u32) -> Vec<u8> {
    rospec_id_message(MessageType::StopRoSpec, message_id, rospec_id)
}

pub fn delete_rospec(message_id: u32, rospec_id: u32) -> Vec<u8> {
    rospec_id_message(MessageType::DeleteRoSpec, message_id, rospec_id)
}

pub fn enable_events_and_reports(message_id: u32) -> Vec<u8> {
    encode_message(MessageType::EnableEventsAndReports.as_u16(), message_id, &[])
}

/// Acknowledge a keepalive; the ack carries the keepalive's own id.
pub fn keepalive_ack(keepalive_id: u32) -> Vec<u8> {
    encode_message(MessageType::KeepaliveAck.as_u16(), keepalive_id, &[])
}

pub fn close_connection(message_id: u32) -> Vec<u8> {
    encode_message(MessageType::CloseConnection.as_u16(), message_id, &[])
}
