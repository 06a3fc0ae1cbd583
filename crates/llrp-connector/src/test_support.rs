//! Reader-side message builders shared by the unit tests.

use bytes::{BufMut, BytesMut};

use crate::frame::encode_message;
use crate::messages::{LlrpMessage, MessageType};
use crate::params::{put_status, put_tlv, tlv, tv};

pub fn decode(bytes: &[u8]) -> LlrpMessage {
    LlrpMessage::decode(&bytes::Bytes::copy_from_slice(bytes)).unwrap()
}

/// `READER_EVENT_NOTIFICATION` carrying a `ConnectionAttemptEvent`.
pub fn connection_attempt(status: u16) -> Vec<u8> {
    let mut b = BytesMut::new();
    put_tlv(&mut b, tlv::READER_EVENT_NOTIFICATION_DATA, |b| {
        put_tlv(b, tlv::UTC_TIMESTAMP, |b| b.put_u64(1_700_000_000_000_000));
        put_tlv(b, tlv::CONNECTION_ATTEMPT_EVENT, |b| b.put_u16(status));
    });
    encode_message(MessageType::ReaderEventNotification.as_u16(), 0, &b)
}

/// `READER_EVENT_NOTIFICATION` carrying a `ROSpecEvent` (start).
pub fn rospec_started(rospec_id: u32) -> Vec<u8> {
    let mut b = BytesMut::new();
    put_tlv(&mut b, tlv::READER_EVENT_NOTIFICATION_DATA, |b| {
        put_tlv(b, tlv::UTC_TIMESTAMP, |b| b.put_u64(1_700_000_000_000_001));
        put_tlv(b, tlv::RO_SPEC_EVENT, |b| {
            b.put_u8(0);
            b.put_u32(rospec_id);
            b.put_u32(0);
        });
    });
    encode_message(MessageType::ReaderEventNotification.as_u16(), 0, &b)
}

/// Any response that carries only an `LLRPStatus`.
pub fn status_response(message_type: MessageType, code: u16) -> Vec<u8> {
    let mut b = BytesMut::new();
    let desc = if code == 0 { "" } else { "rejected by test reader" };
    put_status(&mut b, code, desc);
    encode_message(message_type.as_u16(), 0, &b)
}

pub fn capabilities_response() -> Vec<u8> {
    let mut b = BytesMut::new();
    put_status(&mut b, 0, "");
    put_tlv(&mut b, tlv::GENERAL_DEVICE_CAPABILITIES, |b| {
        b.put_u16(4);
        b.put_u16(0x4000);
        b.put_u32(25882);
        b.put_u32(2001002);
        b.put_u16(5);
        b.put_slice(b"7.1.0");
    });
    encode_message(MessageType::GetReaderCapabilitiesResponse.as_u16(), 0, &b)
}

/// `GET_READER_CONFIG_RESPONSE` with an optional MAC identification and
/// one `AntennaProperties` per antenna.
pub fn config_response(mac: Option<&[u8]>, antennas: &[u16]) -> Vec<u8> {
    let mut b = BytesMut::new();
    put_status(&mut b, 0, "");
    if let Some(mac) = mac {
        put_tlv(&mut b, tlv::IDENTIFICATION, |b| {
            b.put_u8(0);
            b.put_u16(mac.len() as u16);
            b.put_slice(mac);
        });
    }
    for &id in antennas {
        put_tlv(&mut b, tlv::ANTENNA_PROPERTIES, |b| {
            b.put_u8(0x80);
            b.put_u16(id);
            b.put_i16(0);
        });
    }
    encode_message(MessageType::GetReaderConfigResponse.as_u16(), 0, &b)
}

pub fn keepalive(message_id: u32) -> Vec<u8> {
    encode_message(MessageType::Keepalive.as_u16(), message_id, &[])
}

/// `RO_ACCESS_REPORT` with one EPC-96 or EPCData record per hex EPC.
pub fn access_report(message_id: u32, epcs: &[&str]) -> Vec<u8> {
    let mut b = BytesMut::new();
    for epc in epcs {
        let bytes: Vec<u8> = (0..epc.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&epc[i..i + 2], 16).unwrap())
            .collect();
        put_tlv(&mut b, tlv::TAG_REPORT_DATA, |b| {
            if bytes.len() == 12 {
                b.put_u8(0x80 | tv::EPC_96);
                b.put_slice(&bytes);
            } else {
                put_tlv(b, tlv::EPC_DATA, |b| {
                    b.put_u16((bytes.len() * 8) as u16);
                    b.put_slice(&bytes);
                });
            }
            b.put_u8(0x80 | tv::ANTENNA_ID);
            b.put_u16(1);
            b.put_u8(0x80 | tv::PEAK_RSSI);
            b.put_i8(-55);
            b.put_u8(0x80 | tv::TAG_SEEN_COUNT);
            b.put_u16(1);
        });
    }
    encode_message(MessageType::RoAccessReport.as_u16(), message_id, &b)
}

pub fn close_connection_response() -> Vec<u8> {
    status_response(MessageType::CloseConnectionResponse, 0)
}

/// Responses for a clean setup, in the order the sequence asks for them.
pub fn happy_setup_script() -> Vec<Vec<u8>> {
    vec![
        connection_attempt(0),
        capabilities_response(),
        status_response(MessageType::SetReaderConfigResponse, 0),
        config_response(Some(&[0x00, 0x16, 0x25, 0x12, 0x34, 0xAB]), &[1, 2]),
        status_response(MessageType::AddRoSpecResponse, 0),
        status_response(MessageType::EnableRoSpecResponse, 0),
    ]
}
