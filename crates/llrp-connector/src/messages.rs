//! Inbound LLRP message decoding.
//!
//! [`LlrpMessage::decode`] turns one complete frame from the
//! [`FrameDecoder`](crate::frame::FrameDecoder) into a typed message. Only
//! the message types this connector reacts to are decoded in detail; every
//! other type decodes to [`MessageBody::Other`] so the stream keeps flowing.

use std::fmt;

use bytes::Bytes;

use llrp_core::error::{Error, Result};
use llrp_core::events::TagReport;

use crate::frame::{HEADER_LEN, header_length, header_message_type};
use crate::params::{
    self, LlrpStatus, read_u8, read_u16, read_u32, read_u64, read_utf8, tlv, to_hex, tv,
};

/// LLRP message types used by this connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    GetReaderCapabilities = 1,
    GetReaderConfig = 2,
    SetReaderConfig = 3,
    CloseConnectionResponse = 4,
    GetReaderCapabilitiesResponse = 11,
    GetReaderConfigResponse = 12,
    SetReaderConfigResponse = 13,
    CloseConnection = 14,
    AddRoSpec = 20,
    DeleteRoSpec = 21,
    StartRoSpec = 22,
    StopRoSpec = 23,
    EnableRoSpec = 24,
    DisableRoSpec = 25,
    AddRoSpecResponse = 30,
    DeleteRoSpecResponse = 31,
    StartRoSpecResponse = 32,
    StopRoSpecResponse = 33,
    EnableRoSpecResponse = 34,
    DisableRoSpecResponse = 35,
    RoAccessReport = 61,
    Keepalive = 62,
    ReaderEventNotification = 63,
    EnableEventsAndReports = 64,
    KeepaliveAck = 72,
    ErrorMessage = 100,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        use MessageType::*;
        Some(match value {
            1 => GetReaderCapabilities,
            2 => GetReaderConfig,
            3 => SetReaderConfig,
            4 => CloseConnectionResponse,
            11 => GetReaderCapabilitiesResponse,
            12 => GetReaderConfigResponse,
            13 => SetReaderConfigResponse,
            14 => CloseConnection,
            20 => AddRoSpec,
            21 => DeleteRoSpec,
            22 => StartRoSpec,
            23 => StopRoSpec,
            24 => EnableRoSpec,
            25 => DisableRoSpec,
            30 => AddRoSpecResponse,
            31 => DeleteRoSpecResponse,
            32 => StartRoSpecResponse,
            33 => StopRoSpecResponse,
            34 => EnableRoSpecResponse,
            35 => DisableRoSpecResponse,
            61 => RoAccessReport,
            62 => Keepalive,
            63 => ReaderEventNotification,
            64 => EnableEventsAndReports,
            72 => KeepaliveAck,
            100 => ErrorMessage,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// The standard LLRP name of the message type.
    pub fn name(self) -> &'static str {
        use MessageType::*;
        match self {
            GetReaderCapabilities => "GET_READER_CAPABILITIES",
            GetReaderConfig => "GET_READER_CONFIG",
            SetReaderConfig => "SET_READER_CONFIG",
            CloseConnectionResponse => "CLOSE_CONNECTION_RESPONSE",
            GetReaderCapabilitiesResponse => "GET_READER_CAPABILITIES_RESPONSE",
            GetReaderConfigResponse => "GET_READER_CONFIG_RESPONSE",
            SetReaderConfigResponse => "SET_READER_CONFIG_RESPONSE",
            CloseConnection => "CLOSE_CONNECTION",
            AddRoSpec => "ADD_ROSPEC",
            DeleteRoSpec => "DELETE_ROSPEC",
            StartRoSpec => "START_ROSPEC",
            StopRoSpec => "STOP_ROSPEC",
            EnableRoSpec => "ENABLE_ROSPEC",
            DisableRoSpec => "DISABLE_ROSPEC",
            AddRoSpecResponse => "ADD_ROSPEC_RESPONSE",
            DeleteRoSpecResponse => "DELETE_ROSPEC_RESPONSE",
            StartRoSpecResponse => "START_ROSPEC_RESPONSE",
            StopRoSpecResponse => "STOP_ROSPEC_RESPONSE",
            EnableRoSpecResponse => "ENABLE_ROSPEC_RESPONSE",
            DisableRoSpecResponse => "DISABLE_ROSPEC_RESPONSE",
            RoAccessReport => "RO_ACCESS_REPORT",
            Keepalive => "KEEPALIVE",
            ReaderEventNotification => "READER_EVENT_NOTIFICATION",
            EnableEventsAndReports => "ENABLE_EVENTS_AND_REPORTS",
            KeepaliveAck => "KEEPALIVE_ACK",
            ErrorMessage => "ERROR_MESSAGE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Message bodies
// ---------------------------------------------------------------------------

/// Status carried by a `ConnectionAttemptEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAttemptStatus {
    Success,
    ReaderInitiatedConnectionExists,
    ClientInitiatedConnectionExists,
    OtherFailure,
    AnotherConnectionAttempted,
    Unknown(u16),
}

impl ConnectionAttemptStatus {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::ReaderInitiatedConnectionExists,
            2 => Self::ClientInitiatedConnectionExists,
            3 => Self::OtherFailure,
            4 => Self::AnotherConnectionAttempted,
            other => Self::Unknown(other),
        }
    }

    /// Raw status value as carried on the wire.
    pub fn code(self) -> u16 {
        match self {
            Self::Success => 0,
            Self::ReaderInitiatedConnectionExists => 1,
            Self::ClientInitiatedConnectionExists => 2,
            Self::OtherFailure => 3,
            Self::AnotherConnectionAttempted => 4,
            Self::Unknown(other) => other,
        }
    }
}

/// Kind of `ROSpecEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoSpecEventKind {
    Started,
    Ended,
    Preempted,
    Unknown(u8),
}

/// A `ROSpecEvent` from a reader event notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoSpecEvent {
    pub kind: RoSpecEventKind,
    pub rospec_id: u32,
    pub preempting_rospec_id: u32,
}

/// An `AISpecEvent`; the only defined kind is "end of AISpec".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiSpecEvent {
    pub rospec_id: u32,
    pub spec_index: u16,
}

/// An `AntennaEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntennaEvent {
    pub connected: bool,
    pub antenna_id: u16,
}

/// Decoded `ReaderEventNotificationData`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderEventNotification {
    /// UTC microseconds, or reader uptime microseconds if it has no clock.
    pub timestamp: Option<u64>,
    pub connection_attempt: Option<ConnectionAttemptStatus>,
    pub connection_closed: bool,
    pub rospec_event: Option<RoSpecEvent>,
    pub aispec_event: Option<AiSpecEvent>,
    pub antenna_event: Option<AntennaEvent>,
    pub reader_exception: Option<String>,
    pub buffer_fill_warning: Option<u8>,
    pub buffer_overflow: bool,
}

/// Informational capabilities from `GET_READER_CAPABILITIES_RESPONSE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderCapabilities {
    pub max_antennas: u16,
    pub can_set_antenna_properties: bool,
    pub has_utc_clock: bool,
    pub manufacturer: u32,
    pub model: u32,
    pub firmware_version: String,
}

/// Applied reader configuration from `GET_READER_CONFIG_RESPONSE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Reader identification as uppercase hex (MAC or EPC).
    pub reader_id: Option<String>,
    pub antenna_ids: Vec<u16>,
    /// Keepalive period in milliseconds, if periodic keepalives are enabled.
    pub keepalive_period_ms: Option<u32>,
}

/// Body of a decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    ReaderEventNotification(ReaderEventNotification),
    GetReaderCapabilitiesResponse {
        status: LlrpStatus,
        capabilities: Option<ReaderCapabilities>,
    },
    GetReaderConfigResponse {
        status: LlrpStatus,
        config: ReaderConfig,
    },
    /// Any response whose only interesting content is its status:
    /// SET_READER_CONFIG, the ROSpec responses, CLOSE_CONNECTION.
    Status(LlrpStatus),
    ErrorMessage(LlrpStatus),
    Keepalive,
    RoAccessReport(Vec<TagReport>),
    /// A message type this connector does not interpret.
    Other,
}

/// One decoded LLRP message.
#[derive(Debug, Clone, PartialEq)]
pub struct LlrpMessage {
    /// Raw 10-bit message type.
    pub message_type: u16,
    pub message_id: u32,
    pub body: MessageBody,
}

impl LlrpMessage {
    /// Decode a complete frame (header included).
    pub fn decode(frame: &Bytes) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "message of {} bytes is shorter than the header",
                frame.len()
            )));
        }
        let declared = header_length(frame) as usize;
        if declared != frame.len() {
            return Err(Error::Protocol(format!(
                "message length field {} does not match frame size {}",
                declared,
                frame.len()
            )));
        }

        let message_type = header_message_type(frame);
        let message_id = u32::from_be_bytes([frame[6], frame[7], frame[8], frame[9]]);
        let body = &frame[HEADER_LEN..];

        let body = match MessageType::from_u16(message_type) {
            Some(MessageType::ReaderEventNotification) => {
                MessageBody::ReaderEventNotification(decode_reader_event_notification(body)?)
            }
            Some(MessageType::GetReaderCapabilitiesResponse) => {
                let (status, capabilities) = decode_capabilities_response(body)?;
                MessageBody::GetReaderCapabilitiesResponse {
                    status,
                    capabilities,
                }
            }
            Some(MessageType::GetReaderConfigResponse) => {
                let (status, config) = decode_config_response(body)?;
                MessageBody::GetReaderConfigResponse { status, config }
            }
            Some(
                MessageType::SetReaderConfigResponse
                | MessageType::AddRoSpecResponse
                | MessageType::DeleteRoSpecResponse
                | MessageType::StartRoSpecResponse
                | MessageType::StopRoSpecResponse
                | MessageType::EnableRoSpecResponse
                | MessageType::DisableRoSpecResponse
                | MessageType::CloseConnectionResponse,
            ) => MessageBody::Status(LlrpStatus::find(body)?),
            Some(MessageType::ErrorMessage) => MessageBody::ErrorMessage(LlrpStatus::find(body)?),
            Some(MessageType::Keepalive) => MessageBody::Keepalive,
            Some(MessageType::RoAccessReport) => {
                MessageBody::RoAccessReport(decode_access_report(body)?)
            }
            _ => MessageBody::Other,
        };

        Ok(Self {
            message_type,
            message_id,
            body,
        })
    }

    /// The known message type, if this connector recognises it.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u16(self.message_type)
    }

    /// Human-readable type name for logs.
    pub fn name(&self) -> String {
        match self.kind() {
            Some(t) => t.name().to_string(),
            None => format!("MESSAGE_TYPE_{}", self.message_type),
        }
    }

    /// The response status, for message types that carry one.
    pub fn status(&self) -> Option<&LlrpStatus> {
        match &self.body {
            MessageBody::Status(s) | MessageBody::ErrorMessage(s) => Some(s),
            MessageBody::GetReaderCapabilitiesResponse { status, .. }
            | MessageBody::GetReaderConfigResponse { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Tag records if this is an access report.
    pub fn tags(&self) -> Option<&[TagReport]> {
        match &self.body {
            MessageBody::RoAccessReport(tags) => Some(tags),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Body decoders
// ---------------------------------------------------------------------------

fn decode_reader_event_notification(body: &[u8]) -> Result<ReaderEventNotification> {
    let mut out = ReaderEventNotification::default();
    for p in params::params(body) {
        let p = p?;
        if !p.is_tlv(tlv::READER_EVENT_NOTIFICATION_DATA) {
            continue;
        }
        for e in params::params(p.value) {
            let e = e?;
            let mut v = e.value;
            match e.kind {
                params::ParamKind::Tlv(tlv::UTC_TIMESTAMP) | params::ParamKind::Tlv(tlv::UPTIME) => {
                    out.timestamp = Some(read_u64(&mut v, "timestamp")?);
                }
                params::ParamKind::Tlv(tlv::CONNECTION_ATTEMPT_EVENT) => {
                    let status = read_u16(&mut v, "ConnectionAttemptEvent")?;
                    out.connection_attempt = Some(ConnectionAttemptStatus::from_u16(status));
                }
                params::ParamKind::Tlv(tlv::CONNECTION_CLOSE_EVENT) => {
                    out.connection_closed = true;
                }
                params::ParamKind::Tlv(tlv::RO_SPEC_EVENT) => {
                    let kind = match read_u8(&mut v, "ROSpecEvent")? {
                        0 => RoSpecEventKind::Started,
                        1 => RoSpecEventKind::Ended,
                        2 => RoSpecEventKind::Preempted,
                        other => RoSpecEventKind::Unknown(other),
                    };
                    out.rospec_event = Some(RoSpecEvent {
                        kind,
                        rospec_id: read_u32(&mut v, "ROSpecEvent")?,
                        preempting_rospec_id: read_u32(&mut v, "ROSpecEvent")?,
                    });
                }
                params::ParamKind::Tlv(tlv::AI_SPEC_EVENT) => {
                    let _kind = read_u8(&mut v, "AISpecEvent")?;
                    out.aispec_event = Some(AiSpecEvent {
                        rospec_id: read_u32(&mut v, "AISpecEvent")?,
                        spec_index: read_u16(&mut v, "AISpecEvent")?,
                    });
                }
                params::ParamKind::Tlv(tlv::ANTENNA_EVENT) => {
                    let kind = read_u8(&mut v, "AntennaEvent")?;
                    out.antenna_event = Some(AntennaEvent {
                        connected: kind == 1,
                        antenna_id: read_u16(&mut v, "AntennaEvent")?,
                    });
                }
                params::ParamKind::Tlv(tlv::READER_EXCEPTION_EVENT) => {
                    out.reader_exception = Some(read_utf8(&mut v, "ReaderExceptionEvent")?);
                }
                params::ParamKind::Tlv(tlv::REPORT_BUFFER_LEVEL_WARNING_EVENT) => {
                    out.buffer_fill_warning = Some(read_u8(&mut v, "ReportBufferLevelWarning")?);
                }
                params::ParamKind::Tlv(tlv::REPORT_BUFFER_OVERFLOW_ERROR_EVENT) => {
                    out.buffer_overflow = true;
                }
                _ => {}
            }
        }
    }
    Ok(out)
}

fn decode_capabilities_response(body: &[u8]) -> Result<(LlrpStatus, Option<ReaderCapabilities>)> {
    let mut status = None;
    let mut capabilities = None;
    for p in params::params(body) {
        let p = p?;
        let mut v = p.value;
        if p.is_tlv(tlv::LLRP_STATUS) {
            status = Some(LlrpStatus::decode(p.value)?);
        } else if p.is_tlv(tlv::GENERAL_DEVICE_CAPABILITIES) {
            let max_antennas = read_u16(&mut v, "GeneralDeviceCapabilities")?;
            let flags = read_u16(&mut v, "GeneralDeviceCapabilities")?;
            let manufacturer = read_u32(&mut v, "GeneralDeviceCapabilities")?;
            let model = read_u32(&mut v, "GeneralDeviceCapabilities")?;
            let firmware_version = read_utf8(&mut v, "ReaderFirmwareVersion")?;
            capabilities = Some(ReaderCapabilities {
                max_antennas,
                can_set_antenna_properties: flags & 0x8000 != 0,
                has_utc_clock: flags & 0x4000 != 0,
                manufacturer,
                model,
                firmware_version,
            });
        }
    }
    let status =
        status.ok_or_else(|| Error::Protocol("capabilities response without LLRPStatus".into()))?;
    Ok((status, capabilities))
}

fn decode_config_response(body: &[u8]) -> Result<(LlrpStatus, ReaderConfig)> {
    let mut status = None;
    let mut config = ReaderConfig::default();
    let mut configured_antennas = Vec::new();
    for p in params::params(body) {
        let p = p?;
        let mut v = p.value;
        match p.kind {
            params::ParamKind::Tlv(tlv::LLRP_STATUS) => {
                status = Some(LlrpStatus::decode(p.value)?);
            }
            params::ParamKind::Tlv(tlv::IDENTIFICATION) => {
                let _id_type = read_u8(&mut v, "Identification")?;
                let count = read_u16(&mut v, "Identification")? as usize;
                params::ensure(v, count, "Identification")?;
                config.reader_id = Some(to_hex(&v[..count]));
            }
            params::ParamKind::Tlv(tlv::ANTENNA_PROPERTIES) => {
                let _connected = read_u8(&mut v, "AntennaProperties")?;
                config
                    .antenna_ids
                    .push(read_u16(&mut v, "AntennaProperties")?);
            }
            params::ParamKind::Tlv(tlv::ANTENNA_CONFIGURATION) => {
                configured_antennas.push(read_u16(&mut v, "AntennaConfiguration")?);
            }
            params::ParamKind::Tlv(tlv::KEEPALIVE_SPEC) => {
                let trigger = read_u8(&mut v, "KeepaliveSpec")?;
                let period = read_u32(&mut v, "KeepaliveSpec")?;
                config.keepalive_period_ms = (trigger == 1).then_some(period);
            }
            _ => {}
        }
    }
    if config.antenna_ids.is_empty() {
        config.antenna_ids = configured_antennas;
    }
    let status =
        status.ok_or_else(|| Error::Protocol("config response without LLRPStatus".into()))?;
    Ok((status, config))
}

fn decode_access_report(body: &[u8]) -> Result<Vec<TagReport>> {
    let mut tags = Vec::new();
    for p in params::params(body) {
        let p = p?;
        if p.is_tlv(tlv::TAG_REPORT_DATA) {
            tags.push(decode_tag_report_data(p.value)?);
        }
    }
    Ok(tags)
}

fn decode_tag_report_data(value: &[u8]) -> Result<TagReport> {
    let mut tag = TagReport {
        tag_id: String::new(),
        antenna_id: None,
        first_seen_utc: None,
        last_seen_utc: None,
        seen_count: None,
        peak_rssi: None,
        access_spec_id: None,
        rospec_id: None,
        channel_index: None,
        spec_index: None,
    };

    for p in params::params(value) {
        let p = p?;
        let mut v = p.value;
        match p.kind {
            params::ParamKind::Tlv(tlv::EPC_DATA) => {
                let bits = read_u16(&mut v, "EPCData")? as usize;
                let bytes = bits.div_ceil(8);
                params::ensure(v, bytes, "EPCData")?;
                tag.tag_id = to_hex(&v[..bytes]);
            }
            params::ParamKind::Tv(tv::EPC_96) => tag.tag_id = to_hex(v),
            params::ParamKind::Tv(tv::ANTENNA_ID) => {
                tag.antenna_id = Some(read_u16(&mut v, "AntennaID")?)
            }
            params::ParamKind::Tv(tv::FIRST_SEEN_TIMESTAMP_UTC) => {
                tag.first_seen_utc = Some(read_u64(&mut v, "FirstSeenTimestampUTC")?)
            }
            params::ParamKind::Tv(tv::LAST_SEEN_TIMESTAMP_UTC) => {
                tag.last_seen_utc = Some(read_u64(&mut v, "LastSeenTimestampUTC")?)
            }
            params::ParamKind::Tv(tv::TAG_SEEN_COUNT) => {
                tag.seen_count = Some(read_u16(&mut v, "TagSeenCount")?)
            }
            params::ParamKind::Tv(tv::PEAK_RSSI) => {
                tag.peak_rssi = Some(read_u8(&mut v, "PeakRSSI")? as i8)
            }
            params::ParamKind::Tv(tv::ACCESS_SPEC_ID) => {
                tag.access_spec_id = Some(read_u32(&mut v, "AccessSpecID")?)
            }
            params::ParamKind::Tv(tv::RO_SPEC_ID) => {
                tag.rospec_id = Some(read_u32(&mut v, "ROSpecID")?)
            }
            params::ParamKind::Tv(tv::CHANNEL_INDEX) => {
                tag.channel_index = Some(read_u16(&mut v, "ChannelIndex")?)
            }
            params::ParamKind::Tv(tv::SPEC_INDEX) => {
                tag.spec_index = Some(read_u16(&mut v, "SpecIndex")?)
            }
            _ => {}
        }
    }

    if tag.tag_id.is_empty() {
        return Err(Error::Protocol("TagReportData without EPC".into()));
    }
    Ok(tag)
}
