//! Outbound connector events.
//!
//! Events are produced by the connector's workers and handed straight to an
//! [`EventSink`](crate::sink::EventSink); nothing is buffered. Each event
//! renders to the JSON document the platform bridge expects via
//! [`ConnectorEvent::to_value`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Error;

/// Severity threshold for log events forwarded to the sink.
///
/// Ordered from most to least severe, so `level <= threshold` means the
/// level is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// The lowercase level name used in configuration and event types.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    /// Whether a message at `self` passes the given threshold.
    pub fn permitted_by(&self, threshold: Option<LogLevel>) -> bool {
        threshold.is_some_and(|t| *self <= t)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(Error::Config(format!("unknown log level: {other}"))),
        }
    }
}

/// One tag observation from an `RO_ACCESS_REPORT`.
///
/// Optional fields are absent when the reader's report content selector
/// did not include them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagReport {
    /// EPC as an uppercase hex string.
    #[serde(rename = "tagId")]
    pub tag_id: String,
    #[serde(rename = "antennaID", skip_serializing_if = "Option::is_none")]
    pub antenna_id: Option<u16>,
    /// Microseconds since the Unix epoch.
    #[serde(rename = "firstSeenTimestampUTC", skip_serializing_if = "Option::is_none")]
    pub first_seen_utc: Option<u64>,
    /// Microseconds since the Unix epoch.
    #[serde(rename = "lastSeenTimestampUTC", skip_serializing_if = "Option::is_none")]
    pub last_seen_utc: Option<u64>,
    #[serde(rename = "tagSeenCount", skip_serializing_if = "Option::is_none")]
    pub seen_count: Option<u16>,
    #[serde(rename = "peakRSSI", skip_serializing_if = "Option::is_none")]
    pub peak_rssi: Option<i8>,
    #[serde(rename = "accessSpecID", skip_serializing_if = "Option::is_none")]
    pub access_spec_id: Option<u32>,
    #[serde(rename = "roSpecID", skip_serializing_if = "Option::is_none")]
    pub rospec_id: Option<u32>,
    #[serde(rename = "channelIndex", skip_serializing_if = "Option::is_none")]
    pub channel_index: Option<u16>,
    #[serde(rename = "specIndex", skip_serializing_if = "Option::is_none")]
    pub spec_index: Option<u16>,
}

/// A log line mirrored to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub source_name: String,
    pub hostname: String,
    pub reader_id: String,
    pub msg: String,
}

/// An event emitted by the connector toward the platform bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    /// A batch of tag observations from one access report.
    TagData {
        reader_id: String,
        tags: Vec<TagReport>,
    },

    /// Reader identity and antenna inventory harvested during setup.
    ReaderData {
        reader_id: String,
        antenna_ids: Vec<u16>,
    },

    /// The reader went online or offline.
    ReaderStatus { reader_id: String, online: bool },

    /// A log line at or above the configured threshold.
    Log(LogEvent),
}

impl ConnectorEvent {
    /// The `eventType` discriminator for this event.
    pub fn event_type(&self) -> String {
        match self {
            ConnectorEvent::TagData { .. } => "tagData".to_string(),
            ConnectorEvent::ReaderData { .. } => "readerData".to_string(),
            ConnectorEvent::ReaderStatus { .. } => "readerStatus".to_string(),
            ConnectorEvent::Log(log) => format!("{}Log", log.level),
        }
    }

    /// Render the event as the JSON document sent to the platform.
    pub fn to_value(&self) -> Value {
        let event_type = self.event_type();
        match self {
            ConnectorEvent::TagData { reader_id, tags } => json!({
                "eventType": event_type,
                "readerId": reader_id,
                "tags": tags,
            }),
            ConnectorEvent::ReaderData {
                reader_id,
                antenna_ids,
            } => json!({
                "eventType": event_type,
                "readerId": reader_id,
                "antennaIds": antenna_ids,
            }),
            ConnectorEvent::ReaderStatus { reader_id, online } => json!({
                "eventType": event_type,
                "readerId": reader_id,
                "readerOnline": online,
            }),
            ConnectorEvent::Log(log) => json!({
                "eventType": event_type,
                "sourceName": log.source_name,
                "hostname": log.hostname,
                "readerId": log.reader_id,
                "msg": log.msg,
            }),
        }
    }
}
