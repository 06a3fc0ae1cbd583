//! Per-reader configuration handed over by the platform bridge.
//!
//! The bridge delivers a JSON document:
//!
//! ```json
//! { "hostname": "10.0.0.12", "readerPort": 5084, "tagReadInterval": 2000, "logLevel": "warn" }
//! ```
//!
//! `hostname` and `readerPort` are required; a document without them is a
//! fatal [`Error::Config`] for that reader and no connection is attempted.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use llrp_core::error::{Error, Result};
use llrp_core::events::LogLevel;

/// Default AISpec duration in milliseconds.
pub const DEFAULT_TAG_READ_INTERVAL_MS: u64 = 2000;

/// Default `sourceName` in log events.
pub const DEFAULT_SOURCE_NAME: &str = "llrp";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    hostname: Option<String>,
    reader_port: Option<u16>,
    tag_read_interval: Option<u64>,
    log_level: Option<String>,
    source_name: Option<String>,
}

/// Validated connection parameters for one reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub hostname: String,
    pub port: u16,
    pub tag_read_interval: Duration,
    /// Threshold for log events sent to the sink; `None` sends none.
    pub log_level: Option<LogLevel>,
    pub source_name: String,
}

impl ConnectorConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            tag_read_interval: Duration::from_millis(DEFAULT_TAG_READ_INTERVAL_MS),
            log_level: None,
            source_name: DEFAULT_SOURCE_NAME.to_string(),
        }
    }

    /// Parse and validate the bridge's configuration document.
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw = RawConfig::deserialize(value)
            .map_err(|e| Error::Config(format!("invalid reader configuration: {}", e)))?;

        let hostname = raw
            .hostname
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| Error::Config("missing hostname".into()))?;
        let port = raw
            .reader_port
            .ok_or_else(|| Error::Config("missing readerPort".into()))?;

        let log_level = match raw.log_level.as_deref() {
            None | Some("") => None,
            Some(s) => Some(s.parse::<LogLevel>()?),
        };

        Ok(Self {
            hostname,
            port,
            tag_read_interval: Duration::from_millis(
                raw.tag_read_interval.unwrap_or(DEFAULT_TAG_READ_INTERVAL_MS),
            ),
            log_level,
            source_name: raw
                .source_name
                .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string()),
        })
    }

    /// `host:port` for the TCP connect.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}
