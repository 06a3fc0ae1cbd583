//! Event emission toward the sink.
//!
//! [`Reporter`] stamps every outbound event with the reader's identity and
//! applies the configured log threshold before mirroring a log line to the
//! sink as a `"<level>Log"` event.

use std::sync::{Arc, RwLock};

use llrp_core::events::{ConnectorEvent, LogEvent, LogLevel, TagReport};
use llrp_core::sink::EventSink;

pub(crate) struct Reporter {
    sink: Arc<dyn EventSink>,
    log_level: Option<LogLevel>,
    source_name: String,
    hostname: String,
    /// Hostname until the reader reports its own identification.
    reader_id: RwLock<String>,
}

impl Reporter {
    pub fn new(
        sink: Arc<dyn EventSink>,
        log_level: Option<LogLevel>,
        source_name: String,
        hostname: String,
    ) -> Self {
        Self {
            sink,
            log_level,
            source_name,
            reader_id: RwLock::new(hostname.clone()),
            hostname,
        }
    }

    pub fn reader_id(&self) -> String {
        self.reader_id
            .read()
            .map(|id| id.clone())
            .unwrap_or_else(|_| self.hostname.clone())
    }

    pub fn set_reader_id(&self, id: &str) {
        if let Ok(mut current) = self.reader_id.write() {
            *current = id.to_string();
        }
    }

    pub fn tag_data(&self, tags: Vec<TagReport>) {
        self.sink.send_event(ConnectorEvent::TagData {
            reader_id: self.reader_id(),
            tags,
        });
    }

    pub fn reader_data(&self, antenna_ids: Vec<u16>) {
        self.sink.send_event(ConnectorEvent::ReaderData {
            reader_id: self.reader_id(),
            antenna_ids,
        });
    }

    pub fn reader_status(&self, online: bool) {
        self.sink.send_event(ConnectorEvent::ReaderStatus {
            reader_id: self.reader_id(),
            online,
        });
    }

    /// Log through `tracing` and, if the threshold permits, to the sink.
    pub fn log(&self, level: LogLevel, msg: impl Into<String>) {
        let msg = msg.into();
        let reader = self.reader_id();
        match level {
            LogLevel::Error => tracing::error!(reader = %reader, "{}", msg),
            LogLevel::Warn => tracing::warn!(reader = %reader, "{}", msg),
            LogLevel::Info => tracing::info!(reader = %reader, "{}", msg),
            LogLevel::Debug => tracing::debug!(reader = %reader, "{}", msg),
        }
        if level.permitted_by(self.log_level) {
            self.sink.send_event(ConnectorEvent::Log(LogEvent {
                level,
                source_name: self.source_name.clone(),
                hostname: self.hostname.clone(),
                reader_id: reader,
                msg,
            }));
        }
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.log(LogLevel::Error, msg);
    }

    pub fn warn(&self, msg: impl Into<String>) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.log(LogLevel::Info, msg);
    }

    pub fn debug(&self, msg: impl Into<String>) {
        self.log(LogLevel::Debug, msg);
    }
}
