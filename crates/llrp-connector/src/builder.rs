//! ConnectorBuilder -- fluent builder for [`ReaderConnector`] instances.
//!
//! Separates the bridge-supplied [`ConnectorConfig`] from the tuning knobs
//! the bridge never sets (ROSpec id, timers, report batching), so tests and
//! embedders can adjust those before the connector exists.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use llrp_connector::{ConnectorBuilder, ConnectorConfig};
//! use llrp_core::ConnectorEvent;
//!
//! # async fn example() -> llrp_core::Result<()> {
//! let (events, _rx) = tokio::sync::mpsc::unbounded_channel::<ConnectorEvent>();
//! let connector = ConnectorBuilder::new(ConnectorConfig::new("192.168.1.40", 5084))
//!     .rospec_id(42)
//!     .keepalive_period(Duration::from_secs(3))
//!     .build(events)?;
//! connector.setup().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde_json::Value;

use llrp_core::error::{Error, Result};
use llrp_core::sink::EventSink;

use crate::config::ConnectorConfig;
use crate::connector::ReaderConnector;

/// Tuning that is not part of the bridge's configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSettings {
    /// Id of the single ROSpec this connector owns on the reader.
    pub rospec_id: u32,
    pub rospec_priority: u8,
    /// Liveness check period, also the keepalive staleness threshold.
    pub reconnect_interval: Duration,
    /// Keepalive period requested from the reader.
    pub keepalive_period: Duration,
    pub report_every_n_tags: u16,
    pub connect_timeout: Duration,
    /// Bound on each setup wait; `None` waits for as long as the reader
    /// takes.
    pub setup_step_timeout: Option<Duration>,
    /// Pause between the best-effort stop/disable/delete requests on close.
    pub close_step_pause: Duration,
    /// Bound on the wait for `CLOSE_CONNECTION_RESPONSE`; `None` waits
    /// until the reader answers or drops the socket.
    pub close_timeout: Option<Duration>,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            rospec_id: 1234,
            rospec_priority: 0,
            reconnect_interval: Duration::from_secs(10),
            keepalive_period: Duration::from_secs(5),
            report_every_n_tags: 1,
            connect_timeout: Duration::from_secs(5),
            setup_step_timeout: Some(Duration::from_secs(30)),
            close_step_pause: Duration::from_millis(100),
            close_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Fluent builder for [`ReaderConnector`].
pub struct ConnectorBuilder {
    config: ConnectorConfig,
    settings: ConnectorSettings,
}

impl ConnectorBuilder {
    pub fn new(config: ConnectorConfig) -> Self {
        ConnectorBuilder {
            config,
            settings: ConnectorSettings::default(),
        }
    }

    /// Start from the bridge's configuration document.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Self::new(ConnectorConfig::from_value(value)?))
    }

    /// Set the ROSpec id (default: 1234).
    ///
    /// Must be unique per connector talking to the same reader.
    pub fn rospec_id(mut self, id: u32) -> Self {
        self.settings.rospec_id = id;
        self
    }

    pub fn rospec_priority(mut self, priority: u8) -> Self {
        self.settings.rospec_priority = priority;
        self
    }

    /// Set the liveness check period (default: 10s).
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.settings.reconnect_interval = interval;
        self
    }

    /// Set the keepalive period requested from the reader (default: 5s).
    pub fn keepalive_period(mut self, period: Duration) -> Self {
        self.settings.keepalive_period = period;
        self
    }

    /// Ask the reader to report after every `n` tags (default: 1).
    pub fn report_every_n_tags(mut self, n: u16) -> Self {
        self.settings.report_every_n_tags = n;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = timeout;
        self
    }

    /// Bound each setup step (default: 30s). `None` waits indefinitely.
    pub fn setup_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.setup_step_timeout = timeout;
        self
    }

    pub fn close_step_pause(mut self, pause: Duration) -> Self {
        self.settings.close_step_pause = pause;
        self
    }

    /// Bound the wait for the reader's close answer (default: 30s).
    /// `None` waits indefinitely.
    pub fn close_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.close_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    /// Validate the settings and create the connector.
    ///
    /// No connection is made until [`ReaderConnector::setup`].
    pub fn build(self, sink: impl EventSink) -> Result<ReaderConnector> {
        let s = &self.settings;
        if s.reconnect_interval.is_zero() {
            return Err(Error::Config("reconnect_interval must be non-zero".into()));
        }
        if s.keepalive_period.is_zero() || s.keepalive_period >= s.reconnect_interval {
            return Err(Error::Config(format!(
                "keepalive_period {:?} must be non-zero and below reconnect_interval {:?}",
                s.keepalive_period, s.reconnect_interval
            )));
        }
        if s.report_every_n_tags == 0 {
            return Err(Error::Config("report_every_n_tags must be at least 1".into()));
        }
        if self.config.tag_read_interval.is_zero() {
            return Err(Error::Config("tagReadInterval must be positive".into()));
        }

        Ok(ReaderConnector::with_settings(
            self.config,
            self.settings,
            std::sync::Arc::new(sink),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llrp_core::ConnectorEvent;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn sink() -> mpsc::UnboundedSender<ConnectorEvent> {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn defaults() {
        let s = ConnectorSettings::default();
        assert_eq!(s.rospec_id, 1234);
        assert_eq!(s.reconnect_interval, Duration::from_secs(10));
        assert_eq!(s.keepalive_period, Duration::from_secs(5));
        assert_eq!(s.setup_step_timeout, Some(Duration::from_secs(30)));
        assert_eq!(s.close_step_pause, Duration::from_millis(100));
        assert_eq!(s.close_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn setters_apply() {
        let b = ConnectorBuilder::new(ConnectorConfig::new("r", 5084))
            .rospec_id(9)
            .rospec_priority(2)
            .reconnect_interval(Duration::from_secs(20))
            .keepalive_period(Duration::from_secs(4))
            .report_every_n_tags(16)
            .connect_timeout(Duration::from_secs(1))
            .setup_step_timeout(None)
            .close_step_pause(Duration::ZERO)
            .close_timeout(Some(Duration::from_secs(2)));
        let s = b.settings();
        assert_eq!(s.rospec_id, 9);
        assert_eq!(s.rospec_priority, 2);
        assert_eq!(s.report_every_n_tags, 16);
        assert_eq!(s.setup_step_timeout, None);
        assert_eq!(s.close_timeout, Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn keepalive_must_be_below_reconnect_interval() {
        let err = ConnectorBuilder::new(ConnectorConfig::new("r", 5084))
            .keepalive_period(Duration::from_secs(10))
            .build(sink())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn zero_batch_rejected() {
        assert!(
            ConnectorBuilder::new(ConnectorConfig::new("r", 5084))
                .report_every_n_tags(0)
                .build(sink())
                .is_err()
        );
    }

    #[tokio::test]
    async fn from_value_builds() {
        let connector = ConnectorBuilder::from_value(&json!({"hostname": "r", "readerPort": 5084}))
            .unwrap()
            .build(sink())
            .unwrap();
        assert_eq!(connector.config().port, 5084);
    }

    #[test]
    fn from_value_propagates_config_error() {
        assert!(matches!(
            ConnectorBuilder::from_value(&json!({"readerPort": 5084})),
            Err(Error::Config(_))
        ));
    }
}
