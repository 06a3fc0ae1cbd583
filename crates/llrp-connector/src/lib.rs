//! LLRP client for a single RFID reader.
//!
//! This crate speaks LLRP 1.0.1 over TCP and keeps one reader in continuous
//! inventory. It provides:
//!
//! - **Frame codec** ([`frame`], [`params`]) -- the 10-byte message header
//!   and TLV/TV parameter encoding.
//! - **Messages** ([`messages`], [`commands`], [`rospec`]) -- decoding of the
//!   reader's messages and builders for every request the connector sends.
//! - **Connection state** ([`state`]) -- the shared lifecycle flags read by
//!   every worker.
//! - **Session I/O** ([`io`]) -- the socket reader that routes messages onto
//!   a control queue and a tag queue, and the serialized writer.
//! - **Liveness** ([`monitor`]) -- the keepalive watchdog that drives
//!   reconnection.
//! - **ReaderConnector** ([`connector`]) -- setup, steady state and close
//!   for one reader, configured via [`ConnectorConfig`] and
//!   [`ConnectorBuilder`].
//!
//! # Example
//!
//! ```no_run
//! use llrp_connector::ReaderConnector;
//! use llrp_core::ConnectorEvent;
//! use serde_json::json;
//!
//! # async fn example() -> llrp_core::Result<()> {
//! let (events, mut rx) = tokio::sync::mpsc::unbounded_channel::<ConnectorEvent>();
//! let connector = ReaderConnector::from_value(
//!     &json!({"hostname": "192.168.1.40", "readerPort": 5084, "logLevel": "warn"}),
//!     events,
//! )?;
//! connector.setup().await?;
//!
//! while let Some(event) = rx.recv().await {
//!     println!("{}", event.to_value());
//! }
//! connector.close().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod commands;
pub mod config;
pub mod connector;
mod dispatch;
pub mod frame;
pub mod io;
pub mod messages;
pub mod monitor;
pub mod params;
mod reporter;
pub mod rospec;
mod setup;
pub mod state;

#[cfg(test)]
mod test_support;

pub use builder::{ConnectorBuilder, ConnectorSettings};
pub use config::ConnectorConfig;
pub use connector::ReaderConnector;
pub use llrp_core::{ConnectorEvent, Error, EventSink, LogEvent, LogLevel, Result, TagReport};
pub use state::ConnectionState;
