//! llrp-core: Core traits, types, and error definitions for the LLRP
//! reader connector.
//!
//! This crate holds the pieces shared by the transport, the protocol engine
//! and the test harness, so that each of them can be built and tested
//! without the others.
//!
//! # Key types
//!
//! - [`Transport`] -- outbound byte channel to a reader
//! - [`ConnectorEvent`] -- tag, reader and log notifications for the platform
//! - [`EventSink`] -- where those notifications go
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod sink;
pub mod transport;

pub use error::{Error, Result};
pub use events::{ConnectorEvent, LogEvent, LogLevel, TagReport};
pub use sink::EventSink;
pub use transport::Transport;
