//! llrp-test-harness: Test utilities for the LLRP connector.
//!
//! This crate provides [`MockTransport`] for recording what the connector
//! writes without a socket, and [`MockReader`] for scripting a whole reader
//! conversation over loopback TCP.

pub mod mock_reader;
pub mod mock_transport;

pub use mock_reader::MockReader;
pub use mock_transport::{MockTransport, SentLog};

/// Bytes of the LLRP header needed to know a message's type and length.
pub const HEADER_PREFIX_LEN: usize = 6;

/// Extract the 10-bit message type from the first two header bytes.
pub fn message_type_of(message: &[u8]) -> Option<u16> {
    if message.len() < 2 {
        return None;
    }
    Some((((message[0] & 0x03) as u16) << 8) | message[1] as u16)
}
