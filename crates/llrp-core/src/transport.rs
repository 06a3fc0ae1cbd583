//! Transport trait for the outbound half of a reader connection.
//!
//! The [`Transport`] trait abstracts over the write side of the link to an
//! RFID reader. The inbound side is a plain byte stream consumed by the
//! connector's frame decoder, so only writes and shutdown need a seam.
//!
//! The setup orchestrator, the control dispatcher and the close sequence all
//! write through a shared `Transport`, which lets tests substitute the
//! recording `MockTransport` from the `llrp-test-harness` crate for a real
//! socket.

use async_trait::async_trait;

use crate::error::Result;

/// Asynchronous byte-level writer to a reader.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one encoded LLRP message to the reader.
    ///
    /// Implementations should wait until all bytes have been handed to the
    /// underlying socket.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Close the outbound half of the connection.
    ///
    /// After calling `close()`, subsequent `send()` calls should return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected). Closing
    /// twice is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
