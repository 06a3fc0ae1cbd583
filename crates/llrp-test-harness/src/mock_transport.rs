//! Recording mock transport for deterministic testing of the connector.
//!
//! [`MockTransport`] implements the [`Transport`] trait by recording every
//! message written to it. The log is shared through a [`SentLog`] handle so
//! a test can hand the transport to the code under test as a
//! `Box<dyn Transport>` and still inspect what was written.
//!
//! # Example
//!
//! ```
//! use llrp_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! let log = mock.sent_log();
//! assert!(log.is_empty());
//! ```

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use llrp_core::error::{Error, Result};
use llrp_core::transport::Transport;

/// Shared view of everything written through a [`MockTransport`].
#[derive(Debug, Clone, Default)]
pub struct SentLog {
    inner: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SentLog {
    /// Snapshot of all writes, one element per `send()` call.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// LLRP message type of each write, read from its header.
    pub fn message_types(&self) -> Vec<u16> {
        self.messages()
            .iter()
            .filter_map(|m| crate::message_type_of(m))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, data: &[u8]) {
        if let Ok(mut v) = self.inner.lock() {
            v.push(data.to_vec());
        }
    }
}

/// A mock [`Transport`] that records writes instead of sending them.
#[derive(Debug)]
pub struct MockTransport {
    log: SentLog,
    connected: bool,
    /// When set, every `send()` fails with [`Error::ConnectionLost`].
    fail_sends: bool,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            log: SentLog::default(),
            connected: true,
            fail_sends: false,
        }
    }

    /// Create a mock whose writes fail as if the peer had reset the socket.
    pub fn failing() -> Self {
        MockTransport {
            fail_sends: true,
            ..Self::new()
        }
    }

    /// Handle onto the write log that stays valid after the mock is moved.
    pub fn sent_log(&self) -> SentLog {
        self.log.clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.fail_sends {
            return Err(Error::ConnectionLost);
        }
        self.log.push(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
