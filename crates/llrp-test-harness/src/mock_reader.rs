//! Scripted LLRP reader for end-to-end testing over loopback TCP.
//!
//! [`MockReader`] listens on a random localhost port, accepts a single
//! connection and plays a script of steps: push bytes to the client, wait
//! for a message of a given type and answer it, or pause. Every message the
//! client sends is recorded by type so a test can assert on ordering.
//!
//! The mock understands only the LLRP message header (type and length), so
//! tests build the actual response bodies with the connector's own encoder.
//!
//! # Example
//!
//! ```
//! use llrp_test_harness::MockReader;
//!
//! # async fn example() -> llrp_core::Result<()> {
//! let mut reader = MockReader::new().await?;
//! // When the client sends GET_READER_CAPABILITIES (1), answer with these bytes.
//! reader.expect(1, &[0x04, 0x0B, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x01]);
//! reader.start();
//! let addr = reader.addr();
//! // ... connect and test ...
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use llrp_core::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::HEADER_PREFIX_LEN;

/// One step of the reader script.
#[derive(Debug, Clone)]
enum Step {
    /// Write these bytes to the client.
    Send(Vec<u8>),
    /// Wait until the client sends a message of this type, then write `reply`
    /// (which may be empty). Messages of other types are recorded and skipped.
    Expect { message_type: u16, reply: Vec<u8> },
    /// Sleep before the next step.
    Pause(Duration),
}

/// A scripted LLRP reader.
pub struct MockReader {
    listener: Option<TcpListener>,
    addr: String,
    steps: Vec<Step>,
    received: Arc<Mutex<Vec<u16>>>,
    handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockReader {
    /// Bind a new mock reader on a random localhost port.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock reader: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();
        Ok(Self {
            listener: Some(listener),
            addr,
            steps: Vec::new(),
            received: Arc::new(Mutex::new(Vec::new())),
            handle: None,
        })
    }

    /// Queue bytes to be written to the client.
    pub fn send(&mut self, bytes: &[u8]) {
        self.steps.push(Step::Send(bytes.to_vec()));
    }

    /// Queue an expected request and the reply to write when it arrives.
    pub fn expect(&mut self, message_type: u16, reply: &[u8]) {
        self.steps.push(Step::Expect {
            message_type,
            reply: reply.to_vec(),
        });
    }

    /// Queue an expected request that the reader does not answer.
    pub fn expect_silent(&mut self, message_type: u16) {
        self.expect(message_type, &[]);
    }

    /// Queue a pause between steps.
    pub fn pause(&mut self, duration: Duration) {
        self.steps.push(Step::Pause(duration));
    }

    /// The `host:port` address the mock is listening on.
    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    /// The listening port.
    pub fn port(&self) -> u16 {
        self.addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    /// Start serving: accept one client and play the script.
    ///
    /// After the script is exhausted the mock keeps reading and recording
    /// client messages until the client closes the connection.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let steps = std::mem::take(&mut self.steps);
        let received = Arc::clone(&self.received);

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;

            for (i, step) in steps.into_iter().enumerate() {
                match step {
                    Step::Send(bytes) => {
                        stream
                            .write_all(&bytes)
                            .await
                            .map_err(|e| format!("step {}: write error: {}", i, e))?;
                        stream
                            .flush()
                            .await
                            .map_err(|e| format!("step {}: flush error: {}", i, e))?;
                    }
                    Step::Pause(d) => tokio::time::sleep(d).await,
                    Step::Expect {
                        message_type,
                        reply,
                    } => {
                        loop {
                            let got = read_message_type(&mut stream)
                                .await
                                .map_err(|e| format!("step {}: {}", i, e))?
                                .ok_or_else(|| {
                                    format!(
                                        "step {}: client disconnected while waiting for type {}",
                                        i, message_type
                                    )
                                })?;
                            if let Ok(mut log) = received.lock() {
                                log.push(got);
                            }
                            if got == message_type {
                                break;
                            }
                            tracing::trace!(got, expected = message_type, "Mock reader skipping");
                        }
                        if !reply.is_empty() {
                            stream
                                .write_all(&reply)
                                .await
                                .map_err(|e| format!("step {}: write error: {}", i, e))?;
                            stream
                                .flush()
                                .await
                                .map_err(|e| format!("step {}: flush error: {}", i, e))?;
                        }
                    }
                }
            }

            // Script done: keep recording until the client goes away.
            while let Ok(Some(got)) = read_message_type(&mut stream).await {
                if let Ok(mut log) = received.lock() {
                    log.push(got);
                }
            }

            Ok(())
        });

        self.handle = Some(handle);
    }

    /// Wait for the script task to finish and return the received types.
    pub async fn wait(self) -> std::result::Result<Vec<u16>, String> {
        if let Some(handle) = self.handle {
            handle
                .await
                .map_err(|e| format!("mock reader task panicked: {}", e))??;
        }
        Ok(self.received.lock().map(|v| v.clone()).unwrap_or_default())
    }

    /// Stop the mock reader without waiting for the script to finish.
    ///
    /// Dropping the task closes the socket, which the client observes as
    /// end-of-stream.
    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Read one whole LLRP message and return its type, or `None` on clean EOF.
async fn read_message_type<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> std::result::Result<Option<u16>, String> {
    let mut header = [0u8; HEADER_PREFIX_LEN];
    let mut filled = 0;
    while filled < HEADER_PREFIX_LEN {
        let n = stream
            .read(&mut header[filled..])
            .await
            .map_err(|e| format!("read error: {}", e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(format!("client disconnected mid-header after {} bytes", filled));
        }
        filled += n;
    }

    let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if length < HEADER_PREFIX_LEN {
        return Err(format!("client sent invalid length {}", length));
    }
    let mut rest = vec![0u8; length - HEADER_PREFIX_LEN];
    stream
        .read_exact(&mut rest)
        .await
        .map_err(|e| format!("read error in body: {}", e))?;

    Ok(crate::message_type_of(&header))
}
