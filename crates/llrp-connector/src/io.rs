//! Socket reader task and the per-connection plumbing around it.
//!
//! One TCP connection is one [`Session`]. Its socket reader owns the read
//! half and a [`FrameDecoder`], decodes each message and classifies it onto
//! one of two unbounded queues: access reports carrying tags go to the tag
//! queue, everything else to the control queue. The write half sits behind
//! a shared [`MessageWriter`] used by the setup sequence, the control
//! dispatcher and the close sequence.
//!
//! The reader loop never restarts itself. When it exits, it drops both
//! queue senders, which ends the dispatchers and any setup step still
//! waiting on the control queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::AsyncRead;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use llrp_core::error::{Error, Result};
use llrp_core::transport::Transport;

use crate::frame::FrameDecoder;
use crate::messages::{LlrpMessage, MessageType};

/// Which queue a decoded message belongs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Tag,
    Control,
}

/// Access reports with at least one tag go to the tag queue.
pub fn classify(msg: &LlrpMessage) -> Route {
    match msg.tags() {
        Some(tags) if !tags.is_empty() => Route::Tag,
        _ => Route::Control,
    }
}

/// Why a socket reader stopped.
#[derive(Debug)]
pub enum ReadExit {
    /// The reader closed the stream.
    Eof,
    /// `CLOSE_CONNECTION_RESPONSE` arrived.
    CloseResponse,
    /// The session was torn down locally.
    Cancelled,
    /// Malformed frame or socket error.
    Failed(Error),
}

/// Receiving ends of a session's two queues.
pub struct Queues {
    pub control: mpsc::UnboundedReceiver<LlrpMessage>,
    pub tags: mpsc::UnboundedReceiver<LlrpMessage>,
}

/// Sending ends, owned by the socket reader.
pub struct QueueSenders {
    control: mpsc::UnboundedSender<LlrpMessage>,
    tags: mpsc::UnboundedSender<LlrpMessage>,
}

pub fn queues() -> (QueueSenders, Queues) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (tag_tx, tag_rx) = mpsc::unbounded_channel();
    (
        QueueSenders {
            control: control_tx,
            tags: tag_tx,
        },
        Queues {
            control: control_rx,
            tags: tag_rx,
        },
    )
}

/// Decode messages until the stream ends, the reader answers
/// `CLOSE_CONNECTION`, or `cancel` fires.
///
/// `close_tx` is signalled when `CLOSE_CONNECTION_RESPONSE` is observed.
pub async fn socket_read_loop<R: AsyncRead + Unpin>(
    mut decoder: FrameDecoder<R>,
    senders: QueueSenders,
    close_tx: oneshot::Sender<()>,
    cancel: CancellationToken,
) -> ReadExit {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return ReadExit::Cancelled,
            r = decoder.read_frame() => r,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("Reader closed the connection");
                return ReadExit::Eof;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Socket read failed");
                return ReadExit::Failed(e);
            }
        };

        let msg = match LlrpMessage::decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable message");
                return ReadExit::Failed(e);
            }
        };

        tracing::trace!(
            message = %msg.name(),
            message_id = msg.message_id,
            "Received"
        );

        if msg.kind() == Some(MessageType::CloseConnectionResponse) {
            if let Some(status) = msg.status() {
                tracing::debug!(status = %status, "CLOSE_CONNECTION_RESPONSE");
            }
            let _ = close_tx.send(());
            return ReadExit::CloseResponse;
        }

        let sent = match classify(&msg) {
            Route::Tag => senders.tags.send(msg),
            Route::Control => senders.control.send(msg),
        };
        if sent.is_err() {
            tracing::trace!("Queue receiver dropped");
        }
    }
}

/// Serialised access to the write half plus the outbound message id
/// counter.
#[derive(Clone)]
pub struct MessageWriter {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    next_id: Arc<AtomicU32>,
}

impl MessageWriter {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut transport = self.transport.lock().await;
        transport.send(bytes).await
    }

    pub async fn close(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        transport.close().await
    }
}

/// Resources of one live TCP connection.
pub struct Session {
    pub generation: u64,
    pub writer: MessageWriter,
    pub cancel: CancellationToken,
    /// Resolves when the socket reader sees `CLOSE_CONNECTION_RESPONSE`,
    /// or errors once the reader has exited for any other reason.
    pub closed: Option<oneshot::Receiver<()>>,
    /// Socket reader and dispatchers spawned for this connection.
    pub tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Cancel the socket reader and shut the write half.
    pub async fn force_close(&mut self) {
        self.cancel.cancel();
        if let Err(e) = self.writer.close().await {
            tracing::debug!(error = %e, "Error closing transport");
        }
    }

    /// Wait for every task of this session to finish.
    ///
    /// Only meaningful after [`force_close`](Self::force_close); the
    /// dispatchers drain what is left in their queues before they exit.
    /// Must not be called from one of the session's own tasks.
    pub async fn join(mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "Session task ended abnormally");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use llrp_test_harness::MockTransport;
    use tokio_test::io::Builder;

    #[test]
    fn classification() {
        assert_eq!(classify(&decode(&access_report(9, &["E200"]))), Route::Tag);
        assert_eq!(classify(&decode(&access_report(9, &[]))), Route::Control);
        assert_eq!(classify(&decode(&keepalive(1))), Route::Control);
        assert_eq!(
            classify(&decode(&status_response(MessageType::AddRoSpecResponse, 0))),
            Route::Control
        );
    }

    #[tokio::test]
    async fn routes_messages_to_queues() {
        let mut stream = Vec::new();
        stream.extend(keepalive(1));
        stream.extend(access_report(2, &["E2801160600002054E3C2A1B"]));
        stream.extend(access_report(3, &[]));
        stream.extend(status_response(MessageType::EnableRoSpecResponse, 0));

        let mock = Builder::new().read(&stream).build();
        let (senders, mut queues) = queues();
        let (close_tx, _close_rx) = oneshot::channel();

        let exit = socket_read_loop(
            FrameDecoder::new(mock),
            senders,
            close_tx,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(exit, ReadExit::Eof));

        let control: Vec<_> = std::iter::from_fn(|| queues.control.try_recv().ok())
            .map(|m| m.kind())
            .collect();
        assert_eq!(
            control,
            vec![
                Some(MessageType::Keepalive),
                Some(MessageType::RoAccessReport),
                Some(MessageType::EnableRoSpecResponse),
            ]
        );

        let tag = queues.tags.try_recv().unwrap();
        assert_eq!(tag.tags().unwrap()[0].tag_id, "E2801160600002054E3C2A1B");
        assert!(queues.tags.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_response_signals_and_stops() {
        let mut stream = keepalive(5);
        stream.extend(close_connection_response());

        let mock = Builder::new().read(&stream).build();
        let (senders, mut queues) = queues();
        let (close_tx, close_rx) = oneshot::channel();

        let exit = socket_read_loop(
            FrameDecoder::new(mock),
            senders,
            close_tx,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(exit, ReadExit::CloseResponse));
        assert!(close_rx.await.is_ok());
        assert_eq!(
            queues.control.recv().await.and_then(|m| m.kind()),
            Some(MessageType::Keepalive)
        );
        assert!(queues.control.recv().await.is_none());
    }

    #[tokio::test]
    async fn malformed_frame_ends_loop() {
        let mock = Builder::new().read(&[0x04, 0x3E, 0, 0, 0, 2]).build();
        let (senders, mut queues) = queues();
        let (close_tx, close_rx) = oneshot::channel();

        let exit = socket_read_loop(
            FrameDecoder::new(mock),
            senders,
            close_tx,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(exit, ReadExit::Failed(Error::Protocol(_))));
        assert!(close_rx.await.is_err());
        assert!(queues.control.recv().await.is_none());
        assert!(queues.tags.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancel_interrupts_blocked_read() {
        let (client, _server) = tokio::io::duplex(64);
        let (senders, _queues) = queues();
        let (close_tx, _close_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(socket_read_loop(
            FrameDecoder::new(client),
            senders,
            close_tx,
            cancel.clone(),
        ));
        cancel.cancel();
        assert!(matches!(task.await.unwrap(), ReadExit::Cancelled));
    }

    #[tokio::test]
    async fn join_waits_for_dispatchers_to_drain() {
        let (client, _server) = tokio::io::duplex(64);
        let (senders, Queues { mut control, .. }) = queues();
        let (close_tx, _close_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(socket_read_loop(
            FrameDecoder::new(client),
            senders,
            close_tx,
            cancel.clone(),
        ));
        let drained = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&drained);
        let dispatcher = tokio::spawn(async move {
            while control.recv().await.is_some() {}
            flag.store(true, Ordering::SeqCst);
        });

        let mut session = Session {
            generation: 1,
            writer: MessageWriter::new(Box::new(MockTransport::new())),
            cancel,
            closed: None,
            tasks: vec![
                tokio::spawn(async move {
                    let _ = reader.await;
                }),
                dispatcher,
            ],
        };
        session.force_close().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), session.join())
            .await
            .expect("session tasks did not finish");
        assert!(drained.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn writer_assigns_increasing_ids_and_records() {
        let mock = MockTransport::new();
        let log = mock.sent_log();
        let writer = MessageWriter::new(Box::new(mock));

        assert_eq!(writer.next_id(), 1);
        assert_eq!(writer.next_id(), 2);
        writer.send(&keepalive(1)).await.unwrap();
        assert_eq!(log.message_types(), vec![62]);

        writer.close().await.unwrap();
        assert!(matches!(
            writer.send(&keepalive(2)).await,
            Err(Error::NotConnected)
        ));
    }
}
