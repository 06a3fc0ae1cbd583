//! Steady-state workers draining the two session queues.
//!
//! Both loops run until the socket reader drops its queue senders.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::commands;
use crate::io::MessageWriter;
use crate::messages::{
    AntennaEvent, LlrpMessage, MessageBody, ReaderEventNotification, RoSpecEventKind,
};
use crate::reporter::Reporter;
use crate::state::ConnectionStatus;

/// Acknowledges keepalives and logs everything else on the control queue.
pub(crate) async fn control_dispatch_loop(
    mut control: mpsc::UnboundedReceiver<LlrpMessage>,
    writer: MessageWriter,
    status: Arc<ConnectionStatus>,
    reporter: Arc<Reporter>,
) {
    while let Some(msg) = control.recv().await {
        handle_control(msg, &writer, &status, &reporter).await;
    }
    tracing::debug!("Control queue closed");
}

async fn handle_control(
    msg: LlrpMessage,
    writer: &MessageWriter,
    status: &ConnectionStatus,
    reporter: &Reporter,
) {
    match &msg.body {
        MessageBody::Keepalive => {
            if let Err(e) = writer.send(&commands::keepalive_ack(msg.message_id)).await {
                reporter.warn(format!("failed to acknowledge keepalive: {}", e));
                return;
            }
            status.stamp_keepalive();
            tracing::trace!(message_id = msg.message_id, "Keepalive acknowledged");
        }
        MessageBody::ReaderEventNotification(n) => log_notification(n, reporter),
        MessageBody::ErrorMessage(s) => {
            reporter.warn(format!("reader sent ERROR_MESSAGE: {}", s));
        }
        MessageBody::RoAccessReport(_) => {
            tracing::debug!("Access report without tags");
        }
        _ => match msg.status() {
            Some(s) if !s.is_success() => {
                reporter.warn(format!("{} reported {}", msg.name(), s));
            }
            Some(s) => tracing::debug!(message = %msg.name(), status = %s, "Response"),
            None => tracing::debug!(message = %msg.name(), "Unhandled message"),
        },
    }
}

fn log_notification(n: &ReaderEventNotification, reporter: &Reporter) {
    if let Some(e) = n.rospec_event {
        let what = match e.kind {
            RoSpecEventKind::Started => "started",
            RoSpecEventKind::Ended => "ended",
            RoSpecEventKind::Preempted => "preempted",
            RoSpecEventKind::Unknown(_) => "changed",
        };
        tracing::debug!(rospec_id = e.rospec_id, "ROSpec {}", what);
    }
    if let Some(e) = n.aispec_event {
        tracing::trace!(rospec_id = e.rospec_id, spec_index = e.spec_index, "AISpec ended");
    }
    if let Some(AntennaEvent {
        connected,
        antenna_id,
    }) = n.antenna_event
    {
        let state = if connected { "connected" } else { "disconnected" };
        reporter.info(format!("antenna {} {}", antenna_id, state));
    }
    if let Some(text) = &n.reader_exception {
        reporter.error(format!("reader exception: {}", text));
    }
    if let Some(fill) = n.buffer_fill_warning {
        reporter.warn(format!("reader report buffer {}% full", fill));
    }
    if n.buffer_overflow {
        reporter.error("reader report buffer overflowed; tag reports lost");
    }
    if n.connection_closed {
        reporter.info("reader is closing the connection");
    }
    if let Some(attempt) = n.connection_attempt {
        tracing::debug!(status = ?attempt, "Connection attempt event after setup");
    }
}

/// Forwards each access report to the sink as one `tagData` event.
pub(crate) async fn tag_dispatch_loop(
    mut tags: mpsc::UnboundedReceiver<LlrpMessage>,
    reporter: Arc<Reporter>,
) {
    while let Some(msg) = tags.recv().await {
        handle_tags(msg, &reporter);
    }
    tracing::debug!("Tag queue closed");
}

fn handle_tags(msg: LlrpMessage, reporter: &Reporter) {
    match msg.body {
        MessageBody::RoAccessReport(tags) if !tags.is_empty() => {
            tracing::trace!(count = tags.len(), "Tag report");
            reporter.tag_data(tags);
        }
        MessageBody::RoAccessReport(_) => reporter.debug("skipping empty tag report"),
        _ => tracing::debug!(message = %msg.name(), "Unexpected message on tag queue"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageType;
    use crate::test_support::*;
    use llrp_core::events::{ConnectorEvent, LogLevel};
    use llrp_test_harness::MockTransport;

    fn reporter() -> (Arc<Reporter>, mpsc::UnboundedReceiver<ConnectorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Reporter::new(
                Arc::new(tx),
                Some(LogLevel::Debug),
                "llrp".into(),
                "reader-1".into(),
            )),
            rx,
        )
    }

    #[tokio::test]
    async fn keepalive_is_acked_with_same_id_and_stamped() {
        let mock = MockTransport::new();
        let log = mock.sent_log();
        let writer = MessageWriter::new(Box::new(mock));
        let status = Arc::new(ConnectionStatus::new());
        let (reporter, _events) = reporter();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(decode(&keepalive(1001))).unwrap();
        tx.send(decode(&status_response(MessageType::DeleteRoSpecResponse, 100)))
            .unwrap();
        tx.send(decode(&keepalive(1002))).unwrap();
        drop(tx);

        control_dispatch_loop(rx, writer, Arc::clone(&status), reporter).await;

        let sent = log.messages();
        assert_eq!(log.message_types(), vec![72, 72]);
        assert_eq!(&sent[0][6..10], &1001u32.to_be_bytes());
        assert_eq!(&sent[1][6..10], &1002u32.to_be_bytes());
        assert!(status.last_keepalive().is_some());
    }

    #[tokio::test]
    async fn failed_ack_does_not_stamp() {
        let writer = MessageWriter::new(Box::new(MockTransport::failing()));
        let status = Arc::new(ConnectionStatus::new());
        let (reporter, mut events) = reporter();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(decode(&keepalive(1))).unwrap();
        drop(tx);
        control_dispatch_loop(rx, writer, Arc::clone(&status), reporter).await;

        assert!(status.last_keepalive().is_none());
        assert!(matches!(events.try_recv(), Ok(ConnectorEvent::Log(_))));
    }

    #[tokio::test]
    async fn rejected_status_is_logged() {
        let writer = MessageWriter::new(Box::new(MockTransport::new()));
        let status = Arc::new(ConnectionStatus::new());
        let (reporter, mut events) = reporter();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(decode(&status_response(MessageType::StopRoSpecResponse, 100)))
            .unwrap();
        drop(tx);
        control_dispatch_loop(rx, writer, status, reporter).await;

        match events.try_recv() {
            Ok(ConnectorEvent::Log(e)) => {
                assert_eq!(e.level, LogLevel::Warn);
                assert!(e.msg.contains("STOP_ROSPEC_RESPONSE"), "{}", e.msg);
            }
            other => panic!("expected warn log, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn tag_reports_become_one_event_each() {
        let (reporter, mut events) = reporter();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(decode(&access_report(1, &["E2801160600002054E3C2A1B", "ABCD"])))
            .unwrap();
        tx.send(decode(&access_report(2, &["300833B2DDD9014000000000"])))
            .unwrap();
        drop(tx);

        tag_dispatch_loop(rx, reporter).await;

        match events.try_recv().unwrap() {
            ConnectorEvent::TagData { reader_id, tags } => {
                assert_eq!(reader_id, "reader-1");
                let ids: Vec<_> = tags.iter().map(|t| t.tag_id.as_str()).collect();
                assert_eq!(ids, vec!["E2801160600002054E3C2A1B", "ABCD"]);
                assert_eq!(tags[0].antenna_id, Some(1));
                assert_eq!(tags[0].peak_rssi, Some(-55));
            }
            other => panic!("expected tag data, got {:?}", other),
        }
        assert!(matches!(
            events.try_recv(),
            Ok(ConnectorEvent::TagData { ref tags, .. }) if tags.len() == 1
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_tag_report_is_skipped() {
        let (reporter, mut events) = reporter();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(decode(&access_report(1, &[]))).unwrap();
        drop(tx);

        tag_dispatch_loop(rx, reporter).await;

        match events.try_recv() {
            Ok(ConnectorEvent::Log(e)) => assert_eq!(e.level, LogLevel::Debug),
            other => panic!("expected debug log, got {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }
}
