//! Event sink toward the platform bridge.
//!
//! The connector never buffers events: every [`ConnectorEvent`] is handed to
//! an [`EventSink`] as soon as it is produced. The bridge decides what to do
//! with it (typically render [`ConnectorEvent::to_value`] and publish it).

use tokio::sync::{broadcast, mpsc};

use crate::events::ConnectorEvent;

/// Receiver of connector events.
///
/// Called from the connector's worker tasks, so implementations must not
/// block for long.
pub trait EventSink: Send + Sync + 'static {
    fn send_event(&self, event: ConnectorEvent);
}

impl EventSink for mpsc::UnboundedSender<ConnectorEvent> {
    fn send_event(&self, event: ConnectorEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Event sink receiver dropped");
        }
    }
}

/// Broadcast fan-out; slow subscribers may miss events under load.
impl EventSink for broadcast::Sender<ConnectorEvent> {
    fn send_event(&self, event: ConnectorEvent) {
        let _ = self.send(event);
    }
}
