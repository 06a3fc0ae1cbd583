//! Keepalive watchdog.
//!
//! Every interval the monitor checks when the reader last sent a keepalive.
//! If that is longer ago than the threshold and the sink can take events,
//! it asks its [`Reconnector`] to drop the current connection and start a
//! fresh setup attempt. This is the only automatic retry path: a failed
//! setup leaves the keepalive stale, so the next tick retries it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::state::ConnectionStatus;

/// Target of the liveness monitor.
#[async_trait]
pub trait Reconnector: Send + Sync + 'static {
    fn status(&self) -> &ConnectionStatus;

    /// Force-close the current connection and launch a setup attempt.
    ///
    /// Must not wait for the attempt to finish.
    async fn reconnect(&self);
}

/// Whether a tick should trigger a reconnect.
pub fn should_reconnect(status: &ConnectionStatus, now: Instant, threshold: Duration) -> bool {
    !status.is_terminated()
        && status.sink_available()
        && !status.setup_in_flight()
        && status.keepalive_expired(now, threshold)
}

/// Run the watchdog until `cancel` fires or the connector terminates.
pub async fn liveness_loop(
    target: Arc<dyn Reconnector>,
    interval: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let status = target.status();
        if status.is_terminated() {
            break;
        }
        if should_reconnect(status, Instant::now(), threshold) {
            tracing::info!(
                since_keepalive = ?status.last_keepalive().map(|t| t.elapsed()),
                "Keepalive overdue; reconnecting"
            );
            target.reconnect().await;
        }
    }
    tracing::debug!("Liveness monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        status: ConnectionStatus,
        attempts: AtomicUsize,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                status: ConnectionStatus::new(),
                attempts: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reconnector for Counting {
        fn status(&self) -> &ConnectionStatus {
            &self.status
        }

        async fn reconnect(&self) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            // A successful attempt restarts the keepalive window.
            self.status.stamp_keepalive();
        }
    }

    const TICK: Duration = Duration::from_secs(10);

    fn spawn(target: &Arc<Counting>) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(liveness_loop(
            Arc::clone(target) as Arc<dyn Reconnector>,
            TICK,
            TICK,
            cancel.clone(),
        ));
        (cancel, handle)
    }

    /// Let the monitor task run after a clock advance.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_keepalives_prevent_reconnect() {
        let target = Counting::new();
        target.status.stamp_keepalive();
        let (cancel, handle) = spawn(&target);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(5)).await;
            target.status.stamp_keepalive();
            settle().await;
        }
        assert_eq!(target.attempts(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_keepalive_triggers_exactly_one_attempt() {
        let target = Counting::new();
        tokio::time::advance(Duration::from_secs(1)).await;
        target.status.stamp_keepalive();
        let (cancel, handle) = spawn(&target);

        // First tick: keepalive is exactly at the threshold, not past it.
        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(target.attempts(), 0);

        // Second tick: 20 s since the last keepalive.
        tokio::time::advance(TICK).await;
        settle().await;
        assert_eq!(target.attempts(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sink_offline_suppresses_reconnect() {
        let target = Counting::new();
        target.status.set_sink_available(false);
        let (cancel, handle) = spawn(&target);

        for _ in 0..3 {
            tokio::time::advance(TICK).await;
            settle().await;
        }
        assert_eq!(target.attempts(), 0);

        target.status.set_sink_available(true);
        tokio::time::advance(TICK).await;
        settle().await;
        assert_eq!(target.attempts(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn setup_in_flight_suppresses_reconnect() {
        let target = Counting::new();
        assert!(target.status.try_begin_setup());
        let (cancel, handle) = spawn(&target);

        tokio::time::advance(TICK).await;
        settle().await;
        assert_eq!(target.attempts(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_connector_stops_monitor() {
        let target = Counting::new();
        let (_cancel, handle) = spawn(&target);
        target.status.set_state(ConnectionState::Terminated);

        tokio::time::advance(TICK).await;
        handle.await.unwrap();
        assert_eq!(target.attempts(), 0);
    }

    #[test]
    fn never_seen_keepalive_counts_as_overdue() {
        let status = ConnectionStatus::new();
        assert!(should_reconnect(&status, Instant::now(), TICK));
        status.set_sink_available(false);
        assert!(!should_reconnect(&status, Instant::now(), TICK));
    }
}
