//! [`ReaderConnector`] -- one reader, end to end.
//!
//! The connector owns the reader's connection across its whole life: it
//! opens the TCP session, runs the setup handshake, spawns the socket
//! reader and both dispatchers, supervises liveness, and runs the close
//! sequence. Each setup attempt creates a new connection generation; a
//! socket reader from an older generation never touches the current one.

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use llrp_core::error::{Error, Result};
use llrp_core::sink::EventSink;
use llrp_transport::TcpTransport;

use crate::builder::{ConnectorBuilder, ConnectorSettings};
use crate::commands::{self, ReaderConfigSpec};
use crate::config::ConnectorConfig;
use crate::dispatch;
use crate::frame::FrameDecoder;
use crate::io::{self, MessageWriter, QueueSenders, ReadExit, Session};
use crate::messages::ReaderCapabilities;
use crate::monitor::{self, Reconnector};
use crate::reporter::Reporter;
use crate::rospec::RoSpec;
use crate::setup::{SetupPlan, SetupSequence};
use crate::state::{ConnectionState, ConnectionStatus};

/// What the last successful setup learned about the reader.
#[derive(Debug, Clone, Default)]
struct ReaderSnapshot {
    capabilities: Option<ReaderCapabilities>,
    antenna_ids: Vec<u16>,
}

/// Releases the setup slot when an attempt ends.
struct SetupSlot<'a>(&'a ConnectionStatus);

impl Drop for SetupSlot<'_> {
    fn drop(&mut self) {
        self.0.end_setup();
    }
}

struct Inner {
    config: ConnectorConfig,
    settings: ConnectorSettings,
    plan: SetupPlan,
    status: Arc<ConnectionStatus>,
    reporter: Arc<Reporter>,
    session: Mutex<Option<Session>>,
    snapshot: RwLock<ReaderSnapshot>,
    me: Weak<Inner>,
}

impl Inner {
    /// Run one setup attempt; fails with [`Error::SetupInProgress`] if
    /// another is already in flight.
    async fn attempt_setup(self: &Arc<Self>) -> Result<()> {
        if self.status.is_terminated() {
            return Err(Error::Closed);
        }
        if !self.status.try_begin_setup() {
            return Err(Error::SetupInProgress);
        }
        let _slot = SetupSlot(&self.status);

        let result = self.run_setup().await;
        if let Err(e) = &result {
            self.reporter.error(format!(
                "setup of reader at {} failed: {}",
                self.config.addr(),
                e
            ));
            self.teardown(ConnectionState::Offline).await;
        }
        result
    }

    async fn run_setup(self: &Arc<Self>) -> Result<()> {
        // The previous socket is always closed before a new generation starts.
        self.teardown(ConnectionState::Connecting).await;

        let addr = self.config.addr();
        let (transport, read_half) =
            TcpTransport::connect_with_timeout(&addr, self.settings.connect_timeout).await?;

        let generation = self.status.next_generation();
        let writer = MessageWriter::new(Box::new(transport));
        let (senders, queues) = io::queues();
        let (close_tx, close_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let reader_task = tokio::spawn(run_socket_reader(
            self.me.clone(),
            generation,
            FrameDecoder::new(read_half),
            senders,
            close_tx,
            cancel.clone(),
        ));
        let tag_task = tokio::spawn(dispatch::tag_dispatch_loop(
            queues.tags,
            Arc::clone(&self.reporter),
        ));
        let mut control = queues.control;

        {
            let mut slot = self.session.lock().await;
            if self.status.is_terminated() {
                cancel.cancel();
                return Err(Error::Closed);
            }
            *slot = Some(Session {
                generation,
                writer: writer.clone(),
                cancel,
                closed: Some(close_rx),
                tasks: vec![reader_task, tag_task],
            });
        }

        let outcome = SetupSequence {
            writer: &writer,
            control: &mut control,
            status: &self.status,
            reporter: &self.reporter,
            plan: &self.plan,
        }
        .run()
        .await?;

        if let Ok(mut snapshot) = self.snapshot.write() {
            snapshot.capabilities = outcome.capabilities;
            snapshot.antenna_ids = outcome.reader_config.antenna_ids;
        }

        {
            let mut slot = self.session.lock().await;
            let Some(session) = slot.as_mut().filter(|s| s.generation == generation) else {
                return Err(Error::ConnectionLost);
            };
            if !self.status.set_state(ConnectionState::Online) {
                return Err(Error::Closed);
            }
            self.status.stamp_keepalive();
            session.tasks.push(tokio::spawn(dispatch::control_dispatch_loop(
                control,
                writer,
                Arc::clone(&self.status),
                Arc::clone(&self.reporter),
            )));
        }

        if self.status.swap_reader_offline(false) {
            self.reporter.reader_status(true);
        }
        self.reporter
            .info(format!("reader at {} online", self.config.addr()));
        Ok(())
    }

    /// Drop the current session without the close handshake.
    async fn teardown(&self, next: ConnectionState) {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            session.force_close().await;
        }
        self.status.set_state(next);
        self.mark_offline();
    }

    /// The close sequence: best-effort ROSpec removal and
    /// `CLOSE_CONNECTION` if online, then drop the session.
    async fn shutdown(&self, next: ConnectionState) {
        let session = self.session.lock().await.take();
        let Some(mut session) = session else {
            self.status.set_state(next);
            self.mark_offline();
            return;
        };

        if self.status.state() == ConnectionState::Online {
            self.status.set_state(ConnectionState::Stopping);
            self.close_handshake(&mut session).await;
        }

        session.force_close().await;
        session.join().await;
        self.status.set_state(next);
        self.mark_offline();
        self.reporter
            .info(format!("connection to reader at {} closed", self.config.addr()));
    }

    async fn close_handshake(&self, session: &mut Session) {
        let writer = &session.writer;
        let rospec_id = self.plan.rospec.id;
        let steps: [fn(u32, u32) -> Vec<u8>; 3] = [
            commands::stop_rospec,
            commands::disable_rospec,
            commands::delete_rospec,
        ];
        for build in steps {
            if let Err(e) = writer.send(&build(writer.next_id(), rospec_id)).await {
                self.reporter
                    .warn(format!("close sequence aborted: {}", e));
                return;
            }
            tokio::time::sleep(self.settings.close_step_pause).await;
        }

        if let Err(e) = writer.send(&commands::close_connection(writer.next_id())).await {
            self.reporter
                .warn(format!("CLOSE_CONNECTION not sent: {}", e));
            return;
        }

        let Some(closed) = session.closed.take() else {
            return;
        };
        let answered = match self.settings.close_timeout {
            Some(limit) => tokio::time::timeout(limit, closed)
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false),
            None => closed.await.is_ok(),
        };
        if !answered {
            tracing::debug!("No CLOSE_CONNECTION_RESPONSE before the socket closed");
        }
    }

    /// Called by a socket reader when its loop ends.
    ///
    /// A `CLOSE_CONNECTION_RESPONSE` outside the close sequence counts as a
    /// lost connection.
    async fn on_reader_exit(&self, generation: u64, exit: ReadExit) {
        if matches!(exit, ReadExit::Cancelled) || !self.status.is_current(generation) {
            return;
        }
        let state = self.status.state();
        if matches!(
            state,
            ConnectionState::Stopping | ConnectionState::Terminated
        ) {
            return;
        }

        let reason = match &exit {
            ReadExit::Failed(e) => e.to_string(),
            ReadExit::CloseResponse => "unrequested CLOSE_CONNECTION_RESPONSE".to_string(),
            _ => "reader closed the connection".to_string(),
        };
        self.reporter.warn(format!(
            "connection to reader at {} lost: {}",
            self.config.addr(),
            reason
        ));

        let session = {
            let mut slot = self.session.lock().await;
            if slot.as_ref().is_some_and(|s| s.generation == generation) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(mut session) = session {
            session.force_close().await;
        }

        // A setup attempt in progress sees its queue close and fails on its own.
        if !state.is_setting_up() {
            self.status.set_state(ConnectionState::Offline);
        }
        self.mark_offline();
    }

    /// Flip to offline, emitting `readerStatus` only on the transition.
    fn mark_offline(&self) {
        if !self.status.swap_reader_offline(true) {
            self.reporter.reader_status(false);
        }
    }

    fn spawn_setup(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = me.attempt_setup().await {
                tracing::debug!(error = %e, "Background setup attempt failed");
            }
        });
    }
}

async fn run_socket_reader(
    owner: Weak<Inner>,
    generation: u64,
    decoder: FrameDecoder<tokio::net::tcp::OwnedReadHalf>,
    senders: QueueSenders,
    close_tx: oneshot::Sender<()>,
    cancel: CancellationToken,
) {
    let exit = io::socket_read_loop(decoder, senders, close_tx, cancel).await;
    if let Some(inner) = owner.upgrade() {
        inner.on_reader_exit(generation, exit).await;
    }
}

#[async_trait]
impl Reconnector for Inner {
    fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    async fn reconnect(&self) {
        self.teardown(ConnectionState::Offline).await;
        self.spawn_setup();
    }
}

/// A connector for one LLRP reader.
///
/// Create with [`ReaderConnector::new`], [`ReaderConnector::from_value`] or
/// a [`ConnectorBuilder`], then call [`setup`](Self::setup). Events flow to
/// the [`EventSink`] given at construction.
pub struct ReaderConnector {
    inner: Arc<Inner>,
    monitor: std::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ReaderConnector {
    /// Connector with default settings.
    pub fn new(config: ConnectorConfig, sink: impl EventSink) -> Self {
        Self::with_settings(config, ConnectorSettings::default(), Arc::new(sink))
    }

    /// Connector from the bridge's configuration document.
    pub fn from_value(value: &Value, sink: impl EventSink) -> Result<Self> {
        ConnectorBuilder::from_value(value)?.build(sink)
    }

    pub fn builder(config: ConnectorConfig) -> ConnectorBuilder {
        ConnectorBuilder::new(config)
    }

    pub(crate) fn with_settings(
        config: ConnectorConfig,
        settings: ConnectorSettings,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let plan = SetupPlan {
            rospec: RoSpec::continuous(
                settings.rospec_id,
                settings.rospec_priority,
                config.tag_read_interval,
            ),
            reader_config: ReaderConfigSpec {
                keepalive_period: settings.keepalive_period,
                report_every_n_tags: settings.report_every_n_tags,
            },
            step_timeout: settings.setup_step_timeout,
        };
        let reporter = Arc::new(Reporter::new(
            sink,
            config.log_level,
            config.source_name.clone(),
            config.hostname.clone(),
        ));

        let inner = Arc::new_cyclic(|me| Inner {
            config,
            settings,
            plan,
            status: Arc::new(ConnectionStatus::new()),
            reporter,
            session: Mutex::new(None),
            snapshot: RwLock::new(ReaderSnapshot::default()),
            me: me.clone(),
        });

        ReaderConnector {
            inner,
            monitor: std::sync::Mutex::new(None),
        }
    }

    /// Connect and run the setup handshake.
    ///
    /// Also starts the liveness monitor, which keeps retrying in the
    /// background whether or not this first attempt succeeds. Returns
    /// [`Error::SetupInProgress`] if a background attempt is already
    /// running; its outcome shows up as a `readerStatus` event.
    pub async fn setup(&self) -> Result<()> {
        if self.inner.status.is_terminated() {
            return Err(Error::Closed);
        }
        self.start_monitor();
        self.inner.attempt_setup().await
    }

    /// Shut the connector down for good. Idempotent.
    ///
    /// If the reader is online, its ROSpec is stopped, disabled and deleted
    /// and the connection closed politely; otherwise no I/O is performed.
    /// The wait for `CLOSE_CONNECTION_RESPONSE` is bounded by
    /// [`ConnectorSettings::close_timeout`] (30 s by default, `None` waits
    /// until the reader answers or drops the socket). Returns once every
    /// tag report already received has been forwarded to the sink.
    pub async fn close(&self) {
        self.stop_monitor();
        self.inner.shutdown(ConnectionState::Terminated).await;
    }

    /// The sink can no longer take events: close the reader connection and
    /// suspend reconnection.
    pub async fn notify_sink_offline(&self) {
        self.inner.status.set_sink_available(false);
        self.inner.shutdown(ConnectionState::Offline).await;
    }

    /// The sink is back: allow reconnection and try right away if offline.
    pub fn notify_sink_online(&self) {
        let status = &self.inner.status;
        status.set_sink_available(true);
        if !status.is_terminated() && status.reader_offline() && !status.setup_in_flight() {
            self.inner.spawn_setup();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.state()
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectionState::Online
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// The reader's identification, or its hostname before the first setup.
    pub fn reader_id(&self) -> String {
        self.inner.reporter.reader_id()
    }

    pub fn antenna_ids(&self) -> Vec<u16> {
        self.inner
            .snapshot
            .read()
            .map(|s| s.antenna_ids.clone())
            .unwrap_or_default()
    }

    pub fn capabilities(&self) -> Option<ReaderCapabilities> {
        self.inner
            .snapshot
            .read()
            .ok()
            .and_then(|s| s.capabilities.clone())
    }

    fn start_monitor(&self) {
        let Ok(mut monitor) = self.monitor.lock() else {
            return;
        };
        if monitor.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let interval = self.inner.settings.reconnect_interval;
        let handle = tokio::spawn(monitor::liveness_loop(
            Arc::clone(&self.inner) as Arc<dyn Reconnector>,
            interval,
            interval,
            cancel.clone(),
        ));
        *monitor = Some((cancel, handle));
    }

    fn stop_monitor(&self) {
        if let Ok(mut monitor) = self.monitor.lock() {
            if let Some((cancel, _handle)) = monitor.take() {
                cancel.cancel();
            }
        }
    }
}

impl Drop for ReaderConnector {
    fn drop(&mut self) {
        self.stop_monitor();
        if let Ok(mut slot) = self.inner.session.try_lock() {
            // Dropping the session cancels its socket reader.
            slot.take();
        }
    }
}
