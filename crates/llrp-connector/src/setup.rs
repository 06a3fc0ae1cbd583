//! The connect-time handshake.
//!
//! [`SetupSequence`] writes each request and then waits on the control
//! queue for the matching response type, consuming and discarding whatever
//! else arrives in between. Keepalives seen while waiting are acknowledged
//! on the spot so a slow handshake does not trip the reader's own keepalive
//! supervision.
//!
//! Order:
//!
//! 1. `READER_EVENT_NOTIFICATION` with a successful `ConnectionAttemptEvent`
//! 2. `GET_READER_CAPABILITIES`
//! 3. `SET_READER_CONFIG`, then `GET_READER_CONFIG`
//! 4. `ADD_ROSPEC`, with one stop/disable/delete/re-add cycle on rejection
//! 5. `ENABLE_ROSPEC`, then `ENABLE_EVENTS_AND_REPORTS` (no response)

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use llrp_core::error::{Error, Result};

use crate::commands::{self, ReaderConfigSpec};
use crate::io::MessageWriter;
use crate::messages::{
    ConnectionAttemptStatus, LlrpMessage, MessageBody, MessageType, ReaderCapabilities,
    ReaderConfig,
};
use crate::reporter::Reporter;
use crate::rospec::RoSpec;
use crate::state::{ConnectionState, ConnectionStatus};

/// Fixed inputs of a setup attempt.
#[derive(Debug, Clone)]
pub struct SetupPlan {
    pub rospec: RoSpec,
    pub reader_config: ReaderConfigSpec,
    /// Bound on each wait for a response; `None` waits indefinitely.
    pub step_timeout: Option<Duration>,
}

/// What the handshake learned about the reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupOutcome {
    pub capabilities: Option<ReaderCapabilities>,
    pub reader_config: ReaderConfig,
}

/// What a setup step is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    ConnectionAttempt,
    Response(MessageType),
}

impl Awaiting {
    fn matches(self, msg: &LlrpMessage) -> bool {
        match self {
            Awaiting::ConnectionAttempt => matches!(
                &msg.body,
                MessageBody::ReaderEventNotification(n) if n.connection_attempt.is_some()
            ),
            Awaiting::Response(t) => msg.kind() == Some(t),
        }
    }
}

pub(crate) struct SetupSequence<'a> {
    pub writer: &'a MessageWriter,
    pub control: &'a mut mpsc::UnboundedReceiver<LlrpMessage>,
    pub status: &'a ConnectionStatus,
    pub reporter: &'a Reporter,
    pub plan: &'a SetupPlan,
}

impl SetupSequence<'_> {
    /// Run the whole handshake.
    ///
    /// The caller owns the connection: on error it is expected to close
    /// the socket and leave the connector offline.
    pub async fn run(mut self) -> Result<SetupOutcome> {
        let mut outcome = SetupOutcome::default();

        self.status.set_state(ConnectionState::AwaitConnectEvent);
        self.await_connection_attempt().await?;

        self.status.set_state(ConnectionState::Capabilities);
        outcome.capabilities = self.capabilities().await?;

        self.status.set_state(ConnectionState::Configure);
        self.configure().await?;
        outcome.reader_config = self.read_back_config().await?;
        if let Some(reader_id) = &outcome.reader_config.reader_id {
            self.reporter.set_reader_id(reader_id);
        }
        self.reporter
            .reader_data(outcome.reader_config.antenna_ids.clone());

        self.status.set_state(ConnectionState::AddRoSpec);
        self.add_rospec().await?;

        self.status.set_state(ConnectionState::EnableRoSpec);
        let id = self.writer.next_id();
        self.writer
            .send(&commands::enable_rospec(id, self.plan.rospec.id))
            .await?;
        let resp = self
            .await_message(Awaiting::Response(MessageType::EnableRoSpecResponse))
            .await?;
        check_status(&resp)?;

        let id = self.writer.next_id();
        self.writer
            .send(&commands::enable_events_and_reports(id))
            .await?;

        Ok(outcome)
    }

    async fn await_connection_attempt(&mut self) -> Result<()> {
        let msg = self.await_message(Awaiting::ConnectionAttempt).await?;
        let status = match &msg.body {
            MessageBody::ReaderEventNotification(n) => n.connection_attempt,
            _ => None,
        };
        match status {
            Some(ConnectionAttemptStatus::Success) => {
                self.reporter.debug("reader accepted the connection");
                Ok(())
            }
            Some(other) => Err(Error::Rejected {
                message: "ConnectionAttemptEvent".into(),
                code: other.code(),
                description: format!("{:?}", other),
            }),
            None => Err(Error::Protocol("notification without connection attempt".into())),
        }
    }

    /// Capabilities are informational; a rejected request is logged and
    /// setup continues.
    async fn capabilities(&mut self) -> Result<Option<ReaderCapabilities>> {
        let id = self.writer.next_id();
        self.writer
            .send(&commands::get_reader_capabilities(id))
            .await?;
        let resp = self
            .await_message(Awaiting::Response(
                MessageType::GetReaderCapabilitiesResponse,
            ))
            .await?;

        let MessageBody::GetReaderCapabilitiesResponse {
            status,
            capabilities,
        } = resp.body
        else {
            return Ok(None);
        };
        if !status.is_success() {
            self.reporter
                .warn(format!("GET_READER_CAPABILITIES failed: {}", status));
        }
        if let Some(caps) = &capabilities {
            tracing::debug!(
                max_antennas = caps.max_antennas,
                manufacturer = caps.manufacturer,
                model = caps.model,
                firmware = %caps.firmware_version,
                "Reader capabilities"
            );
        }
        Ok(capabilities)
    }

    /// A rejected `SET_READER_CONFIG` is logged and setup continues.
    async fn configure(&mut self) -> Result<()> {
        let id = self.writer.next_id();
        self.writer
            .send(&commands::set_reader_config(id, &self.plan.reader_config))
            .await?;
        let resp = self
            .await_message(Awaiting::Response(MessageType::SetReaderConfigResponse))
            .await?;
        if let Some(status) = resp.status().filter(|s| !s.is_success()) {
            self.reporter
                .warn(format!("SET_READER_CONFIG failed: {}", status));
        }
        Ok(())
    }

    async fn read_back_config(&mut self) -> Result<ReaderConfig> {
        let id = self.writer.next_id();
        self.writer.send(&commands::get_reader_config(id)).await?;
        let resp = self
            .await_message(Awaiting::Response(MessageType::GetReaderConfigResponse))
            .await?;
        match resp.body {
            MessageBody::GetReaderConfigResponse { status, config } => {
                if !status.is_success() {
                    self.reporter
                        .warn(format!("GET_READER_CONFIG failed: {}", status));
                }
                Ok(config)
            }
            _ => Ok(ReaderConfig::default()),
        }
    }

    async fn add_rospec(&mut self) -> Result<()> {
        let resp = self.send_add().await?;
        let Err(first) = check_status(&resp) else {
            return Ok(());
        };

        self.status.set_state(ConnectionState::ConflictRecovery);
        self.reporter.warn(format!(
            "ADD_ROSPEC rejected ({}); removing stale ROSpec {}",
            first, self.plan.rospec.id
        ));

        let rospec_id = self.plan.rospec.id;
        let steps: [(fn(u32, u32) -> Vec<u8>, MessageType); 3] = [
            (commands::stop_rospec, MessageType::StopRoSpecResponse),
            (commands::disable_rospec, MessageType::DisableRoSpecResponse),
            (commands::delete_rospec, MessageType::DeleteRoSpecResponse),
        ];
        for (build, response) in steps {
            let id = self.writer.next_id();
            self.writer.send(&build(id, rospec_id)).await?;
            let resp = self.await_message(Awaiting::Response(response)).await?;
            if let Some(status) = resp.status() {
                tracing::debug!(response = %response, status = %status, "Conflict recovery");
            }
        }

        self.status.set_state(ConnectionState::AddRoSpec);
        let resp = self.send_add().await?;
        check_status(&resp)
    }

    async fn send_add(&mut self) -> Result<LlrpMessage> {
        let id = self.writer.next_id();
        self.writer
            .send(&commands::add_rospec(id, &self.plan.rospec))
            .await?;
        self.await_message(Awaiting::Response(MessageType::AddRoSpecResponse))
            .await
    }

    /// Pop the control queue until `awaiting` matches.
    async fn await_message(&mut self, awaiting: Awaiting) -> Result<LlrpMessage> {
        let deadline = self.plan.step_timeout.map(|t| Instant::now() + t);
        loop {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.control.recv())
                    .await
                    .map_err(|_| {
                        tracing::warn!(awaiting = ?awaiting, "Setup step timed out");
                        Error::Timeout
                    })?,
                None => self.control.recv().await,
            };
            let msg = next.ok_or(Error::ConnectionLost)?;

            if awaiting.matches(&msg) {
                return Ok(msg);
            }

            match &msg.body {
                MessageBody::Keepalive => {
                    self.status.stamp_keepalive();
                    self.writer
                        .send(&commands::keepalive_ack(msg.message_id))
                        .await?;
                }
                MessageBody::ErrorMessage(status) => {
                    self.reporter
                        .warn(format!("reader sent ERROR_MESSAGE: {}", status));
                }
                _ => {
                    tracing::debug!(
                        message = %msg.name(),
                        awaiting = ?awaiting,
                        "Discarding message during setup"
                    );
                }
            }
        }
    }
}

/// Map a non-success response status to [`Error::Rejected`].
pub(crate) fn check_status(msg: &LlrpMessage) -> Result<()> {
    match msg.status() {
        Some(status) if !status.is_success() => Err(Error::Rejected {
            message: msg.name(),
            code: status.code,
            description: status.description.clone(),
        }),
        _ => Ok(()),
    }
}
