//! Error types for the LLRP connector.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! configuration errors are all captured here.

/// The error type for all connector operations.
///
/// Variants follow the failure modes seen when talking to a reader:
/// socket failures, malformed frames, non-success statuses returned by the
/// reader, and bad configuration handed over by the platform bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (connect refused, socket write failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed LLRP frame or parameter).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The reader answered a request with a non-success `LLRPStatus`.
    ///
    /// `message` is the name of the response message, `code` the raw LLRP
    /// status code and `description` the reader's own error text.
    #[error("reader rejected {message}: status {code} ({description})")]
    Rejected {
        message: String,
        code: u16,
        description: String,
    },

    /// Timed out waiting for the reader.
    #[error("timeout waiting for reader")]
    Timeout,

    /// The configuration for a reader is missing or invalid.
    ///
    /// Fatal for that reader instance: no connection is attempted.
    #[error("configuration error: {0}")]
    Config(String),

    /// No connection to the reader has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the reader was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// The connector has been shut down and accepts no further work.
    #[error("connector closed")]
    Closed,

    /// Another setup attempt for the same reader is still running.
    #[error("setup already in progress")]
    SetupInProgress,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error means the socket itself is unusable.
    ///
    /// Transport failures are retried by the liveness monitor; protocol
    /// failures are retried the same way but logged with the reader's
    /// status text.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Timeout
                | Error::NotConnected
                | Error::ConnectionLost
                | Error::Io(_)
        )
    }
}
