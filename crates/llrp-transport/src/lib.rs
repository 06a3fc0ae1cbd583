//! Transport implementations for the LLRP connector.
//!
//! This crate provides [`TcpTransport`], the concrete implementation of the
//! [`Transport`](llrp_core::Transport) trait used against real readers.
//! Readers speak LLRP over a plain TCP socket (port [`LLRP_PORT`] by
//! default); the read half of the socket is returned separately so that the
//! connector's socket reader can own it.

pub mod tcp;

pub use tcp::{LLRP_PORT, TcpTransport};
