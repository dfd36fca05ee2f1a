//! Bridge runtime error types.

use thiserror::Error;

use hearth_core::{CoreError, StorageError};
use hearth_proto::MessageError;

/// Errors from the bridge runtime.
///
/// Configuration and bind failures are fatal and abort bring-up;
/// everything else is recovered in the coordinator loop (log, drop the
/// packet, continue).
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid configuration (bad address, bad PIN, missing storage)
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket setup or I/O failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Datagram send failure
    #[error("send failed: {0}")]
    Send(String),

    /// DNS-SD responder failure
    #[error("dns-sd error: {0}")]
    Dnssd(String),

    /// Message framing failure
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Protocol core failure
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
