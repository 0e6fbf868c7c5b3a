//! Error types for lxishot.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Connection, transfer, framing, and
//! plugin-lookup failures are all captured here.

/// The error type for all lxishot operations.
///
/// Variants follow the phases of a capture: opening the session, sending
/// commands, reading the response back, and taking the response apart.
/// Every one of them is terminal for the capture attempt.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The instrument could not be reached, refused the connection, or
    /// refused to create a device link.
    #[error("connect error: {0}")]
    Connect(String),

    /// A command that must reach the instrument could not be sent.
    #[error("send error: {0}")]
    Send(String),

    /// The response could not be read back from the instrument.
    #[error("receive error: {0}")]
    Receive(String),

    /// The response did not have the expected block-data framing.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The response did not fit in the receive buffer.
    #[error("response exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Size of the receive buffer in bytes.
        limit: usize,
    },

    /// An RPC, XDR, or VXI-11 level error (bad reply, device error code).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the instrument.
    #[error("timeout waiting for response")]
    Timeout,

    /// No session to the instrument is open.
    #[error("not connected")]
    NotConnected,

    /// The instrument closed the connection unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// No registered plugin matches the given name or identification.
    #[error("no plugin found for {0:?}")]
    PluginNotFound(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
