//! Error types for the transport layer.

/// Errors that can occur while accepting, reading, or writing
/// connections.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Accepting a new connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(std::io::Error),

    /// Writing to the peer failed.
    #[error("send failed: {0}")]
    SendFailed(std::io::Error),

    /// Reading from the peer failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(std::io::Error),

    /// The connection is already closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}
