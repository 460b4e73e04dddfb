//! Stream-specific error types for the Betfair SDK.

use thiserror::Error;

/// Stream-specific errors
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Handshake frame missing, undecodable, or carrying an empty connection id
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted without a live transport
    #[error("No stream connection exists")]
    NoConnection,

    /// Credentials rejected by the exchange
    #[error("Authentication failed: {} (code: {})", .message.as_deref().unwrap_or("no message"), .code.as_deref().unwrap_or("none"))]
    AuthenticationFailed {
        code: Option<String>,
        message: Option<String>,
    },

    /// Neither the live nor the integration endpoint was selected
    #[error("Invalid stream endpoint: {0}")]
    InvalidEndpoint(String),

    /// JSON decoding or encoding failure
    #[error("Failed to parse message: {0}")]
    MessageParseError(String),

    /// IO error on the socket
    #[error("IO error: {0}")]
    Io(String),

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Client certificate or private key could not be loaded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Peer closed the socket with no pending data
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Exchange announced it is closing the connection
    #[error("Connection closed by server: {} (code: {})", .message.as_deref().unwrap_or("no message"), .code.as_deref().unwrap_or("none"))]
    ServerClosed {
        code: Option<String>,
        message: Option<String>,
    },

    /// Internal channel closed
    #[error("Internal channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::MessageParseError(err.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err.to_string())
    }
}

impl From<rustls::Error> for StreamError {
    fn from(err: rustls::Error) -> Self {
        StreamError::Tls(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamError::ChannelClosed
    }
}

/// Result type alias for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
