//! Error types for the transport module

/// WebSocket connection timeout in seconds
pub(super) const WS_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur on the streaming connection
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionFailed(String),

    #[error(
        "Connection timeout - the service did not respond within {WS_CONNECT_TIMEOUT_SECS} seconds"
    )]
    ConnectionTimeout,

    #[error("Authentication rejected by the recognition service")]
    AuthenticationFailed,

    #[error("Connection is not open")]
    NotReady,

    #[error("Audio buffer full - chunk rejected")]
    Backpressure,
}
