// websocket-client/src/error.rs
use thiserror::Error;

/// Failures on the client side of a connection.
///
/// Apart from `connect`/`send` argument checks these are delivered to
/// error listeners, never returned from the driver's event handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("A non-empty token is required to connect")]
    MissingToken,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    /// Terminal: the driver stopped after this many consecutive failures
    #[error("Gave up after {attempts} consecutive failed connection attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Could not parse frame: {0}")]
    FrameParseError(String),

    #[error("Not connected")]
    NotConnected,
}
