#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    #[cfg(feature = "tungstenite")]
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error reported by a custom transport
    Transport(String),
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Reconnection budget was exhausted before a connection opened
    ConnectionFailed {
        /// Number of automatic reconnect attempts made
        attempts: u32,
    },
    /// The connection attempt was superseded by `connect`, `close` or `dispose`
    Abandoned,
    /// The socket has been disposed
    Disposed,
    /// No PONG arrived within the heartbeat timeout
    Timeout,
    /// Subscription stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "tungstenite")]
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Transport(reason) => write!(f, "WebSocket transport error: {reason}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::ConnectionFailed { attempts } => write!(
                f,
                "could not establish connection after {attempts} reconnect attempts"
            ),
            Self::Abandoned => write!(f, "connection attempt was abandoned"),
            Self::Disposed => write!(f, "socket has been disposed"),
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::Lagged { count } => write!(f, "Subscription lagged, missed {count} messages"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "tungstenite")]
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

#[cfg(feature = "tungstenite")]
impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
