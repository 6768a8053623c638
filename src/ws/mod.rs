//! Managed WebSocket connections.
//!
//! # Architecture
//!
//! - [`ManagedSocket`]: connection lifecycle, outbound queuing and reconnection with backoff
//! - [`Signal`]: observer lists through which the socket reports status changes and messages
//! - [`TransportFactory`] / [`Transport`]: the seam to the underlying connection, implemented
//!   for `tokio-tungstenite` by [`TungsteniteFactory`]
//!
//! # Example
//!
//! ```ignore
//! let socket = ManagedSocket::new(Options::builder().url(endpoint).build())?;
//! socket.status_changed().connect(|status| println!("{status}"));
//! socket.connect().await?;
//! socket.send(r#"{"msg_type": "kernel_info_request"}"#);
//! ```

pub mod config;
pub mod error;
pub mod signal;
pub mod socket;
pub mod transport;
#[cfg(feature = "tungstenite")]
pub mod tungstenite;

#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use signal::{Signal, SlotId};
pub use socket::{ManagedSocket, Options, Status};
pub use transport::{Payload, Transport, TransportEvent, TransportEvents, TransportFactory};
#[cfg(feature = "tungstenite")]
pub use tungstenite::TungsteniteFactory;
