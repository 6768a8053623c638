//! The seam between [`ManagedSocket`](super::ManagedSocket) and the connection it drives.
//!
//! A [`TransportFactory`] opens one connection per call and hands back the
//! handle together with the receiving end of its event channel. The handle
//! reports progress only through that channel: [`TransportEvent::Open`] once
//! usable, then any number of [`TransportEvent::Message`], then exactly one of
//! [`TransportEvent::Closed`] or [`TransportEvent::Error`]. Dropping the sender
//! without a terminal event counts as a close.

use tokio::sync::mpsc;

use crate::Result;
use crate::error::Error;

/// Receiving end of a transport's event channel.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Payload of an inbound message, passed through untouched.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// The text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Lifecycle and data events emitted by a transport handle.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established and accepts messages.
    Open,
    /// An inbound message.
    Message(Payload),
    /// The peer closed the connection.
    Closed {
        /// Close code sent by the peer, if any
        code: Option<u16>,
        /// Close reason sent by the peer, possibly empty
        reason: String,
    },
    /// The connection failed.
    Error(Error),
}

/// A live connection handle, exclusively owned by one socket.
pub trait Transport: Send + Sync {
    /// Send a text message. Fails if the connection can no longer accept messages.
    fn send(&self, message: &str) -> Result<()>;

    /// Start closing the connection. Must be safe to call more than once and
    /// after the connection has already gone away.
    fn close(&self);
}

/// Opens transport handles; called once per connection attempt.
pub trait TransportFactory: Send + Sync + 'static {
    /// Open a new connection to `url`.
    ///
    /// Errors returned here are synchronous construction failures, e.g. a
    /// malformed URL. Failures while connecting are reported as events.
    fn create(&self, url: &str) -> Result<(Box<dyn Transport>, TransportEvents)>;
}

impl<F> TransportFactory for F
where
    F: Fn(&str) -> Result<(Box<dyn Transport>, TransportEvents)> + Send + Sync + 'static,
{
    fn create(&self, url: &str) -> Result<(Box<dyn Transport>, TransportEvents)> {
        self(url)
    }
}
