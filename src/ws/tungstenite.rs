//! [`TransportFactory`] backed by `tokio-tungstenite`.

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, interval_at};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::config::HeartbeatConfig;
use super::error::WsError;
use super::transport::{Payload, Transport, TransportEvent, TransportEvents, TransportFactory};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections with `tokio-tungstenite`.
///
/// Each handle is driven by its own task, so [`TransportFactory::create`] must
/// be called from within a Tokio runtime.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteFactory {
    /// PING/PONG liveness checking, disabled when `None`
    pub heartbeat: Option<HeartbeatConfig>,
}

impl TungsteniteFactory {
    #[must_use]
    pub const fn new() -> Self {
        Self { heartbeat: None }
    }

    #[must_use]
    pub const fn with_heartbeat(heartbeat: HeartbeatConfig) -> Self {
        Self {
            heartbeat: Some(heartbeat),
        }
    }
}

impl TransportFactory for TungsteniteFactory {
    fn create(&self, url: &str) -> Result<(Box<dyn Transport>, TransportEvents)> {
        // Reject malformed URLs up front, before any task is spawned
        let request = url.into_client_request()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(request, command_rx, event_tx, self.heartbeat));

        Ok((Box::new(TungsteniteTransport { command_tx }), event_rx))
    }
}

enum Command {
    Send(String),
    Close,
}

struct TungsteniteTransport {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl Transport for TungsteniteTransport {
    fn send(&self, message: &str) -> Result<()> {
        self.command_tx
            .send(Command::Send(message.to_owned()))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    fn close(&self) {
        _ = self.command_tx.send(Command::Close);
    }
}

/// Connect, then shuttle frames between the socket and the channels until either
/// side goes away.
async fn drive(
    request: Request,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    heartbeat: Option<HeartbeatConfig>,
) {
    let ws_stream = tokio::select! {
        connected = connect_async(request) => match connected {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                _ = event_tx.send(TransportEvent::Error(e.into()));
                return;
            }
        },
        // Handle retired while still connecting
        _ = closed(&mut command_rx) => return,
    };

    if event_tx.send(TransportEvent::Open).is_err() {
        return;
    }

    let terminal = handle_connection(ws_stream, &mut command_rx, &event_tx, heartbeat).await;
    if let Some(event) = terminal {
        _ = event_tx.send(event);
    }
}

/// Resolves once the handle asks to close or is dropped. Messages sent before
/// the connection opened have nowhere to go and are discarded.
async fn closed(command_rx: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = command_rx.recv().await {
        if matches!(command, Command::Close) {
            return;
        }
    }
}

/// Returns the terminal event to report, or `None` when the close was requested
/// by the handle.
async fn handle_connection(
    ws_stream: WsStream,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
    heartbeat: Option<HeartbeatConfig>,
) -> Option<TransportEvent> {
    let (mut write, mut read) = ws_stream.split();
    let mut liveness = heartbeat.map(Liveness::new);

    loop {
        tokio::select! {
            // Handle incoming frames
            frame = read.next() => {
                let payload = match frame {
                    Some(Ok(Message::Text(text))) => Payload::Text(text.to_string()),
                    Some(Ok(Message::Binary(bytes))) => Payload::Binary(bytes.to_vec()),
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(liveness) = liveness.as_mut() {
                            liveness.pong();
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_owned()))
                            .unwrap_or_default();
                        return Some(TransportEvent::Closed { code, reason });
                    }
                    Some(Ok(_)) => {
                        // PING frames are answered by tungstenite itself
                        continue;
                    }
                    Some(Err(e)) => return Some(TransportEvent::Error(e.into())),
                    None => {
                        return Some(TransportEvent::Closed {
                            code: None,
                            reason: String::new(),
                        });
                    }
                };

                #[cfg(feature = "tracing")]
                tracing::trace!(?payload, "Received WebSocket message");

                if event_tx.send(TransportEvent::Message(payload)).is_err() {
                    // Nobody is listening anymore
                    _ = write.close().await;
                    return None;
                }
            }

            // Handle outgoing messages and close requests from the handle
            command = command_rx.recv() => {
                match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            return Some(TransportEvent::Error(e.into()));
                        }
                    }
                    Some(Command::Close) | None => {
                        _ = write.send(Message::Close(None)).await;
                        _ = write.close().await;
                        return None;
                    }
                }
            }

            // Send PINGs and watch for missing PONGs
            () = tick(liveness.as_mut()) => {
                let Some(liveness) = liveness.as_mut() else {
                    continue;
                };
                if liveness.expired() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "Heartbeat timeout: no PONG received within {:?}",
                        liveness.timeout
                    );
                    return Some(TransportEvent::Error(WsError::Timeout.into()));
                }
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    return Some(TransportEvent::Error(e.into()));
                }
                liveness.ping();
            }
        }
    }
}

/// Resolves on the next heartbeat tick, or never without a heartbeat.
async fn tick(liveness: Option<&mut Liveness>) {
    match liveness {
        Some(liveness) => {
            liveness.interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

struct Liveness {
    interval: Interval,
    timeout: std::time::Duration,
    /// When the oldest unanswered PING was sent
    awaiting_since: Option<Instant>,
}

impl Liveness {
    fn new(config: HeartbeatConfig) -> Self {
        Self {
            interval: interval_at(Instant::now() + config.interval, config.interval),
            timeout: config.timeout,
            awaiting_since: None,
        }
    }

    fn ping(&mut self) {
        self.awaiting_since.get_or_insert_with(Instant::now);
    }

    fn pong(&mut self) {
        self.awaiting_since = None;
    }

    fn expired(&self) -> bool {
        self.awaiting_since
            .is_some_and(|since| since.elapsed() >= self.timeout)
    }
}
