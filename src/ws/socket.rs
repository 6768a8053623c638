#![expect(
    clippy::module_name_repetitions,
    reason = "Socket types expose their domain in the name for clarity"
)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use bon::Builder;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::config::ReconnectConfig;
use super::error::WsError;
use super::signal::Signal;
use super::transport::{Payload, Transport, TransportEvent, TransportEvents, TransportFactory};
use crate::Result;
use crate::config::{ConfigProvider, PageConfig};
use crate::endpoint;

/// Name of the configuration option holding the default token.
pub const TOKEN_OPTION: &str = "token";

/// Lifecycle state of a [`ManagedSocket`].
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    /// No connection, either never connected, closed on request, or given up
    Closed,
    /// A connection attempt is in flight or a reconnect is scheduled
    Connecting,
    /// Connected; sends go straight to the transport
    Open,
}

/// Options for [`ManagedSocket::new`].
///
/// # Example
///
/// ```
/// use managed_socket::ws::Options;
///
/// let options = Options::builder()
///     .url("ws://localhost:8888/api/kernels/1/channels")
///     .token("secret")
///     .build();
/// assert_eq!(options.url, "ws://localhost:8888/api/kernels/1/channels");
/// ```
#[non_exhaustive]
#[derive(Builder)]
pub struct Options {
    /// Endpoint the socket connects to.
    #[builder(into)]
    pub url: String,
    /// Token appended to the URL; defaults to the `token` configuration option.
    #[builder(into)]
    pub token: Option<String>,
    /// Transport constructor; defaults to the tungstenite transport.
    pub factory: Option<Arc<dyn TransportFactory>>,
    /// Where the default token is looked up; defaults to [`PageConfig`].
    pub config: Option<Arc<dyn ConfigProvider>>,
    /// Reconnection policy.
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

/// A WebSocket connection that queues outbound messages while disconnected and
/// reconnects with exponential backoff after unexpected loss.
///
/// `connect`, `close` and dispatching of transport events must happen inside a
/// Tokio runtime, since transports and backoff timers run as tasks.
///
/// Slots connected to [`ManagedSocket::status_changed`] and
/// [`ManagedSocket::message_received`] are called without the socket's lock
/// held and may call back into the socket; values they cause to be emitted
/// are delivered after they return.
///
/// Dropping the socket disposes it.
///
/// # Example
///
/// ```rust, no_run
/// use managed_socket::ws::{ManagedSocket, Options};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let socket = ManagedSocket::new(
///         Options::builder()
///             .url("ws://localhost:8888/api/kernels/1/channels")
///             .build(),
///     )?;
///
///     socket.message_received().connect(|payload| {
///         println!("received {payload:?}");
///     });
///
///     socket.send("queued until the connection opens");
///     socket.connect().await?;
///
///     Ok(())
/// }
/// ```
pub struct ManagedSocket {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    token: SecretString,
    factory: Arc<dyn TransportFactory>,
    reconnect: ReconnectConfig,
    state: Mutex<State>,
    status_changed: Signal<Status>,
    message_received: Signal<Payload>,
}

struct State {
    status: Status,
    pending: VecDeque<String>,
    reconnect_attempt: u32,
    backoff: ExponentialBackoff,
    /// Bumped whenever a transport is created or retired; events and timers
    /// carrying an older value are ignored
    generation: u64,
    live: Option<Live>,
    reconnect_timer: Option<JoinHandle<()>>,
    outcome: Option<oneshot::Sender<Result<()>>>,
    /// Emissions produced under the lock, delivered after it is released
    events: VecDeque<SocketEvent>,
    emitting: bool,
    disposed: bool,
}

struct Live {
    transport: Box<dyn Transport>,
    pump: JoinHandle<()>,
}

impl Live {
    /// Stop listening to the transport before closing it, so its close event is
    /// never observed.
    fn retire(self) {
        self.pump.abort();
        self.transport.close();
    }
}

enum SocketEvent {
    Status(Status),
    Message(Payload),
}

impl ManagedSocket {
    /// Create a socket. No connection is attempted until [`ManagedSocket::connect`].
    pub fn new(options: Options) -> Result<Self> {
        let factory = match options.factory {
            Some(factory) => factory,
            None => default_factory()?,
        };

        let token = match options.token {
            Some(token) => token,
            None => match options.config {
                Some(config) => config.get_option(TOKEN_OPTION),
                None => PageConfig.get_option(TOKEN_OPTION),
            },
        };

        let backoff = ExponentialBackoff::from(&options.reconnect);

        Ok(Self {
            inner: Arc::new(Inner {
                url: options.url,
                token: SecretString::from(token),
                factory,
                reconnect: options.reconnect,
                state: Mutex::new(State {
                    status: Status::Closed,
                    pending: VecDeque::new(),
                    reconnect_attempt: 0,
                    backoff,
                    generation: 0,
                    live: None,
                    reconnect_timer: None,
                    outcome: None,
                    events: VecDeque::new(),
                    emitting: false,
                    disposed: false,
                }),
                status_changed: Signal::new(),
                message_received: Signal::new(),
            }),
        })
    }

    /// The endpoint this socket connects to, without the token.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.lock().status
    }

    /// Number of messages waiting for the connection to open.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Consecutive automatic reconnect attempts in the current cycle.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.lock().reconnect_attempt
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Emits the new status once per transition.
    #[must_use]
    pub fn status_changed(&self) -> &Signal<Status> {
        &self.inner.status_changed
    }

    /// Emits every inbound message, in the order the transport delivered them.
    #[must_use]
    pub fn message_received(&self) -> &Signal<Payload> {
        &self.inner.message_received
    }

    /// Start a new connection cycle.
    ///
    /// Any live connection or scheduled reconnect is torn down first and the
    /// attempt counter starts over. The status becomes
    /// [`Status::Connecting`] before this returns.
    ///
    /// The returned future resolves once the connection opens, or fails with
    /// [`WsError::ConnectionFailed`] when every reconnect attempt has been used
    /// up. If a later `connect`, `close` or `dispose` supersedes this cycle, it
    /// fails with [`WsError::Abandoned`].
    pub fn connect(&self) -> impl Future<Output = Result<()>> + Send + 'static + use<> {
        let outcome = self.inner.begin_cycle();

        async move {
            outcome
                .await
                .unwrap_or_else(|_| Err(WsError::Abandoned.into()))
        }
    }

    /// Send a message, or queue it until the connection opens.
    ///
    /// Never fails: a message the transport refuses is queued for the next
    /// connection instead. Messages leave in the order they were accepted.
    pub fn send<S: Into<String>>(&self, message: S) {
        let message = message.into();
        let mut state = self.inner.lock();

        if state.disposed {
            #[cfg(feature = "tracing")]
            tracing::debug!("Dropping message sent to a disposed socket");
            return;
        }

        state.pending.push_back(message);
        if state.status == Status::Open {
            // Anything left over from a failed drain goes out first
            state.drain();
        }
    }

    /// Close the connection without reconnecting.
    ///
    /// Queued messages are kept for the next [`ManagedSocket::connect`]. Does
    /// nothing when there is no connection and no reconnect scheduled.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.live.is_none() && state.reconnect_timer.is_none() {
            return;
        }

        state.retire();
        state.outcome = None;
        state.reset_attempts();
        state.set_status(Status::Closed);
        self.inner.flush(state);
    }

    /// Close the connection, drop queued messages and disconnect all slots.
    /// Safe to call more than once; also runs on drop.
    pub fn dispose(&self) {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }

        state.disposed = true;
        state.retire();
        state.outcome = None;
        state.pending.clear();
        state.set_status(Status::Closed);
        self.inner.flush(state);

        self.inner.status_changed.disconnect_all();
        self.inner.message_received.disconnect_all();
    }
}

impl Drop for ManagedSocket {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ManagedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ManagedSocket")
            .field("url", &endpoint::redact(&self.inner.url))
            .field("status", &state.status)
            .field("pending", &state.pending.len())
            .field("reconnect_attempt", &state.reconnect_attempt)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tungstenite")]
fn default_factory() -> Result<Arc<dyn TransportFactory>> {
    Ok(Arc::new(super::tungstenite::TungsteniteFactory::default()))
}

#[cfg(not(feature = "tungstenite"))]
fn default_factory() -> Result<Arc<dyn TransportFactory>> {
    Err(crate::error::Error::validation(
        "a transport factory is required without the `tungstenite` feature",
    ))
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_cycle(self: &Arc<Self>) -> oneshot::Receiver<Result<()>> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let mut state = self.lock();

        if state.disposed {
            _ = outcome_tx.send(Err(WsError::Disposed.into()));
            return outcome_rx;
        }

        state.retire();
        state.reset_attempts();
        state.set_status(Status::Connecting);
        // Replacing the sender abandons the previous cycle's outcome
        state.outcome = Some(outcome_tx);

        if let Err(e) = self.open_transport(&mut state) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Unable to create transport");
            state.set_status(Status::Closed);
            state.settle(Err(e));
        }

        self.flush(state);
        outcome_rx
    }

    fn open_transport(self: &Arc<Self>, state: &mut State) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!(url = %endpoint::redact(&self.url), "Starting websocket");

        let url = endpoint::with_token(&self.url, self.token.expose_secret());
        let (transport, events) = self.factory.create(&url)?;

        state.generation += 1;
        let pump = tokio::spawn(pump(Arc::downgrade(self), state.generation, events));
        state.live = Some(Live { transport, pump });

        Ok(())
    }

    /// Apply one transport event. Returns `false` once the transport that
    /// produced it is no longer current.
    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }

        let current = match event {
            TransportEvent::Open => {
                Self::on_open(&mut state);
                true
            }
            TransportEvent::Message(payload) => {
                state.events.push_back(SocketEvent::Message(payload));
                true
            }
            TransportEvent::Closed { code, reason } => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?code, %reason, "Transport closed");
                #[cfg(not(feature = "tracing"))]
                let _ = (&code, &reason);
                self.on_lost(&mut state);
                false
            }
            TransportEvent::Error(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "Transport failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.on_lost(&mut state);
                false
            }
        };

        self.flush(state);
        current
    }

    fn on_open(state: &mut State) {
        state.reset_attempts();
        state.set_status(Status::Open);
        state.drain();
        state.settle(Ok(()));
    }

    fn on_lost(self: &Arc<Self>, state: &mut State) {
        if let Some(live) = state.live.take() {
            // The pump calling us exits on its own
            live.transport.close();
        }
        state.generation += 1;

        if state.reconnect_attempt >= self.reconnect.max_attempts {
            #[cfg(feature = "tracing")]
            tracing::error!(
                attempts = state.reconnect_attempt,
                "Connection lost, giving up"
            );
            let attempts = state.reconnect_attempt;
            state.set_status(Status::Closed);
            state.settle(Err(WsError::ConnectionFailed { attempts }.into()));
            return;
        }

        let delay = state
            .backoff
            .next_backoff()
            .unwrap_or(self.reconnect.max_backoff);
        #[cfg(feature = "tracing")]
        tracing::error!("Connection lost, reconnecting in {delay:?}");

        state.reconnect_attempt += 1;
        state.set_status(Status::Connecting);

        let inner = Arc::downgrade(self);
        let generation = state.generation;
        state.reconnect_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            if let Some(socket) = inner.upgrade() {
                socket.reconnect(generation);
            }
        }));
    }

    fn reconnect(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        // This task owns the handle; it finishes right after
        state.reconnect_timer = None;

        if let Err(e) = self.open_transport(&mut state) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Unable to create transport");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
            self.on_lost(&mut state);
        }

        self.flush(state);
    }

    /// Deliver queued emissions in order. Only one caller delivers at a time;
    /// anything queued meanwhile, including by slots, is picked up by that
    /// caller before it returns.
    fn flush<'a>(&'a self, mut state: MutexGuard<'a, State>) {
        if state.emitting {
            return;
        }
        state.emitting = true;
        let mut emitting = Emitting {
            inner: self,
            armed: true,
        };

        while let Some(event) = state.events.pop_front() {
            drop(state);
            match &event {
                SocketEvent::Status(status) => self.status_changed.emit(status),
                SocketEvent::Message(payload) => self.message_received.emit(payload),
            }
            state = self.lock();
        }

        // Cleared under the same lock that saw the queue empty
        state.emitting = false;
        emitting.armed = false;
    }
}

/// Clears `State::emitting` if delivery unwinds, so later events still go out.
struct Emitting<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for Emitting<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().emitting = false;
        }
    }
}

impl State {
    /// Cancel any scheduled reconnect and detach from the live transport.
    fn retire(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(live) = self.live.take() {
            live.retire();
        }
        self.generation += 1;
    }

    /// Hand queued messages to the live transport in order. A message is
    /// popped only once the transport accepted it; a failure leaves it and
    /// everything behind it queued.
    fn drain(&mut self) {
        let Some(live) = &self.live else {
            return;
        };

        while let Some(message) = self.pending.front() {
            if let Err(e) = live.transport.send(message) {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, remaining = self.pending.len(), "Sending queued messages failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                break;
            }
            self.pending.pop_front();
        }
    }

    fn reset_attempts(&mut self) {
        self.reconnect_attempt = 0;
        self.backoff.reset();
    }

    fn set_status(&mut self, status: Status) {
        if self.status == status {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(from = %self.status, to = %status, "Socket status changed");

        self.status = status;
        self.events.push_back(SocketEvent::Status(status));
    }

    fn settle(&mut self, outcome: Result<()>) {
        if let Some(tx) = self.outcome.take() {
            // The caller may have stopped waiting
            _ = tx.send(outcome);
        }
    }
}

/// Forward a transport's events to the socket until it closes or is retired.
async fn pump(inner: Weak<Inner>, generation: u64, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(socket) = inner.upgrade() else {
            return;
        };
        if !socket.handle_event(generation, event) {
            return;
        }
    }

    // Sender dropped without a terminal event
    if let Some(socket) = inner.upgrade() {
        socket.handle_event(
            generation,
            TransportEvent::Closed {
                code: None,
                reason: String::new(),
            },
        );
    }
}
