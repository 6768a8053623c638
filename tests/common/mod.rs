#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use managed_socket::Result;
use managed_socket::ws::{
    ManagedSocket, Options, Payload, Status, Transport, TransportEvent, TransportEvents,
    TransportFactory, WsError,
};
use tokio::sync::mpsc;

pub const URL: &str = "ws://host/x";

/// Transport factory whose handles are driven by the test.
#[derive(Default)]
pub struct MockFactory {
    handles: Mutex<Vec<Arc<MockHandle>>>,
    fail_create: AtomicBool,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent `create` calls fail synchronously.
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Number of transports created so far.
    pub fn created(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn handle(&self, index: usize) -> Arc<MockHandle> {
        Arc::clone(&self.handles.lock().unwrap()[index])
    }

    pub fn last(&self) -> Arc<MockHandle> {
        Arc::clone(self.handles.lock().unwrap().last().unwrap())
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, url: &str) -> Result<(Box<dyn Transport>, TransportEvents)> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(WsError::Transport(format!("cannot open {url}")).into());
        }

        let (events, events_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(MockHandle {
            url: url.to_owned(),
            events,
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            reject_sends: AtomicBool::new(false),
        });
        self.handles.lock().unwrap().push(Arc::clone(&handle));

        Ok((Box::new(MockTransport(handle)), events_rx))
    }
}

/// Test-side view of one transport.
pub struct MockHandle {
    pub url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    reject_sends: AtomicBool,
}

impl MockHandle {
    pub fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    pub fn message(&self, text: &str) {
        self.emit(TransportEvent::Message(Payload::from(text)));
    }

    /// Simulate the peer going away.
    pub fn drop_connection(&self) {
        self.emit(TransportEvent::Closed {
            code: Some(1006),
            reason: "abnormal closure".to_owned(),
        });
    }

    /// Simulate a transport-level error.
    pub fn fail(&self) {
        self.emit(TransportEvent::Error(
            WsError::Transport("connection refused".to_owned()).into(),
        ));
    }

    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn emit(&self, event: TransportEvent) {
        // The socket may already have stopped listening
        _ = self.events.send(event);
    }
}

struct MockTransport(Arc<MockHandle>);

impl Transport for MockTransport {
    fn send(&self, message: &str) -> Result<()> {
        if self.0.reject_sends.load(Ordering::SeqCst) {
            return Err(WsError::ConnectionClosed.into());
        }
        self.0.sent.lock().unwrap().push(message.to_owned());
        Ok(())
    }

    fn close(&self) {
        self.0.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Socket on [`URL`] without a token, using `factory`.
pub fn socket(factory: &Arc<MockFactory>) -> ManagedSocket {
    ManagedSocket::new(
        Options::builder()
            .url(URL)
            .token("")
            .factory(Arc::clone(factory) as Arc<dyn TransportFactory>)
            .build(),
    )
    .unwrap()
}

/// Record every status the socket emits.
pub fn record_statuses(socket: &ManagedSocket) -> Arc<Mutex<Vec<Status>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    socket
        .status_changed()
        .connect(move |status| sink.lock().unwrap().push(*status));
    seen
}

/// Record the text of every message the socket emits.
pub fn record_messages(socket: &ManagedSocket) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    socket.message_received().connect(move |payload: &Payload| {
        sink.lock()
            .unwrap()
            .push(payload.as_text().unwrap_or_default().to_owned());
    });
    seen
}

/// Let spawned tasks process everything already sent to them.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Move the paused clock forward and let due timers run.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}
