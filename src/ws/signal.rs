//! Observer lists for socket events.

#[cfg(feature = "tracing")]
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_stream::try_stream;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::error::WsError;
use crate::Result;

/// Broadcast channel capacity for async subscribers.
const BROADCAST_CAPACITY: usize = 1024;

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`Signal::connect`], used to disconnect the slot again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

/// A list of subscribers notified, in connection order, every time the owner emits.
///
/// Slots are plain callbacks invoked synchronously on the emitting thread. For
/// consumers living in their own task, [`Signal::subscribe`] and
/// [`Signal::stream`] hand out broadcast receivers fed by the same emissions.
pub struct Signal<T> {
    slots: RwLock<Vec<(SlotId, Slot<T>)>>,
    next_id: AtomicU64,
    broadcast_tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Signal<T> {
    pub(crate) fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            slots: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            broadcast_tx,
        }
    }

    /// Connect a slot. It stays connected until [`Signal::disconnect`] is called
    /// with the returned id, or the owner is disposed.
    pub fn connect<F>(&self, slot: F) -> SlotId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(slot)));
        id
    }

    /// Disconnect a slot. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    pub fn disconnect_all(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of connected slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Subscribe to emissions from another task.
    ///
    /// Each call returns a new independent receiver that only sees values
    /// emitted after it was created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.broadcast_tx.subscribe()
    }

    /// Stream of emissions, ending when the owner is dropped.
    ///
    /// A receiver that falls more than the channel capacity behind yields a
    /// [`WsError::Lagged`] error and then continues with the oldest retained value.
    pub fn stream(&self) -> impl Stream<Item = Result<T>> + use<T> {
        let mut rx = self.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(value) => yield value,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Signal subscriber lagged, missed {n} values");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    pub(crate) fn emit(&self, value: &T) {
        // Snapshot so a slot may connect or disconnect while being called
        let slots: Vec<Slot<T>> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        for slot in slots {
            // A panicking slot must not keep the value from the others
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| slot(value))) {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    panic = panic_message(panic.as_ref()),
                    "Signal slot panicked"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = &panic;
            }
        }

        // No receivers is not an error
        _ = self.broadcast_tx.send(value.clone());
    }
}

#[cfg(feature = "tracing")]
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("receivers", &self.broadcast_tx.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::StreamExt as _;

    use super::*;

    #[test]
    fn slots_run_in_connection_order() {
        let signal = Signal::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            signal.connect(move |value| seen.lock().expect("lock").push((tag, *value)));
        }

        signal.emit(&1);
        signal.emit(&2);

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![("first", 1), ("second", 1), ("first", 2), ("second", 2)]
        );
    }

    #[test]
    fn disconnect_stops_delivery() {
        let signal = Signal::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&count);
        let id = signal.connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(&1);
        assert!(signal.disconnect(id), "slot should have been connected");
        assert!(!signal.disconnect(id), "second disconnect is a no-op");
        signal.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(signal.slot_count(), 0);
    }

    #[test]
    fn panicking_slot_does_not_starve_the_others() {
        let signal = Signal::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        signal.connect(|value| assert_ne!(*value, 1, "slot rejects 1"));
        let sink = Arc::clone(&seen);
        signal.connect(move |value| sink.lock().expect("lock").push(*value));

        signal.emit(&1);
        signal.emit(&2);

        assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);
        assert_eq!(signal.slot_count(), 2);
    }

    #[tokio::test]
    async fn stream_sees_values_emitted_after_subscription() {
        let signal = Signal::<String>::new();
        signal.emit(&"before".to_owned());

        let mut stream = Box::pin(signal.stream());
        signal.emit(&"after".to_owned());

        let value = stream.next().await.expect("stream item").expect("no lag");
        assert_eq!(value, "after");
    }
}
