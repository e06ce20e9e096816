//! Owner callbacks: pulling lazily-provided data from the owning client.
//!
//! When a reader asks for a type the current generation has declared
//! but not cached, the server sends the owner a provide-data callback
//! and parks the reader on a oneshot channel. The request is keyed by
//! `(change count, type)`, so it is bound to exactly one generation:
//!
//! ```text
//! PENDING ──set_data(same generation, type)──▶ FULFILLED
//!    │──declare_types (generation bump)──────▶ ABANDONED
//!    │──owner disconnect / release────────────▶ OWNER_DISCONNECTED
//!    └──callback timeout───────────────────────▶ TIMED_OUT
//! ```
//!
//! Only `FULFILLED` yields bytes. Every other terminal state is
//! reported to the reader as "no data".

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::oneshot;

use super::generation::ChangeCount;
use super::types::PasteboardType;

/// Unique identifier for a connected client.
///
/// Monotonically increasing counter, stable for the lifetime of one
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// The callback channel to a client could not take the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("callback channel closed")]
pub struct CallbackClosed;

/// What the server can ask of a client.
///
/// Implemented by client stand-ins living inside the server (one per
/// connection). Every method must return without waiting on the
/// client: delivery is a queue push, never a round trip.
pub trait PasteboardCallback: Send + Sync {
    /// Ask the owner to `set_data` for `ty` on `pasteboard`.
    fn provide_data(&self, pasteboard: &str, ty: &PasteboardType) -> Result<(), CallbackClosed>;

    /// Generation-pinned variant. Stand-ins that cannot carry the
    /// version fall back to the plain request.
    fn provide_data_for_version(
        &self,
        pasteboard: &str,
        ty: &PasteboardType,
        version: ChangeCount,
    ) -> Result<(), CallbackClosed> {
        let _ = version;
        self.provide_data(pasteboard, ty)
    }

    /// Ownership of `pasteboard` changed. Best effort.
    fn changed_owner(&self, pasteboard: &str);
}

/// The live owner of a generation: identity plus callback channel.
#[derive(Clone)]
pub struct Owner {
    pub client: ClientId,
    pub callback: Arc<dyn PasteboardCallback>,
}

impl Owner {
    pub fn new(client: ClientId, callback: Arc<dyn PasteboardCallback>) -> Self {
        Self { client, callback }
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner").field("client", &self.client).finish()
    }
}

/// How a pending data request ended, as seen by the waiter.
#[derive(Debug, Clone)]
pub enum Resolution {
    Fulfilled(Bytes),
    Abandoned,
    OwnerDisconnected,
}

/// Why `data_for_type` produced nothing.
///
/// Only `Stale` is reported to the caller distinctly; every other
/// variant goes out on the wire as plain "no data".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    #[error("change count {requested} is not current ({current})")]
    Stale { requested: u64, current: u64 },
    #[error("generation {0} is not retained")]
    HistoryMiss(u64),
    #[error("type not declared in the requested generation")]
    NotDeclared,
    #[error("not cached and no live owner")]
    NoOwner,
    #[error("retained generation has no cached data for the type")]
    NotCached,
    #[error("owner did not respond in time")]
    TimedOut,
    #[error("request abandoned by a newer generation")]
    Abandoned,
    #[error("owner disconnected")]
    OwnerDisconnected,
}

impl DataError {
    /// Machine-readable wire reason.
    pub fn reason(self) -> &'static str {
        match self {
            DataError::Stale { .. } => "stale_generation",
            _ => "no_data",
        }
    }
}

impl Resolution {
    pub fn into_result(self) -> Result<Bytes, DataError> {
        match self {
            Resolution::Fulfilled(data) => Ok(data),
            Resolution::Abandoned => Err(DataError::Abandoned),
            Resolution::OwnerDisconnected => Err(DataError::OwnerDisconnected),
        }
    }
}

/// Correlation key for a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub change_count: ChangeCount,
    pub ty: PasteboardType,
}

/// Outstanding data requests for one pasteboard.
///
/// Several readers waiting on the same key share a single callback to
/// the owner: [`PendingRequests::register`] tells the caller whether it
/// is the one that must send it.
#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: HashMap<PendingKey, Vec<oneshot::Sender<Resolution>>>,
}

impl PendingRequests {
    /// Park a new waiter. Returns the receiver and whether a callback
    /// needs to go out (no live waiter was already queued for the key).
    pub fn register(&mut self, key: PendingKey) -> (oneshot::Receiver<Resolution>, bool) {
        let (tx, rx) = oneshot::channel();
        let queue = self.waiters.entry(key).or_default();
        // Waiters that timed out dropped their receivers.
        queue.retain(|w| !w.is_closed());
        let first = queue.is_empty();
        queue.push(tx);
        (rx, first)
    }

    /// Deliver data to every waiter on `key`.
    pub fn fulfill(&mut self, key: &PendingKey, data: &Bytes) -> usize {
        self.resolve_key(key, || Resolution::Fulfilled(data.clone()))
    }

    /// Resolve every waiter on `key` the same way.
    pub fn resolve_key(&mut self, key: &PendingKey, f: impl Fn() -> Resolution) -> usize {
        let Some(queue) = self.waiters.remove(key) else {
            return 0;
        };
        send_all(queue, f)
    }

    /// Resolve every waiter on every key.
    pub fn resolve_all(&mut self, f: impl Fn() -> Resolution) -> usize {
        self.waiters
            .drain()
            .map(|(_, queue)| send_all(queue, &f))
            .sum()
    }

    /// Drop queues whose waiters have all gone away.
    pub fn prune(&mut self) {
        self.waiters.retain(|_, queue| {
            queue.retain(|w| !w.is_closed());
            !queue.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }
}

fn send_all(queue: Vec<oneshot::Sender<Resolution>>, f: impl Fn() -> Resolution) -> usize {
    queue.into_iter().filter_map(|w| w.send(f()).ok()).count()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording callback used by the core's tests.

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Provide {
            pasteboard: String,
            ty: String,
            version: Option<u64>,
        },
        ChangedOwner(String),
    }

    #[derive(Default)]
    pub struct Recorder {
        pub calls: Mutex<Vec<Call>>,
        pub versioned: bool,
        pub closed: bool,
    }

    impl Recorder {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn versioned() -> Arc<Self> {
            Arc::new(Self {
                versioned: true,
                ..Self::default()
            })
        }

        pub fn closed() -> Arc<Self> {
            Arc::new(Self {
                closed: true,
                ..Self::default()
            })
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn provide_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Provide { .. }))
                .count()
        }

        pub fn changed_owner_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::ChangedOwner(_)))
                .count()
        }
    }

    impl PasteboardCallback for Recorder {
        fn provide_data(
            &self,
            pasteboard: &str,
            ty: &PasteboardType,
        ) -> Result<(), CallbackClosed> {
            if self.closed {
                return Err(CallbackClosed);
            }
            self.calls.lock().push(Call::Provide {
                pasteboard: pasteboard.into(),
                ty: ty.to_string(),
                version: None,
            });
            Ok(())
        }

        fn provide_data_for_version(
            &self,
            pasteboard: &str,
            ty: &PasteboardType,
            version: ChangeCount,
        ) -> Result<(), CallbackClosed> {
            if !self.versioned {
                return self.provide_data(pasteboard, ty);
            }
            if self.closed {
                return Err(CallbackClosed);
            }
            self.calls.lock().push(Call::Provide {
                pasteboard: pasteboard.into(),
                ty: ty.to_string(),
                version: Some(version.get()),
            });
            Ok(())
        }

        fn changed_owner(&self, pasteboard: &str) {
            self.calls
                .lock()
                .push(Call::ChangedOwner(pasteboard.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(count: u64, ty: &str) -> PendingKey {
        PendingKey {
            change_count: ChangeCount::from(count),
            ty: PasteboardType::new(ty).unwrap(),
        }
    }

    #[test]
    fn client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn first_waiter_sends_callback_later_ones_join() {
        let mut p = PendingRequests::default();
        let (_rx1, first1) = p.register(key(1, "text"));
        let (_rx2, first2) = p.register(key(1, "text"));
        let (_rx3, first3) = p.register(key(1, "image"));
        assert!(first1);
        assert!(!first2);
        assert!(first3);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn callback_resent_once_earlier_waiters_gave_up() {
        let mut p = PendingRequests::default();
        let (rx1, _) = p.register(key(1, "text"));
        drop(rx1);
        let (_rx2, first) = p.register(key(1, "text"));
        assert!(first);
    }

    #[tokio::test]
    async fn fulfill_reaches_every_waiter_on_key() {
        let mut p = PendingRequests::default();
        let (rx1, _) = p.register(key(1, "text"));
        let (rx2, _) = p.register(key(1, "text"));
        let (rx3, _) = p.register(key(1, "image"));
        let delivered = p.fulfill(&key(1, "text"), &Bytes::from_static(b"hi"));
        assert_eq!(delivered, 2);
        for rx in [rx1, rx2] {
            match rx.await.unwrap() {
                Resolution::Fulfilled(b) => assert_eq!(&b[..], b"hi"),
                other => panic!("expected Fulfilled, got {other:?}"),
            }
        }
        assert_eq!(p.len(), 1);
        drop(rx3);
    }

    #[tokio::test]
    async fn resolve_all_abandons_everything() {
        let mut p = PendingRequests::default();
        let (rx1, _) = p.register(key(1, "text"));
        let (rx2, _) = p.register(key(2, "image"));
        assert_eq!(p.resolve_all(|| Resolution::Abandoned), 2);
        assert!(matches!(rx1.await.unwrap(), Resolution::Abandoned));
        assert!(matches!(rx2.await.unwrap(), Resolution::Abandoned));
        assert_eq!(p.len(), 0);
    }

    #[test]
    fn prune_drops_dead_queues() {
        let mut p = PendingRequests::default();
        let (rx, _) = p.register(key(1, "text"));
        drop(rx);
        p.prune();
        assert_eq!(p.len(), 0);
    }

    #[test]
    fn only_stale_is_distinct_on_the_wire() {
        assert_eq!(
            DataError::Stale {
                requested: 1,
                current: 2
            }
            .reason(),
            "stale_generation"
        );
        for e in [
            DataError::HistoryMiss(1),
            DataError::NotDeclared,
            DataError::NoOwner,
            DataError::NotCached,
            DataError::TimedOut,
            DataError::Abandoned,
            DataError::OwnerDisconnected,
        ] {
            assert_eq!(e.reason(), "no_data");
        }
    }
}
