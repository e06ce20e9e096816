//! A single named pasteboard: ownership, declared types, cached data,
//! history and pending data requests.
//!
//! All of that sits behind one mutex. Critical sections never await;
//! the only suspension point is [`Pasteboard::data_for_type`] waiting
//! on the owner, and it does so with the lock released. Callbacks into
//! clients are invoked after the lock is dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::ipc::protocol::{Claim, MAX_DATA_SIZE, PasteboardDescriptor};

use super::callback::{
    ClientId, DataError, Owner, PasteboardCallback, PendingKey, PendingRequests, Resolution,
};
use super::generation::{ChangeCount, Generation, History};
use super::types::{self, PasteboardType};

/// `declare_types` / `add_types` rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("change count {requested} is not current ({current})")]
    Stale { requested: u64, current: u64 },
    #[error("caller is not the current owner")]
    NotOwner,
}

impl ClaimError {
    pub fn reason(self) -> &'static str {
        match self {
            ClaimError::Stale { .. } => "stale_generation",
            ClaimError::NotOwner => "not_owner",
        }
    }
}

/// `set_data` rejection. Nothing is mutated when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetDataError {
    #[error("change count {requested} is not current ({current})")]
    Stale { requested: u64, current: u64 },
    #[error("type {0} was not declared for this generation")]
    NotDeclared(PasteboardType),
    #[error("file payload could not be read")]
    FileUnreadable,
    #[error("payload of {0} bytes exceeds {MAX_DATA_SIZE}")]
    TooLarge(u64),
}

impl SetDataError {
    pub fn reason(&self) -> &'static str {
        match self {
            SetDataError::Stale { .. } => "stale_generation",
            SetDataError::NotDeclared(_) => "type_not_declared",
            SetDataError::FileUnreadable => "file_unreadable",
            SetDataError::TooLarge(_) => "payload_too_large",
        }
    }
}

fn check_size(len: u64) -> Result<(), SetDataError> {
    if len > MAX_DATA_SIZE as u64 {
        return Err(SetDataError::TooLarge(len));
    }
    Ok(())
}

/// Data handed to `set_data`: inline bytes, or a path whose contents
/// become the cached value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Inline(Bytes),
    File(PathBuf),
}

impl Payload {
    /// Interpret wire data. With `is_file`, `data` must be a UTF-8 path.
    pub fn from_wire(data: Vec<u8>, is_file: bool) -> Result<Self, SetDataError> {
        if !is_file {
            return Ok(Payload::Inline(Bytes::from(data)));
        }
        String::from_utf8(data)
            .map(|p| Payload::File(PathBuf::from(p)))
            .map_err(|_| SetDataError::FileUnreadable)
    }

    /// Resolve to the bytes to cache, bounded by [`MAX_DATA_SIZE`].
    async fn materialize(self) -> Result<Bytes, SetDataError> {
        let path = match self {
            Payload::Inline(data) => {
                check_size(data.len() as u64)?;
                return Ok(data);
            }
            Payload::File(path) => path,
        };
        let unreadable = |e: std::io::Error| {
            tracing::debug!(path = %path.display(), error = %e, "file payload unreadable");
            SetDataError::FileUnreadable
        };

        // The file may grow between the two checks.
        check_size(tokio::fs::metadata(&path).await.map_err(unreadable)?.len())?;
        let data = tokio::fs::read(&path).await.map_err(unreadable)?;
        check_size(data.len() as u64)?;
        Ok(Bytes::from(data))
    }
}

#[derive(Default)]
struct PasteboardState {
    current: Generation,
    history: History,
    pending: PendingRequests,
    watchers: HashMap<ClientId, Arc<dyn PasteboardCallback>>,
}

impl PasteboardState {
    fn check_claim(&self, claim: Claim) -> Result<(), ClaimError> {
        match claim {
            Claim::Force => Ok(()),
            Claim::Match(requested) if requested == self.current.change_count.get() => Ok(()),
            Claim::Match(requested) => Err(ClaimError::Stale {
                requested,
                current: self.current.change_count.get(),
            }),
        }
    }

    fn owned_by(&self, client: ClientId) -> bool {
        self.current
            .owner
            .as_ref()
            .is_some_and(|o| o.client == client)
    }
}

/// One named pasteboard instance.
pub struct Pasteboard {
    name: String,
    callback_timeout: Duration,
    state: Mutex<PasteboardState>,
}

impl Pasteboard {
    pub fn new(name: String, history_depth: usize, callback_timeout: Duration) -> Self {
        Self {
            name,
            callback_timeout,
            state: Mutex::new(PasteboardState {
                history: History::new(history_depth),
                ..PasteboardState::default()
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn change_count(&self) -> ChangeCount {
        self.state.lock().current.change_count
    }

    /// Declared types and change count, read atomically.
    pub fn types_and_change_count(&self) -> (Vec<PasteboardType>, ChangeCount) {
        let state = self.state.lock();
        (state.current.types.clone(), state.current.change_count)
    }

    /// First of `candidates` the current generation declares.
    pub fn available_type(
        &self,
        candidates: &[PasteboardType],
    ) -> Option<(PasteboardType, ChangeCount)> {
        let state = self.state.lock();
        types::first_available(candidates, &state.current.types)
            .map(|ty| (ty.clone(), state.current.change_count))
    }

    /// Start a new generation owned by `owner`.
    ///
    /// The previous generation is retained in history (depth
    /// permitting), its pending requests are abandoned, and the
    /// previous owner plus every watcher is told ownership changed.
    pub fn declare_types(
        &self,
        declared: Vec<PasteboardType>,
        owner: Owner,
        claim: Claim,
    ) -> Result<ChangeCount, ClaimError> {
        let new_owner = owner.client;
        let (count, notify) = {
            let mut state = self.state.lock();
            state.check_claim(claim)?;

            let mut counter = state.current.change_count;
            let count = counter.bump();
            let previous = std::mem::replace(
                &mut state.current,
                Generation {
                    change_count: count,
                    owner: Some(owner),
                    types: declared,
                    cache: HashMap::new(),
                },
            );

            let abandoned = state.pending.resolve_all(|| Resolution::Abandoned);
            if abandoned > 0 {
                tracing::debug!(pasteboard = %self.name, abandoned, "pending requests abandoned");
            }

            let mut notify: Vec<Arc<dyn PasteboardCallback>> = Vec::new();
            if let Some(prev) = previous.owner.as_ref() {
                if prev.client != new_owner && !state.watchers.contains_key(&prev.client) {
                    notify.push(prev.callback.clone());
                }
            }
            notify.extend(state.watchers.values().cloned());

            state.history.push(previous.freeze());
            (count, notify)
        };

        tracing::debug!(
            pasteboard = %self.name,
            owner = %new_owner,
            change_count = count.get(),
            "types declared"
        );
        for callback in notify {
            callback.changed_owner(&self.name);
        }
        Ok(count)
    }

    /// Append types to the current generation without bumping the count.
    ///
    /// Only the live owner may add types.
    pub fn add_types(
        &self,
        added: Vec<PasteboardType>,
        client: ClientId,
        claim: Claim,
    ) -> Result<ChangeCount, ClaimError> {
        let mut state = self.state.lock();
        state.check_claim(claim)?;
        if !state.owned_by(client) {
            return Err(ClaimError::NotOwner);
        }
        for ty in added {
            types::append_unique(&mut state.current.types, ty);
        }
        Ok(state.current.change_count)
    }

    /// Drop the owner without starting a new generation.
    ///
    /// Cached data stays readable. Pending requests can no longer be
    /// answered and resolve as owner-gone.
    pub fn release_globally(&self) {
        let mut state = self.state.lock();
        if let Some(owner) = state.current.owner.take() {
            let resolved = state.pending.resolve_all(|| Resolution::OwnerDisconnected);
            tracing::debug!(
                pasteboard = %self.name,
                owner = %owner.client,
                resolved,
                "released globally"
            );
        }
    }

    /// Forget everything tied to a disconnected client.
    pub fn client_disconnected(&self, client: ClientId) {
        let mut state = self.state.lock();
        state.watchers.remove(&client);
        if state.owned_by(client) {
            state.current.owner = None;
            let resolved = state.pending.resolve_all(|| Resolution::OwnerDisconnected);
            tracing::debug!(pasteboard = %self.name, %client, resolved, "owner disconnected");
        }
    }

    pub fn set_history(&self, depth: usize) {
        self.state.lock().history.set_depth(depth);
    }

    /// Cache data for a declared type of the current generation.
    ///
    /// Requires an exact change-count match. Wakes any readers waiting
    /// on this `(generation, type)`.
    pub async fn set_data(
        &self,
        payload: Payload,
        ty: PasteboardType,
        old_count: u64,
    ) -> Result<(), SetDataError> {
        let data = payload.materialize().await?;

        let mut state = self.state.lock();
        let current = state.current.change_count;
        if current.get() != old_count {
            return Err(SetDataError::Stale {
                requested: old_count,
                current: current.get(),
            });
        }
        if !state.current.types.contains(&ty) {
            return Err(SetDataError::NotDeclared(ty));
        }

        let key = PendingKey {
            change_count: current,
            ty,
        };
        let woken = state.pending.fulfill(&key, &data);
        tracing::debug!(
            pasteboard = %self.name,
            ty = %key.ty,
            size = data.len(),
            woken,
            "data set"
        );
        state.current.cache.insert(key.ty, data);
        Ok(())
    }

    /// Fetch data for `ty` in the generation identified by `old_count`.
    ///
    /// Serves from cache when possible. For the current generation,
    /// falls back to asking the live owner and waiting up to the
    /// callback timeout. Retained generations are served from their
    /// frozen cache only.
    pub async fn data_for_type(
        &self,
        ty: &PasteboardType,
        old_count: u64,
        must_be_current: bool,
    ) -> Result<Bytes, DataError> {
        let requested = ChangeCount::from(old_count);
        let (rx, key, callback) = {
            let mut state = self.state.lock();
            let current = state.current.change_count;

            if requested != current {
                if must_be_current {
                    return Err(DataError::Stale {
                        requested: old_count,
                        current: current.get(),
                    });
                }
                let retained = state
                    .history
                    .get(requested)
                    .ok_or(DataError::HistoryMiss(old_count))?;
                if !retained.types.contains(ty) {
                    return Err(DataError::NotDeclared);
                }
                tracing::debug!(
                    pasteboard = %self.name,
                    change_count = old_count,
                    owner = ?retained.owner,
                    "reading retained generation"
                );
                return retained.cache.get(ty).cloned().ok_or(DataError::NotCached);
            }

            if !state.current.types.contains(ty) {
                return Err(DataError::NotDeclared);
            }
            if let Some(data) = state.current.cache.get(ty) {
                return Ok(data.clone());
            }
            let owner = state.current.owner.clone().ok_or(DataError::NoOwner)?;
            let key = PendingKey {
                change_count: current,
                ty: ty.clone(),
            };
            let (rx, first) = state.pending.register(key.clone());
            (rx, key, first.then_some(owner))
        };

        if let Some(owner) = callback {
            tracing::debug!(
                pasteboard = %self.name,
                %ty,
                owner = %owner.client,
                "requesting data from owner"
            );
            if owner
                .callback
                .provide_data_for_version(&self.name, ty, key.change_count)
                .is_err()
            {
                self.state
                    .lock()
                    .pending
                    .resolve_key(&key, || Resolution::OwnerDisconnected);
            }
        }

        let outcome = tokio::time::timeout(self.callback_timeout, rx).await;
        match outcome {
            Ok(Ok(resolution)) => resolution.into_result(),
            // Sender dropped without resolving.
            Ok(Err(_)) => Err(DataError::Abandoned),
            Err(_) => {
                self.state.lock().pending.prune();
                Err(DataError::TimedOut)
            }
        }
    }

    /// Subscribe `client` to ownership-change notifications.
    pub fn watch(&self, client: ClientId, callback: Arc<dyn PasteboardCallback>) {
        self.state.lock().watchers.insert(client, callback);
    }

    pub fn unwatch(&self, client: ClientId) {
        self.state.lock().watchers.remove(&client);
    }

    pub fn descriptor(&self) -> PasteboardDescriptor {
        // Saturate rather than wrap.
        let clamp = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        let state = self.state.lock();
        PasteboardDescriptor {
            name: self.name.clone(),
            change_count: state.current.change_count.get(),
            types: types::to_strings(&state.current.types),
            has_owner: state.current.owner.is_some(),
            cached: clamp(state.current.cache.len()),
            history_depth: clamp(state.history.depth()),
            retained: clamp(state.history.len()),
            pending: clamp(state.pending.len()),
            watchers: clamp(state.watchers.len()),
        }
    }
}
