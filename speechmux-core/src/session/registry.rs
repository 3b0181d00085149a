//! Session id → callback map shared by the caller threads and the dispatcher.
//!
//! One `parking_lot::Mutex` guards the whole map. Critical sections only
//! touch the map, with one exception: [`SessionRegistry::issue_with`] runs the
//! engine's id-issuing call under the lock so that the dispatcher, which takes
//! the same lock for every lookup, cannot observe an event for a fresh id
//! before its callback is registered. Caller-supplied callback code never runs
//! under the lock; lookups hand out a cloned `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use super::SessionId;
use crate::error::{Result, SpeechMuxError};

pub struct SessionRegistry<C: ?Sized> {
    entries: Mutex<HashMap<SessionId, Arc<C>>>,
}

impl<C: ?Sized> SessionRegistry<C> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register `callback` for `id`. Fails if `id` is already open.
    pub fn insert(&self, id: SessionId, callback: Arc<C>) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(SpeechMuxError::DuplicateSession(id));
        }
        entries.insert(id, callback);
        Ok(())
    }

    /// Run `issue` (an engine call returning a raw id) and register the
    /// callback for the id it returns, all under one lock acquisition.
    ///
    /// A non-positive raw id becomes `AllocationFailed` and nothing is
    /// registered.
    pub fn issue_with<F>(&self, issue: F, callback: Arc<C>) -> Result<SessionId>
    where
        F: FnOnce() -> i32,
    {
        let mut entries = self.entries.lock();
        let raw = issue();
        let id = SessionId::from_raw(raw).ok_or(SpeechMuxError::AllocationFailed { code: raw })?;
        if entries.contains_key(&id) {
            // The engine handed out an id that is still open here.
            error!(session_id = %id, "engine reissued a live session id");
            return Err(SpeechMuxError::DuplicateSession(id));
        }
        entries.insert(id, callback);
        Ok(id)
    }

    pub fn lookup(&self, id: SessionId) -> Option<Arc<C>> {
        self.entries.lock().get(&id).cloned()
    }

    /// Remove the entry for `id`. `None` if it was already gone.
    pub fn remove(&self, id: SessionId) -> Option<Arc<C>> {
        self.entries.lock().remove(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Open ids in ascending order.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every entry, returning the ids that were open.
    pub fn drain(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.entries.lock().drain().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }
}

impl<C: ?Sized> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> std::fmt::Debug for SessionRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("open", &self.len())
            .finish_non_exhaustive()
    }
}
