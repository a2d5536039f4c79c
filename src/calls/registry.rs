use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use txcore::types::call::CallId;

use super::call::Call;
use super::error::CallError;
use super::state::CallInfo;

/// The single source of truth for which calls exist.
///
/// Lookups hand out a clone of the `Arc` for the duration of one operation;
/// callers re-check with [`CallRegistry::is_current`] after every await.
#[derive(Default)]
pub(crate) struct CallRegistry {
    calls: DashMap<CallId, Arc<Call>>,
}

impl CallRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, call: Arc<Call>) -> Result<(), CallError> {
        match self.calls.entry(call.id) {
            Entry::Occupied(_) => Err(CallError::AlreadyExists(call.id)),
            Entry::Vacant(slot) => {
                slot.insert(call);
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, call_id: &CallId) -> Option<Arc<Call>> {
        self.calls.get(call_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn contains(&self, call_id: &CallId) -> bool {
        self.calls.contains_key(call_id)
    }

    /// True while `call` itself, not a newer call under the same id, is registered.
    pub(crate) fn is_current(&self, call: &Arc<Call>) -> bool {
        self.calls
            .get(&call.id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), call))
    }

    /// Evicts `call`. Returns false if it was already gone.
    pub(crate) fn remove(&self, call: &Arc<Call>) -> bool {
        self.calls
            .remove_if(&call.id, |_, registered| Arc::ptr_eq(registered, call))
            .is_some()
    }

    pub(crate) fn all(&self) -> Vec<Arc<Call>> {
        self.calls.iter().map(|entry| entry.value().clone()).collect()
    }

    pub(crate) fn snapshots(&self) -> Vec<CallInfo> {
        let mut snapshots: Vec<_> = self.calls.iter().map(|entry| entry.snapshot()).collect();
        snapshots.sort_by_key(|info| info.created_at);
        snapshots
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
