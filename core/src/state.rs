//! Published run state: a single-writer, multi-reader current-value store.
//!
//! Each map lives in a [`tokio::sync::watch`] channel, so every update is an
//! atomic replace-and-notify and observers can never see a torn snapshot.
//! Only the engine writes; subscribers are arbitrary.

use std::collections::HashMap;
use std::sync::Arc;

use knockr_common::model::{KnockState, ResourceState, SequenceId};
use tokio::sync::watch;

#[derive(Clone)]
pub struct StatePublisher {
    inner: Arc<Inner>,
}

struct Inner {
    knocks: watch::Sender<HashMap<SequenceId, KnockState>>,
    resources: watch::Sender<HashMap<SequenceId, ResourceState>>,
}

impl StatePublisher {
    pub fn new() -> Self {
        let (knocks, _) = watch::channel(HashMap::new());
        let (resources, _) = watch::channel(HashMap::new());
        Self {
            inner: Arc::new(Inner { knocks, resources }),
        }
    }

    /// Stream of the whole knock-state map; a sequence id disappearing from
    /// it means that run has ended.
    pub fn watch_knocks(&self) -> watch::Receiver<HashMap<SequenceId, KnockState>> {
        self.inner.knocks.subscribe()
    }

    pub fn watch_resources(&self) -> watch::Receiver<HashMap<SequenceId, ResourceState>> {
        self.inner.resources.subscribe()
    }

    pub fn knock_state(&self, id: SequenceId) -> Option<KnockState> {
        self.inner.knocks.borrow().get(&id).cloned()
    }

    /// Last known verdict; `Unknown` when the sequence never ran a check.
    pub fn resource_state(&self, id: SequenceId) -> ResourceState {
        self.inner
            .resources
            .borrow()
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    /// Drops the last-known verdict for a sequence.
    pub fn clear_resource(&self, id: SequenceId) {
        self.inner.resources.send_modify(|map| {
            map.remove(&id);
        });
    }

    pub(crate) fn publish_knock(&self, state: KnockState) {
        self.inner.knocks.send_modify(|map| {
            map.insert(state.id, state);
        });
    }

    pub(crate) fn remove_knock(&self, id: SequenceId) {
        self.inner.knocks.send_modify(|map| {
            map.remove(&id);
        });
    }

    pub(crate) fn set_resource(&self, id: SequenceId, state: ResourceState) {
        self.inner.resources.send_modify(|map| {
            map.insert(id, state);
        });
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}
