use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use shared::{
    domain::{ItemId, StatusEntry},
    protocol::{HostEvent, ItemEvent},
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    item::{ItemListener, Propagation},
    lock,
    session_store::SessionStore,
};

/// Last known completion flag per item.
#[derive(Debug, Default)]
pub struct StatusTracker {
    entries: HashMap<ItemId, Option<bool>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_change(&mut self, id: &ItemId, complete: Option<bool>) {
        match self.entries.get_mut(id) {
            Some(entry) => *entry = complete,
            None => {
                self.entries.insert(id.clone(), complete);
            }
        }
    }

    pub fn is_tracked(&self, id: &ItemId) -> bool {
        self.entries.contains_key(id)
    }

    /// One entry per id, in the order given.
    pub fn report(&self, ids: &[ItemId]) -> Vec<StatusEntry> {
        ids.iter()
            .map(|id| match self.entries.get(id) {
                Some(complete) => StatusEntry {
                    id: id.clone(),
                    complete: *complete,
                },
                None => StatusEntry::untracked(id.clone()),
            })
            .collect()
    }
}

/// Feeds item-originated events into the tracker and announces the
/// resulting report to host subscribers.
pub struct StatusRelay {
    tracker: RwLock<StatusTracker>,
    sessions: Arc<RwLock<SessionStore>>,
    events: broadcast::Sender<HostEvent>,
}

impl StatusRelay {
    pub fn new(sessions: Arc<RwLock<SessionStore>>, events: broadcast::Sender<HostEvent>) -> Self {
        Self {
            tracker: RwLock::new(StatusTracker::new()),
            sessions,
            events,
        }
    }

    pub fn item_changed(&self, id: &ItemId, complete: Option<bool>) -> Vec<StatusEntry> {
        lock::write(&self.tracker).record_change(id, complete);
        let report = self.current_report();
        debug!(id = %id, ?complete, "item status changed");
        // No subscribers is not an error.
        let _ = self.events.send(HostEvent::SessionsChanged(report.clone()));
        report
    }

    /// Status in session order; empty while no sessions are set.
    pub fn current_report(&self) -> Vec<StatusEntry> {
        let ids = lock::read(&self.sessions).ids().unwrap_or_default();
        lock::read(&self.tracker).report(&ids)
    }

    pub fn report_for(&self, ids: &[ItemId]) -> Vec<StatusEntry> {
        lock::read(&self.tracker).report(ids)
    }

    pub fn listener_for(self: &Arc<Self>, id: ItemId) -> Arc<dyn ItemListener> {
        Arc::new(StatusListener {
            id,
            relay: Arc::clone(self),
        })
    }
}

struct StatusListener {
    id: ItemId,
    relay: Arc<StatusRelay>,
}

impl ItemListener for StatusListener {
    fn on_event(&self, event: &ItemEvent) -> Propagation {
        self.relay.item_changed(&self.id, event.complete);
        Propagation::Stop
    }
}

#[cfg(test)]
#[path = "tests/status_tracker_tests.rs"]
mod tests;
