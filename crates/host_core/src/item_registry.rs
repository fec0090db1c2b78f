use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, RwLock},
};

use futures::future::join_all;
use shared::{
    domain::{ItemId, ItemType, Model},
    protocol::ItemEventKind,
};
use tracing::{debug, info};

use crate::{
    error::{HostError, HostResult},
    item::ItemHandle,
    lock,
    status_tracker::StatusRelay,
    ContentInspector, TypeReadiness,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    AwaitingTypeReady,
    Registered,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub fast_path: bool,
    pub awaited_types: Vec<ItemType>,
    pub newly_bound: Vec<ItemId>,
}

/// Binds live item handles to item identifiers.
pub struct ItemRegistry {
    items: RwLock<HashMap<ItemId, Arc<dyn ItemHandle>>>,
    pending: Mutex<HashMap<ItemId, ItemType>>,
    ready_types: Mutex<HashSet<ItemType>>,
    readiness: Arc<dyn TypeReadiness>,
    inspector: Arc<dyn ContentInspector>,
    relay: Arc<StatusRelay>,
}

impl ItemRegistry {
    pub fn new(
        readiness: Arc<dyn TypeReadiness>,
        inspector: Arc<dyn ContentInspector>,
        relay: Arc<StatusRelay>,
    ) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            ready_types: Mutex::new(HashSet::new()),
            readiness,
            inspector,
            relay,
        }
    }

    /// Binds a handle that announced itself. The id must not be bound yet.
    pub fn register(&self, id: ItemId, handle: Arc<dyn ItemHandle>) -> HostResult<()> {
        {
            let mut items = lock::write(&self.items);
            let existing = items.get(&id).map(|bound| bound.handle_id());
            if let Some(existing) = existing {
                return Err(HostError::DuplicateRegistration {
                    id,
                    existing: existing.to_string(),
                });
            }
            items.insert(id.clone(), Arc::clone(&handle));
        }
        lock::lock(&self.pending).remove(&id);
        self.attach_listeners(&id, &handle);
        info!(id = %id, item_type = %handle.item_type(), "item registered");
        Ok(())
    }

    pub fn get(&self, id: &ItemId) -> Option<Arc<dyn ItemHandle>> {
        lock::read(&self.items).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock::read(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bound items ordered by id.
    pub fn entries(&self) -> Vec<(ItemId, Arc<dyn ItemHandle>)> {
        let mut entries: Vec<_> = lock::read(&self.items)
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn state(&self, id: &ItemId) -> RegistrationState {
        if lock::read(&self.items).contains_key(id) {
            RegistrationState::Registered
        } else if lock::lock(&self.pending).contains_key(id) {
            RegistrationState::AwaitingTypeReady
        } else {
            RegistrationState::Unregistered
        }
    }

    /// True when every model's id is already bound.
    pub fn covers(&self, models: &[Model]) -> bool {
        let items = lock::read(&self.items);
        models.iter().all(|model| items.contains_key(&model.id))
    }

    /// Brings the registry in line with a model list: waits for every needed
    /// item type, then binds each model's live item under its id.
    pub async fn reconcile(&self, models: &[Model]) -> HostResult<ReconcileSummary> {
        if self.covers(models) {
            debug!(models = models.len(), "all model ids already registered");
            return Ok(ReconcileSummary {
                fast_path: true,
                ..ReconcileSummary::default()
            });
        }

        let mut targets: Vec<(&Model, ItemType)> = Vec::with_capacity(models.len());
        for model in models {
            let bound = self.get(&model.id).is_some();
            match self.resolve_type(model) {
                Some(item_type) => targets.push((model, item_type)),
                None if bound => continue,
                None => {
                    return Err(HostError::UnresolvedElementType {
                        id: model.id.clone(),
                    })
                }
            }
        }

        {
            let items = lock::read(&self.items);
            let mut pending = lock::lock(&self.pending);
            for (model, item_type) in &targets {
                if !items.contains_key(&model.id) {
                    pending.insert(model.id.clone(), item_type.clone());
                }
            }
        }

        let result = self.bind_targets(&targets).await;

        let mut pending = lock::lock(&self.pending);
        for (model, _) in &targets {
            pending.remove(&model.id);
        }
        result
    }

    async fn bind_targets(&self, targets: &[(&Model, ItemType)]) -> HostResult<ReconcileSummary> {
        let awaited_types = self.await_types(targets).await;

        let mut newly_bound = Vec::new();
        for (model, item_type) in targets {
            match self.inspector.find_by_id_and_type(&model.id, item_type) {
                Some(handle) => {
                    if self.bind_located(&model.id, handle)? {
                        newly_bound.push(model.id.clone());
                    }
                }
                None if self.get(&model.id).is_some() => {}
                None => {
                    return Err(HostError::MissingElement {
                        id: model.id.clone(),
                        item_type: item_type.clone(),
                    })
                }
            }
        }

        info!(
            bound = newly_bound.len(),
            registered = self.len(),
            "registry reconciled"
        );
        Ok(ReconcileSummary {
            fast_path: false,
            awaited_types,
            newly_bound,
        })
    }

    async fn await_types(&self, targets: &[(&Model, ItemType)]) -> Vec<ItemType> {
        let wanted: Vec<ItemType> = {
            let ready = lock::lock(&self.ready_types);
            targets
                .iter()
                .map(|(_, item_type)| item_type.clone())
                .filter(|item_type| !ready.contains(item_type))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        if wanted.is_empty() {
            return wanted;
        }

        debug!(types = ?wanted, "waiting for item types");
        join_all(
            wanted
                .iter()
                .map(|item_type| self.readiness.when_ready(item_type)),
        )
        .await;

        lock::lock(&self.ready_types).extend(wanted.iter().cloned());
        wanted
    }

    fn resolve_type(&self, model: &Model) -> Option<ItemType> {
        model
            .element
            .clone()
            .or_else(|| self.inspector.find_type_for_id(&model.id))
    }

    /// Returns whether the handle was newly bound; rebinding the same handle
    /// is a no-op.
    fn bind_located(&self, id: &ItemId, handle: Arc<dyn ItemHandle>) -> HostResult<bool> {
        {
            let mut items = lock::write(&self.items);
            let existing = items.get(id).map(|bound| bound.handle_id());
            match existing {
                Some(existing) if existing == handle.handle_id() => return Ok(false),
                Some(_) => return Err(HostError::RegistrationConflict { id: id.clone() }),
                None => {
                    items.insert(id.clone(), Arc::clone(&handle));
                }
            }
        }
        self.attach_listeners(id, &handle);
        debug!(id = %id, item_type = %handle.item_type(), "item bound from content");
        Ok(true)
    }

    fn attach_listeners(&self, id: &ItemId, handle: &Arc<dyn ItemHandle>) {
        for kind in ItemEventKind::ALL {
            handle.add_listener(kind, self.relay.listener_for(id.clone()));
        }
    }
}

#[cfg(test)]
#[path = "tests/item_registry_tests.rs"]
mod tests;
