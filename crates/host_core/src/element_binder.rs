//! Lightweight binding for decorative elements that live outside the item
//! registry: they receive the environment and their model's fields as
//! properties, but no session and no status tracking.

use std::{
    collections::BTreeSet,
    sync::{Arc, RwLock},
};

use futures::future::join_all;
use shared::domain::{Environment, ItemId, ItemType, Model};
use tracing::{debug, warn};

use crate::{item::ItemHandle, lock, ContentInspector, TypeReadiness};

pub struct ElementBinder {
    models: Vec<Model>,
    elements: RwLock<Vec<(ItemId, Arc<dyn ItemHandle>)>>,
}

impl ElementBinder {
    pub fn new(models: Vec<Model>) -> Self {
        Self {
            models,
            elements: RwLock::new(Vec::new()),
        }
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Waits for every declared element type, then locates the elements.
    /// Models whose element cannot be found are dropped.
    pub async fn locate(
        &self,
        readiness: &dyn TypeReadiness,
        inspector: &dyn ContentInspector,
    ) -> usize {
        let typed: Vec<(&Model, ItemType)> = self
            .models
            .iter()
            .filter_map(|model| {
                let item_type = model
                    .element
                    .clone()
                    .or_else(|| inspector.find_type_for_id(&model.id));
                if item_type.is_none() {
                    warn!(id = %model.id, "declared model names no element type");
                }
                item_type.map(|item_type| (model, item_type))
            })
            .collect();

        let types: BTreeSet<&ItemType> = typed.iter().map(|(_, item_type)| item_type).collect();
        join_all(types.into_iter().map(|item_type| readiness.when_ready(item_type))).await;

        let located: Vec<(ItemId, Arc<dyn ItemHandle>)> = typed
            .iter()
            .filter_map(|(model, item_type)| {
                let found = inspector.find_by_id_and_type(&model.id, item_type);
                if found.is_none() {
                    debug!(id = %model.id, item_type = %item_type, "declared element not in content");
                }
                found.map(|handle| (model.id.clone(), handle))
            })
            .collect();

        let count = located.len();
        *lock::write(&self.elements) = located;
        count
    }

    /// Pushes the environment, when known, and each model's fields into the
    /// located elements.
    pub fn apply(&self, environment: Option<&Environment>) {
        for (id, element) in self.elements() {
            if let Some(environment) = environment {
                element.set_environment(environment);
            }
            let Some(model) = self.models.iter().find(|model| model.id == id) else {
                continue;
            };
            for (name, value) in &model.fields {
                element.set_property(name, value);
            }
        }
    }

    pub fn set_environment(&self, environment: &Environment) {
        for (_, element) in self.elements() {
            element.set_environment(environment);
        }
    }

    pub fn bound_ids(&self) -> Vec<ItemId> {
        lock::read(&self.elements)
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn elements(&self) -> Vec<(ItemId, Arc<dyn ItemHandle>)> {
        lock::read(&self.elements).clone()
    }
}

#[cfg(test)]
#[path = "tests/element_binder_tests.rs"]
mod tests;
