use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{Environment, ItemId, ItemType, Model, Outcome, Session};

pub mod config;
pub mod coordinator;
pub mod element_binder;
pub mod error;
pub mod host;
pub mod item;
pub mod item_registry;
mod lock;
pub mod readiness;
pub mod session_store;
pub mod status_tracker;

pub use coordinator::{ItemPush, PushOutcome, RefreshReport, SkipReason, UpdateCoordinator};
pub use element_binder::ElementBinder;
pub use error::{HostError, HostResult};
pub use host::{ItemHost, Settled};
pub use item::{ItemHandle, ItemListener, Propagation, RegistrationEvent};
pub use item_registry::{ItemRegistry, ReconcileSummary, RegistrationState};
pub use readiness::ReadinessSignals;
pub use session_store::{SessionHandle, SessionStore, StripPolicy};
pub use status_tracker::{StatusRelay, StatusTracker};

/// Computes per-item models and aggregate outcomes from sessions and environment.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn model(&self, sessions: &[Session], environment: &Environment) -> Result<Vec<Model>>;
    async fn outcome(
        &self,
        sessions: &[Session],
        environment: &Environment,
    ) -> Result<Vec<Outcome>>;
}

/// Resolves once an item type can be instantiated. May be awaited any number
/// of times for the same type.
#[async_trait]
pub trait TypeReadiness: Send + Sync {
    async fn when_ready(&self, item_type: &ItemType);
}

/// Looks items up inside the host's content.
pub trait ContentInspector: Send + Sync {
    fn find_by_id_and_type(&self, id: &ItemId, item_type: &ItemType)
        -> Option<Arc<dyn ItemHandle>>;
    fn find_type_for_id(&self, id: &ItemId) -> Option<ItemType>;
}

pub struct ImmediateReadiness;

#[async_trait]
impl TypeReadiness for ImmediateReadiness {
    async fn when_ready(&self, _item_type: &ItemType) {}
}

pub struct MissingContent;

impl ContentInspector for MissingContent {
    fn find_by_id_and_type(
        &self,
        _id: &ItemId,
        _item_type: &ItemType,
    ) -> Option<Arc<dyn ItemHandle>> {
        None
    }

    fn find_type_for_id(&self, _id: &ItemId) -> Option<ItemType> {
        None
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
