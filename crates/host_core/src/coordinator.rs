//! Refresh cycle: fetch models, reconcile registration, push model/session
//! pairs into items.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, RwLock,
};

use serde::Serialize;
use shared::{
    domain::{Environment, ItemId, Model, Session},
    protocol::HostEvent,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    error::{HostError, HostResult},
    item::ItemHandle,
    item_registry::ItemRegistry,
    lock,
    session_store::{SessionHandle, SessionStore},
    Controller,
};

/// Inputs set from outside the host. A refresh runs only once all of them,
/// plus the session collection, are present.
#[derive(Default)]
pub struct HostInputs {
    pub controller: Option<Arc<dyn Controller>>,
    pub environment: Option<Environment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingModel,
    MissingSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PushOutcome {
    Pushed,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemPush {
    pub id: ItemId,
    pub outcome: PushOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub skipped: bool,
    pub superseded: bool,
    pub generation: u64,
    pub items: Vec<ItemPush>,
}

impl RefreshReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn pushed_ids(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|push| push.outcome == PushOutcome::Pushed)
            .map(|push| push.id.clone())
            .collect()
    }

    pub fn skipped_items(&self) -> Vec<&ItemPush> {
        self.items
            .iter()
            .filter(|push| push.outcome != PushOutcome::Pushed)
            .collect()
    }
}

/// Models from the newest-started fetch that completed, served to items that
/// announce themselves later.
#[derive(Debug, Default)]
struct FetchedModels {
    generation: u64,
    models: Vec<Model>,
}

pub struct UpdateCoordinator {
    inputs: Arc<RwLock<HostInputs>>,
    sessions: Arc<RwLock<SessionStore>>,
    registry: Arc<ItemRegistry>,
    latest_models: RwLock<FetchedModels>,
    generation: AtomicU64,
    applied_generation: Mutex<u64>,
    events: broadcast::Sender<HostEvent>,
}

impl UpdateCoordinator {
    pub fn new(
        inputs: Arc<RwLock<HostInputs>>,
        sessions: Arc<RwLock<SessionStore>>,
        registry: Arc<ItemRegistry>,
        events: broadcast::Sender<HostEvent>,
    ) -> Self {
        Self {
            inputs,
            sessions,
            registry,
            latest_models: RwLock::new(FetchedModels::default()),
            generation: AtomicU64::new(0),
            applied_generation: Mutex::new(0),
            events,
        }
    }

    /// Runs one refresh cycle.
    ///
    /// Overlapping cycles are allowed. Each takes a generation at start, and a
    /// cycle whose generation is older than the last applied one completes
    /// without pushing anything (`superseded`). Fetched models are kept for
    /// late announcements even when reconciliation then fails.
    pub async fn refresh(&self) -> HostResult<RefreshReport> {
        let Some((controller, environment, sessions)) = self.ready_inputs() else {
            debug!("refresh skipped: controller, environment or sessions not set");
            return Ok(RefreshReport::skipped());
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, sessions = sessions.len(), "refresh started");

        let models = controller
            .model(&sessions, &environment)
            .await
            .map_err(HostError::ControllerFailure)
            .map_err(|err| self.fail(generation, err))?;
        self.retain(generation, &models);

        self.registry
            .reconcile(&models)
            .await
            .map_err(|err| self.fail(generation, err))?;

        Ok(self.apply(generation, &models))
    }

    pub fn latest_models(&self) -> Vec<Model> {
        lock::read(&self.latest_models).models.clone()
    }

    pub fn latest_model(&self, id: &ItemId) -> Option<Model> {
        lock::read(&self.latest_models)
            .models
            .iter()
            .find(|model| model.id == *id)
            .cloned()
    }

    pub fn applied_generation(&self) -> u64 {
        *lock::lock(&self.applied_generation)
    }

    /// Pushes the latest cycle's data into one newly registered item. Nothing
    /// is pushed, and nothing reported, while no model for it exists.
    pub fn push_registered(&self, id: &ItemId, handle: &Arc<dyn ItemHandle>) -> Option<ItemPush> {
        let model = self.latest_model(id)?;
        let session = lock::write(&self.sessions).get_or_create(id).ok();
        Some(push_pair(id, handle, Some(model), session))
    }

    fn ready_inputs(&self) -> Option<(Arc<dyn Controller>, Environment, Vec<Session>)> {
        let (controller, environment) = {
            let inputs = lock::read(&self.inputs);
            (inputs.controller.clone()?, inputs.environment.clone()?)
        };
        let sessions = lock::read(&self.sessions).snapshot().ok()?;
        Some((controller, environment, sessions))
    }

    fn retain(&self, generation: u64, models: &[Model]) {
        let mut latest = lock::write(&self.latest_models);
        if generation < latest.generation {
            debug!(
                generation,
                newer = latest.generation,
                "fetched models older than the retained ones"
            );
            return;
        }
        latest.generation = generation;
        latest.models = models.to_vec();
    }

    fn fail(&self, generation: u64, err: HostError) -> HostError {
        error!(generation, error = %err, "refresh failed");
        // No subscribers is not an error.
        let _ = self.events.send(HostEvent::ModelUpdateFailed(err.report()));
        err
    }

    fn apply(&self, generation: u64, models: &[Model]) -> RefreshReport {
        let mut applied = lock::lock(&self.applied_generation);
        if generation < *applied {
            warn!(
                generation,
                applied = *applied,
                "refresh superseded by a newer cycle; discarding its models"
            );
            return RefreshReport {
                superseded: true,
                generation,
                ..RefreshReport::default()
            };
        }
        *applied = generation;

        let items = self.push_all(models);
        drop(applied);

        let skipped = items
            .iter()
            .filter(|push| push.outcome != PushOutcome::Pushed)
            .count();
        info!(generation, pushed = items.len() - skipped, skipped, "models pushed");
        let _ = self.events.send(HostEvent::ModelUpdated { generation });

        RefreshReport {
            skipped: false,
            superseded: false,
            generation,
            items,
        }
    }

    fn push_all(&self, models: &[Model]) -> Vec<ItemPush> {
        let entries = self.registry.entries();
        let sessions: Vec<Option<SessionHandle>> = {
            let mut store = lock::write(&self.sessions);
            entries
                .iter()
                .map(|(id, _)| store.get_or_create(id).ok())
                .collect()
        };

        entries
            .iter()
            .zip(sessions)
            .map(|((id, handle), session)| {
                let model = models.iter().find(|model| model.id == *id).cloned();
                let push = push_pair(id, handle, model, session);
                if push.outcome != PushOutcome::Pushed {
                    warn!(id = %id, outcome = ?push.outcome, "missing model or session for item");
                }
                push
            })
            .collect()
    }
}

fn push_pair(
    id: &ItemId,
    handle: &Arc<dyn ItemHandle>,
    model: Option<Model>,
    session: Option<SessionHandle>,
) -> ItemPush {
    let outcome = match (model, session) {
        (Some(model), Some(session)) => {
            handle.set_model(model);
            handle.set_session(session);
            PushOutcome::Pushed
        }
        (None, _) => PushOutcome::Skipped(SkipReason::MissingModel),
        (Some(_), None) => PushOutcome::Skipped(SkipReason::MissingSession),
    };
    ItemPush {
        id: id.clone(),
        outcome,
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
