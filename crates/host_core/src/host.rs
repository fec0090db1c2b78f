use std::{
    future::Future,
    sync::{Arc, RwLock},
};

use serde_json::Value;
use shared::{
    domain::{Environment, ItemId, Model, Outcome, Session, StatusEntry},
    protocol::HostEvent,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    config::HostSettings,
    coordinator::{HostInputs, RefreshReport, UpdateCoordinator},
    element_binder::ElementBinder,
    error::{HostError, HostResult},
    item::{Propagation, RegistrationEvent},
    item_registry::ItemRegistry,
    lock,
    session_store::{SessionHandle, SessionStore, StripPolicy},
    status_tracker::StatusRelay,
    ContentInspector, Controller, TypeReadiness,
};

/// A value as it stands once the refresh its assignment triggered settled.
#[derive(Debug, Clone)]
pub struct Settled<T> {
    pub value: T,
    pub refresh: RefreshReport,
}

/// Public surface of the host: inputs go in through the setters, derived
/// results come out through `status` and `outcomes`, lifecycle events through
/// `subscribe_events`.
pub struct ItemHost {
    settings: HostSettings,
    inputs: Arc<RwLock<HostInputs>>,
    sessions: Arc<RwLock<SessionStore>>,
    relay: Arc<StatusRelay>,
    registry: Arc<ItemRegistry>,
    coordinator: UpdateCoordinator,
    readiness: Arc<dyn TypeReadiness>,
    inspector: Arc<dyn ContentInspector>,
    decorations: RwLock<Option<Arc<ElementBinder>>>,
    events: broadcast::Sender<HostEvent>,
}

impl ItemHost {
    pub fn new(readiness: Arc<dyn TypeReadiness>, inspector: Arc<dyn ContentInspector>) -> Self {
        Self::with_settings(readiness, inspector, HostSettings::default())
    }

    pub fn with_settings(
        readiness: Arc<dyn TypeReadiness>,
        inspector: Arc<dyn ContentInspector>,
        settings: HostSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let inputs = Arc::new(RwLock::new(HostInputs::default()));
        let sessions = Arc::new(RwLock::new(SessionStore::new()));
        let relay = Arc::new(StatusRelay::new(Arc::clone(&sessions), events.clone()));
        let registry = Arc::new(ItemRegistry::new(
            Arc::clone(&readiness),
            Arc::clone(&inspector),
            Arc::clone(&relay),
        ));
        let coordinator = UpdateCoordinator::new(
            Arc::clone(&inputs),
            Arc::clone(&sessions),
            Arc::clone(&registry),
            events.clone(),
        );

        Self {
            settings,
            inputs,
            sessions,
            relay,
            registry,
            coordinator,
            readiness,
            inspector,
            decorations: RwLock::new(None),
            events,
        }
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &UpdateCoordinator {
        &self.coordinator
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Announces that the host is attached and accepting registrations.
    pub fn mount(&self) {
        info!("host mounted");
        let _ = self.events.send(HostEvent::Ready);
    }

    pub async fn set_controller(&self, controller: Arc<dyn Controller>) -> HostResult<RefreshReport> {
        lock::write(&self.inputs).controller = Some(controller);
        self.coordinator.refresh().await
    }

    pub async fn set_environment(
        &self,
        environment: Environment,
    ) -> HostResult<Settled<Environment>> {
        lock::write(&self.inputs).environment = Some(environment.clone());
        if let Some(binder) = self.decorations() {
            binder.set_environment(&environment);
        }

        let refresh = self.coordinator.refresh().await?;
        Ok(Settled {
            value: self.environment().unwrap_or(environment),
            refresh,
        })
    }

    pub fn environment(&self) -> Option<Environment> {
        lock::read(&self.inputs).environment.clone()
    }

    /// Assigns the session collection from untyped input. Anything but an
    /// array of objects with unique string ids is rejected and the current
    /// sessions are kept.
    pub async fn set_sessions(&self, sessions: Value) -> HostResult<Settled<Vec<Session>>> {
        let sessions = SessionStore::parse(sessions)?;
        self.set_session_records(sessions).await
    }

    pub async fn set_session_records(
        &self,
        sessions: Vec<Session>,
    ) -> HostResult<Settled<Vec<Session>>> {
        lock::write(&self.sessions).assign(sessions)?;

        let refresh = self.coordinator.refresh().await?;
        Ok(Settled {
            value: lock::read(&self.sessions).snapshot()?,
            refresh,
        })
    }

    pub fn sessions(&self) -> Option<Vec<SessionHandle>> {
        lock::read(&self.sessions).handles().ok()
    }

    pub fn session(&self, id: &ItemId) -> Option<SessionHandle> {
        lock::read(&self.sessions).get(id)
    }

    pub async fn refresh(&self) -> HostResult<RefreshReport> {
        self.coordinator.refresh().await
    }

    /// Binds decorative elements that sit next to the items. Returns how many
    /// of the declared elements were found.
    pub async fn declare_item_models(&self, models: Vec<Model>) -> usize {
        let binder = Arc::new(ElementBinder::new(models));
        let located = binder
            .locate(self.readiness.as_ref(), self.inspector.as_ref())
            .await;
        binder.apply(self.environment().as_ref());
        debug!(
            declared = binder.models().len(),
            located, "decorative element models bound"
        );
        *lock::write(&self.decorations) = Some(binder);
        located
    }

    pub fn declared_elements(&self) -> Vec<ItemId> {
        self.decorations()
            .map(|binder| binder.bound_ids())
            .unwrap_or_default()
    }

    /// Completion status in session order.
    pub async fn status(&self) -> HostResult<Vec<StatusEntry>> {
        let ids = lock::read(&self.sessions).ids()?;
        Ok(self.relay.report_for(&ids))
    }

    pub async fn outcomes(&self) -> HostResult<Vec<Outcome>> {
        let (controller, environment) = {
            let inputs = lock::read(&self.inputs);
            (
                inputs
                    .controller
                    .clone()
                    .ok_or(HostError::NotInitialized("controller"))?,
                inputs
                    .environment
                    .clone()
                    .ok_or(HostError::NotInitialized("environment"))?,
            )
        };
        let sessions = lock::read(&self.sessions).snapshot()?;

        controller
            .outcome(&sessions, &environment)
            .await
            .map_err(HostError::ControllerFailure)
    }

    /// Offers the sessions with their response fields stripped to `predicate`
    /// and merges the update it returns back into the records.
    pub async fn reset_responses<F, Fut>(&self, predicate: F) -> HostResult<Vec<Session>>
    where
        F: FnOnce(Vec<Session>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<Session>>>,
    {
        let policy = StripPolicy::Fields(self.settings.response_fields.clone());
        self.reset_with(&policy, predicate).await
    }

    /// Like [`ItemHost::reset_responses`], but the proposal keeps only ids.
    pub async fn reset<F, Fut>(&self, predicate: F) -> HostResult<Vec<Session>>
    where
        F: FnOnce(Vec<Session>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<Session>>>,
    {
        self.reset_with(&StripPolicy::AllButId, predicate).await
    }

    async fn reset_with<F, Fut>(&self, policy: &StripPolicy, predicate: F) -> HostResult<Vec<Session>>
    where
        F: FnOnce(Vec<Session>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<Session>>>,
    {
        let proposal = lock::read(&self.sessions).proposal(policy)?;
        let update = predicate(proposal.clone())
            .await
            .map_err(HostError::PredicateFailure)?;

        let mut store = lock::write(&self.sessions);
        store.replace_all(&proposal, &update)?;
        debug!(?policy, sessions = store.len(), "sessions reset");
        store.snapshot()
    }

    /// Handles an item announcing itself. The announcement is consumed here;
    /// a duplicate id leaves the earlier registration untouched.
    pub fn handle_registration(&self, event: RegistrationEvent) -> HostResult<Propagation> {
        let RegistrationEvent { id, handle } = event;
        let id = match id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => ItemId(id),
            _ => {
                return Err(HostError::MissingIdentifier {
                    item_type: handle.item_type().to_string(),
                })
            }
        };

        self.registry.register(id.clone(), Arc::clone(&handle))?;
        if let Some(push) = self.coordinator.push_registered(&id, &handle) {
            debug!(id = %id, outcome = ?push.outcome, "pushed latest model into registered item");
        }
        Ok(Propagation::Stop)
    }

    fn decorations(&self) -> Option<Arc<ElementBinder>> {
        lock::read(&self.decorations).clone()
    }
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
