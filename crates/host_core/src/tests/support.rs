use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{Environment, HandleId, ItemId, ItemType, Model, Outcome, Session},
    protocol::{ItemEvent, ItemEventKind},
};
use tokio::sync::oneshot;

use crate::{
    host::ItemHost,
    item::{ItemHandle, ItemListener, Propagation},
    session_store::SessionHandle,
    ContentInspector, Controller, TypeReadiness,
};

pub(crate) struct TestItem {
    handle_id: HandleId,
    item_type: ItemType,
    models: Mutex<Vec<Model>>,
    sessions: Mutex<Vec<SessionHandle>>,
    environments: Mutex<Vec<Environment>>,
    properties: Mutex<Vec<(String, Value)>>,
    listeners: Mutex<Vec<(ItemEventKind, Arc<dyn ItemListener>)>>,
}

impl TestItem {
    pub(crate) fn new(item_type: &str) -> Arc<Self> {
        Arc::new(Self {
            handle_id: HandleId::fresh(),
            item_type: ItemType::from(item_type),
            models: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            environments: Mutex::new(Vec::new()),
            properties: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn emit(&self, event: ItemEvent) -> Propagation {
        let listeners: Vec<Arc<dyn ItemListener>> = self
            .listeners
            .lock()
            .expect("listeners")
            .iter()
            .filter(|(kind, _)| *kind == event.kind)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            if listener.on_event(&event) == Propagation::Stop {
                return Propagation::Stop;
            }
        }
        Propagation::Continue
    }

    pub(crate) fn last_model(&self) -> Option<Model> {
        self.models.lock().expect("models").last().cloned()
    }

    pub(crate) fn model_count(&self) -> usize {
        self.models.lock().expect("models").len()
    }

    pub(crate) fn last_session(&self) -> Option<SessionHandle> {
        self.sessions.lock().expect("sessions").last().cloned()
    }

    pub(crate) fn environments(&self) -> Vec<Environment> {
        self.environments.lock().expect("environments").clone()
    }

    pub(crate) fn properties(&self) -> Vec<(String, Value)> {
        self.properties.lock().expect("properties").clone()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().expect("listeners").len()
    }
}

impl ItemHandle for TestItem {
    fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    fn item_type(&self) -> ItemType {
        self.item_type.clone()
    }

    fn set_model(&self, model: Model) {
        self.models.lock().expect("models").push(model);
    }

    fn set_session(&self, session: SessionHandle) {
        self.sessions.lock().expect("sessions").push(session);
    }

    fn add_listener(&self, kind: ItemEventKind, listener: Arc<dyn ItemListener>) {
        self.listeners
            .lock()
            .expect("listeners")
            .push((kind, listener));
    }

    fn set_environment(&self, environment: &Environment) {
        self.environments
            .lock()
            .expect("environments")
            .push(environment.clone());
    }

    fn set_property(&self, name: &str, value: &Value) {
        self.properties
            .lock()
            .expect("properties")
            .push((name.to_string(), value.clone()));
    }
}

pub(crate) fn handle(item: &Arc<TestItem>) -> Arc<dyn ItemHandle> {
    Arc::clone(item) as Arc<dyn ItemHandle>
}

#[derive(Default)]
pub(crate) struct TestContent {
    items: Mutex<Vec<(ItemId, Arc<TestItem>)>>,
}

impl TestContent {
    pub(crate) fn with(entries: &[(&str, &Arc<TestItem>)]) -> Arc<Self> {
        let content = Arc::new(Self::default());
        for (id, item) in entries {
            content.insert(id, item);
        }
        content
    }

    pub(crate) fn insert(&self, id: &str, item: &Arc<TestItem>) {
        self.items
            .lock()
            .expect("content")
            .push((ItemId::from(id), Arc::clone(item)));
    }
}

impl ContentInspector for TestContent {
    fn find_by_id_and_type(
        &self,
        id: &ItemId,
        item_type: &ItemType,
    ) -> Option<Arc<dyn ItemHandle>> {
        self.items
            .lock()
            .expect("content")
            .iter()
            .find(|(item_id, item)| item_id == id && item.item_type == *item_type)
            .map(|(_, item)| handle(item))
    }

    fn find_type_for_id(&self, id: &ItemId) -> Option<ItemType> {
        self.items
            .lock()
            .expect("content")
            .iter()
            .find(|(item_id, _)| item_id == id)
            .map(|(_, item)| item.item_type.clone())
    }
}

/// Counts readiness requests; every type is ready immediately.
#[derive(Default)]
pub(crate) struct CountingReadiness {
    calls: AtomicUsize,
}

impl CountingReadiness {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TypeReadiness for CountingReadiness {
    async fn when_ready(&self, _item_type: &ItemType) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedStep {
    gate: Option<oneshot::Receiver<()>>,
    models: Vec<Model>,
}

pub(crate) struct ScriptedController {
    steps: Mutex<VecDeque<ScriptedStep>>,
    fallback: Vec<Model>,
    outcomes: Vec<Outcome>,
    fail_with: Option<String>,
    model_calls: AtomicUsize,
    seen_sessions: Mutex<Vec<Vec<Session>>>,
}

impl ScriptedController {
    pub(crate) fn returning(models: Vec<Model>) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: models,
            outcomes: Vec::new(),
            fail_with: None,
            model_calls: AtomicUsize::new(0),
            seen_sessions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(err: impl Into<String>) -> Self {
        let mut controller = Self::returning(Vec::new());
        controller.fail_with = Some(err.into());
        controller
    }

    /// Each call takes the next step and resolves once its gate fires.
    pub(crate) fn gated(steps: Vec<(oneshot::Receiver<()>, Vec<Model>)>) -> Self {
        let controller = Self::returning(Vec::new());
        *controller.steps.lock().expect("steps") = steps
            .into_iter()
            .map(|(gate, models)| ScriptedStep {
                gate: Some(gate),
                models,
            })
            .collect();
        controller
    }

    pub(crate) fn with_outcomes(mut self, outcomes: Vec<Outcome>) -> Self {
        self.outcomes = outcomes;
        self
    }

    pub(crate) fn model_calls(&self) -> usize {
        self.model_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen_sessions(&self) -> Vec<Vec<Session>> {
        self.seen_sessions.lock().expect("seen").clone()
    }
}

#[async_trait]
impl Controller for ScriptedController {
    async fn model(&self, sessions: &[Session], _environment: &Environment) -> Result<Vec<Model>> {
        self.model_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_sessions
            .lock()
            .expect("seen")
            .push(sessions.to_vec());
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }

        let step = self.steps.lock().expect("steps").pop_front();
        match step {
            Some(ScriptedStep { gate, models }) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok(models)
            }
            None => Ok(self.fallback.clone()),
        }
    }

    async fn outcome(
        &self,
        _sessions: &[Session],
        _environment: &Environment,
    ) -> Result<Vec<Outcome>> {
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.outcomes.clone())
    }
}

pub(crate) fn host_with(
    content: Arc<TestContent>,
    readiness: Arc<dyn TypeReadiness>,
) -> ItemHost {
    ItemHost::new(readiness, content)
}

pub(crate) fn env() -> Environment {
    Environment::new(serde_json::json!({"mode": "gather"}))
}
