//! File-backed stand-ins for the pieces a real page would provide: the
//! controller, the rendered items and the content they live in.

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use host_core::{
    ContentInspector, Controller, ItemHandle, ItemListener, Propagation, SessionHandle,
};
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{Environment, HandleId, ItemId, ItemType, Model, Outcome, Session},
    protocol::{ItemEvent, ItemEventKind},
};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    #[serde(default)]
    pub environment: Environment,
    pub sessions: Value,
    #[serde(default)]
    pub items: Vec<FixtureItemSpec>,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    #[serde(default)]
    pub decorations: Vec<Model>,
    #[serde(default)]
    pub events: Vec<FixtureEvent>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureItemSpec {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Items that announce themselves instead of waiting to be located.
    #[serde(default)]
    pub announce: bool,
}

#[derive(Debug, Deserialize)]
pub struct FixtureEvent {
    pub id: ItemId,
    #[serde(flatten)]
    pub event: ItemEvent,
}

pub fn load(path: &Path) -> Result<Fixture> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid fixture '{}'", path.display()))
}

pub struct FixtureController {
    models: Vec<Model>,
    outcomes: Vec<Outcome>,
}

impl FixtureController {
    pub fn new(models: Vec<Model>, outcomes: Vec<Outcome>) -> Self {
        Self { models, outcomes }
    }
}

#[async_trait]
impl Controller for FixtureController {
    async fn model(&self, sessions: &[Session], _environment: &Environment) -> Result<Vec<Model>> {
        debug!(sessions = sessions.len(), "fixture models requested");
        Ok(self.models.clone())
    }

    async fn outcome(
        &self,
        _sessions: &[Session],
        _environment: &Environment,
    ) -> Result<Vec<Outcome>> {
        Ok(self.outcomes.clone())
    }
}

pub struct FixtureItem {
    id: ItemId,
    handle_id: HandleId,
    item_type: ItemType,
    listeners: Mutex<Vec<(ItemEventKind, Arc<dyn ItemListener>)>>,
}

impl FixtureItem {
    pub fn new(spec: &FixtureItemSpec) -> Arc<Self> {
        Arc::new(Self {
            id: spec.id.clone(),
            handle_id: HandleId::fresh(),
            item_type: spec.item_type.clone(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn emit(&self, event: ItemEvent) -> Propagation {
        let listeners: Vec<Arc<dyn ItemListener>> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .filter(|(kind, _)| *kind == event.kind)
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
            Err(_) => return Propagation::Continue,
        };
        for listener in listeners {
            if listener.on_event(&event) == Propagation::Stop {
                return Propagation::Stop;
            }
        }
        Propagation::Continue
    }
}

impl ItemHandle for FixtureItem {
    fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    fn item_type(&self) -> ItemType {
        self.item_type.clone()
    }

    fn set_model(&self, model: Model) {
        debug!(id = %self.id, fields = model.fields.len(), "model set");
    }

    fn set_session(&self, session: SessionHandle) {
        debug!(id = %self.id, session = %session.id(), "session set");
    }

    fn add_listener(&self, kind: ItemEventKind, listener: Arc<dyn ItemListener>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((kind, listener));
        }
    }

    fn set_environment(&self, _environment: &Environment) {
        debug!(id = %self.id, "environment set");
    }

    fn set_property(&self, name: &str, value: &Value) {
        debug!(id = %self.id, property = name, %value, "property set");
    }
}

pub struct FixtureContent {
    items: Vec<Arc<FixtureItem>>,
}

impl FixtureContent {
    pub fn new(items: Vec<Arc<FixtureItem>>) -> Self {
        Self { items }
    }

    pub fn item(&self, id: &ItemId) -> Option<&Arc<FixtureItem>> {
        self.items.iter().find(|item| item.id() == id)
    }
}

impl ContentInspector for FixtureContent {
    fn find_by_id_and_type(
        &self,
        id: &ItemId,
        item_type: &ItemType,
    ) -> Option<Arc<dyn ItemHandle>> {
        self.item(id)
            .filter(|item| item.item_type == *item_type)
            .map(|item| Arc::clone(item) as Arc<dyn ItemHandle>)
    }

    fn find_type_for_id(&self, id: &ItemId) -> Option<ItemType> {
        self.item(id).map(|item| item.item_type.clone())
    }
}
