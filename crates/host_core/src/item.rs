use std::{fmt, sync::Arc};

use serde_json::Value;
use shared::{
    domain::{Environment, HandleId, ItemType, Model},
    protocol::{ItemEvent, ItemEventKind},
};

use crate::session_store::SessionHandle;

/// Whether an event should keep travelling to listeners registered after the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

pub trait ItemListener: Send + Sync {
    fn on_event(&self, event: &ItemEvent) -> Propagation;
}

/// Live reference to one item rendered inside the host's content.
///
/// Implementations dispatch their own events to the listeners attached
/// through [`ItemHandle::add_listener`], in attachment order, until one of
/// them returns [`Propagation::Stop`].
pub trait ItemHandle: Send + Sync {
    fn handle_id(&self) -> HandleId;
    fn item_type(&self) -> ItemType;
    fn set_model(&self, model: Model);
    fn set_session(&self, session: SessionHandle);
    fn add_listener(&self, kind: ItemEventKind, listener: Arc<dyn ItemListener>);

    fn set_environment(&self, _environment: &Environment) {}

    fn set_property(&self, _name: &str, _value: &Value) {}
}

impl fmt::Debug for dyn ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemHandle")
            .field("handle_id", &self.handle_id())
            .field("item_type", &self.item_type())
            .finish()
    }
}

/// An item announcing itself to the host it is mounted in.
pub struct RegistrationEvent {
    pub id: Option<String>,
    pub handle: Arc<dyn ItemHandle>,
}

impl RegistrationEvent {
    pub fn new(id: impl Into<String>, handle: Arc<dyn ItemHandle>) -> Self {
        Self {
            id: Some(id.into()),
            handle,
        }
    }

    pub fn anonymous(handle: Arc<dyn ItemHandle>) -> Self {
        Self { id: None, handle }
    }
}
