use serde::{Deserialize, Serialize};

use crate::{domain::StatusEntry, error::ErrorReport};

/// Lifecycle events published by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HostEvent {
    Ready,
    ModelUpdated {
        generation: u64,
    },
    ModelUpdateFailed(ErrorReport),
    SessionsChanged(Vec<StatusEntry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemEventKind {
    SessionChanged,
    ModelSet,
}

impl ItemEventKind {
    pub const ALL: [ItemEventKind; 2] = [ItemEventKind::SessionChanged, ItemEventKind::ModelSet];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionChanged => "session-changed",
            Self::ModelSet => "model-set",
        }
    }
}

/// Event raised by an item whenever its completion state may have moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub kind: ItemEventKind,
    #[serde(default)]
    pub complete: Option<bool>,
}

impl ItemEvent {
    pub fn session_changed(complete: bool) -> Self {
        Self {
            kind: ItemEventKind::SessionChanged,
            complete: Some(complete),
        }
    }

    pub fn model_set(complete: bool) -> Self {
        Self {
            kind: ItemEventKind::ModelSet,
            complete: Some(complete),
        }
    }
}
