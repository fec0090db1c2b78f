use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field name that carries the item identifier on sessions, models and outcomes.
pub const ID_FIELD: &str = "id";
/// Field name a model may use to name the element type rendering it.
pub const ELEMENT_FIELD: &str = "element";

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_newtype!(ItemId);
string_newtype!(ItemType);

/// Identity of one live item instance. Two handles for the same item id are
/// the same item only if their handle ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub Uuid);

impl HandleId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Caller-owned mutable state of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: ItemId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        if name != ID_FIELD {
            self.fields.insert(name, value);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Controller-produced data for one item, valid for one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ItemType>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Model {
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            element: None,
            fields: Map::new(),
        }
    }

    pub fn for_element(id: impl Into<ItemId>, element: impl Into<ItemType>) -> Self {
        Self {
            id: id.into(),
            element: Some(element.into()),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        if name != ID_FIELD && name != ELEMENT_FIELD {
            self.fields.insert(name, value);
        }
        self
    }
}

/// Controller-computed result for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: ItemId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Opaque configuration passed through to the controller and to items.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(pub Value);

impl Environment {
    pub fn new(value: Value) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
}

impl StatusEntry {
    pub fn untracked(id: ItemId) -> Self {
        Self { id, complete: None }
    }
}
