use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, RwLock},
};

use serde_json::{Map, Value};
use shared::domain::{ItemId, Session, ID_FIELD};
use tracing::debug;

use crate::{
    error::{HostError, HostResult},
    lock,
};

/// Shared reference to one session record. Clones point at the same record,
/// so in-place updates are visible to every holder.
#[derive(Clone)]
pub struct SessionHandle(Arc<RwLock<Session>>);

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(RwLock::new(session)))
    }

    pub fn id(&self) -> ItemId {
        lock::read(&self.0).id.clone()
    }

    pub fn snapshot(&self) -> Session {
        lock::read(&self.0).clone()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        lock::read(&self.0).fields.get(name).cloned()
    }

    /// Sets a field on the record. The identifier cannot be rewritten.
    pub fn set_field(&self, name: impl Into<String>, value: Value) -> bool {
        let name = name.into();
        if name == ID_FIELD {
            return false;
        }
        lock::write(&self.0).fields.insert(name, value);
        true
    }

    pub fn same_record(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn overwrite(&self, fields: Map<String, Value>) {
        let mut guard = lock::write(&self.0);
        guard.fields = fields;
        guard.fields.remove(ID_FIELD);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionHandle")
            .field(&*lock::read(&self.0))
            .finish()
    }
}

/// Which fields a reset proposal drops before it is offered to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripPolicy {
    Fields(Vec<String>),
    AllButId,
}

impl StripPolicy {
    fn apply(&self, session: &mut Session) {
        match self {
            Self::Fields(names) => session
                .fields
                .retain(|name, _| !names.iter().any(|stripped| stripped == name)),
            Self::AllButId => session.fields.clear(),
        }
    }
}

/// The canonical ordered collection of session records.
#[derive(Debug, Default)]
pub struct SessionStore {
    records: Option<Vec<SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the structural shape of a caller-supplied session collection:
    /// an array of objects, each with a string `id`, no id repeated.
    pub fn parse(value: Value) -> HostResult<Vec<Session>> {
        let Value::Array(entries) = value else {
            return Err(HostError::InvalidArgument(
                "sessions must be an array".to_string(),
            ));
        };

        let mut sessions = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let Value::Object(mut fields) = entry else {
                return Err(HostError::InvalidArgument(format!(
                    "session at index {index} is not an object"
                )));
            };
            let id = match fields.remove(ID_FIELD) {
                Some(Value::String(id)) => ItemId(id),
                Some(_) => {
                    return Err(HostError::InvalidArgument(format!(
                        "session at index {index} has a non-string id"
                    )))
                }
                None => {
                    return Err(HostError::InvalidArgument(format!(
                        "session at index {index} is missing an id"
                    )))
                }
            };
            sessions.push(Session { id, fields });
        }
        ensure_unique_ids(&sessions)?;
        Ok(sessions)
    }

    /// Installs a new collection. Records whose id is already known are
    /// overwritten in place so existing holders keep observing them.
    pub fn assign(&mut self, sessions: Vec<Session>) -> HostResult<()> {
        ensure_unique_ids(&sessions)?;

        let mut previous: HashMap<ItemId, SessionHandle> = self
            .records
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|handle| (handle.id(), handle))
            .collect();

        let records = sessions
            .into_iter()
            .map(|session| match previous.remove(&session.id) {
                Some(handle) => {
                    handle.overwrite(session.fields);
                    handle
                }
                None => SessionHandle::new(session),
            })
            .collect();
        self.records = Some(records);
        Ok(())
    }

    pub fn get(&self, id: &ItemId) -> Option<SessionHandle> {
        self.records
            .as_ref()?
            .iter()
            .find(|handle| handle.id() == *id)
            .cloned()
    }

    pub fn get_or_create(&mut self, id: &ItemId) -> HostResult<SessionHandle> {
        let records = self
            .records
            .as_mut()
            .ok_or(HostError::NotInitialized("sessions"))?;

        if let Some(existing) = records.iter().find(|handle| handle.id() == *id) {
            return Ok(existing.clone());
        }

        debug!(id = %id, "creating session record");
        let created = SessionHandle::new(Session::new(id.clone()));
        records.push(created.clone());
        Ok(created)
    }

    pub fn handles(&self) -> HostResult<Vec<SessionHandle>> {
        self.records
            .clone()
            .ok_or(HostError::NotInitialized("sessions"))
    }

    pub fn ids(&self) -> HostResult<Vec<ItemId>> {
        Ok(self
            .records
            .as_ref()
            .ok_or(HostError::NotInitialized("sessions"))?
            .iter()
            .map(SessionHandle::id)
            .collect())
    }

    pub fn snapshot(&self) -> HostResult<Vec<Session>> {
        Ok(self
            .records
            .as_ref()
            .ok_or(HostError::NotInitialized("sessions"))?
            .iter()
            .map(SessionHandle::snapshot)
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep copy of the collection with the policy's fields removed.
    pub fn proposal(&self, policy: &StripPolicy) -> HostResult<Vec<Session>> {
        let mut sessions = self.snapshot()?;
        for session in &mut sessions {
            policy.apply(session);
        }
        Ok(sessions)
    }

    /// Merges `update` into the records named by `candidates`, in place.
    ///
    /// A record keeps exactly the non-id fields of its update entry; a record
    /// with no update entry keeps only its id. Update entries for ids that are
    /// not candidates are ignored.
    pub fn replace_all(&mut self, candidates: &[Session], update: &[Session]) -> HostResult<()> {
        if self.records.is_none() {
            return Err(HostError::NotInitialized("sessions"));
        }

        let mut by_id: HashMap<&ItemId, &Session> = HashMap::with_capacity(update.len());
        for entry in update {
            by_id.entry(&entry.id).or_insert(entry);
        }

        for candidate in candidates {
            let Some(handle) = self.get(&candidate.id) else {
                debug!(id = %candidate.id, "reset candidate has no session record");
                continue;
            };
            let fields = by_id
                .get(&candidate.id)
                .map(|entry| entry.fields.clone())
                .unwrap_or_default();
            handle.overwrite(fields);
        }
        Ok(())
    }
}

fn ensure_unique_ids(sessions: &[Session]) -> HostResult<()> {
    let mut seen = HashSet::with_capacity(sessions.len());
    for session in sessions {
        if !seen.insert(&session.id) {
            return Err(HostError::InvalidArgument(format!(
                "session id {} appears more than once",
                session.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;
