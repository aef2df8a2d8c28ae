use super::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Opaque entity identifier. Caller- or store-assigned, immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Store-assigned id for records created without one.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Persisted entity snapshot: scalar fields only, relations are read
/// separately through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Id,
    pub fields: BTreeMap<String, Value>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Caller-supplied partial entity.
///
/// A missing `id` means "create, store assigns the id". A present `id`
/// matches an existing row (update) or is honored as the final id of a new
/// row (create-with-caller-supplied-id). Nested children ride along per
/// relation name; only relations in the call's allow-list are acted upon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    pub id: Option<Id>,
    pub fields: BTreeMap<String, Value>,
    pub relations: BTreeMap<String, Vec<InputRecord>>,
}

impl InputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<Id>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn relation(mut self, name: impl Into<String>, children: Vec<InputRecord>) -> Self {
        self.relations.insert(name.into(), children);
        self
    }
}

/// Clonable cancellation flag shared between a caller, the reconciler, and
/// (optionally) the store. The reconciler checks it before every store
/// phase and rolls back when it trips.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
