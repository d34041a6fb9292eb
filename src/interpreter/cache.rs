//! Reference cache: controller-chosen ids for agent-local values.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::value::Value;
use crate::runtime::error::EvalError;

/// Mapping from opaque identifier to a live agent value.
///
/// One cache exists per agent session. Entries are added by `CONNECT`
/// (directly, or when a deferred result resolves) and removed by
/// `DISCONNECT`.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl ReferenceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an id. Absence is an error, never `Null`.
    pub fn get(&self, id: &str) -> Result<Value, EvalError> {
        self.entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::MissingReference(id.to_string()))
    }

    /// Cache a value, replacing any previous entry for `id`.
    pub fn set(&self, id: impl Into<String>, value: Value) {
        self.entries.write().insert(id.into(), value);
    }

    /// Drop an id. Forgetting an absent id is not an error.
    pub fn forget(&self, id: &str) -> Option<Value> {
        self.entries.write().remove(id)
    }

    /// Whether `id` is cached.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
