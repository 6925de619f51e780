//! Persisted classification overrides.

use crate::types::Classification;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Opaque keyed store for classifications that must survive sessions.
///
/// Keys are entity keys (content hash, else numeric id). `set(id, None)` clears.
pub trait OverrideStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Classification>;
    fn set(&self, id: &str, value: Option<Classification>);
}

/// Process-local store. Hosts that persist to disk provide their own impl.
#[derive(Debug, Default)]
pub struct InMemoryOverrideStore {
    entries: Mutex<HashMap<String, Classification>>,
}

impl InMemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OverrideStore for InMemoryOverrideStore {
    fn get(&self, id: &str) -> Option<Classification> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn set(&self, id: &str, value: Option<Classification>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(classification) => {
                entries.insert(id.to_string(), classification);
            }
            None => {
                entries.remove(id);
            }
        }
    }
}
