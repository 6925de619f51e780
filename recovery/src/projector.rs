//! Optimistic status overlays
//!
//! A UI-only layer drawn over authoritative entity status while a user
//! operation is in progress. Overlays leave through exactly two doors: an
//! explicit clear from the caller, or a reconciliation pass that sees the
//! entity out of its transitional condition. Age is never a reason.

use crate::types::{EntitySnapshot, EntityStatus, OperationTag};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimisticStatusEntry {
    pub state: Option<EntityStatus>,
    pub operation: Option<OperationTag>,
}

/// One change to the overlay map. `state: None` clears the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticStatusUpdate {
    pub id: String,
    pub state: Option<EntityStatus>,
    pub operation: Option<OperationTag>,
}

impl OptimisticStatusUpdate {
    pub fn set(id: impl Into<String>, state: EntityStatus) -> Self {
        Self {
            id: id.into(),
            state: Some(state),
            operation: None,
        }
    }

    pub fn clear(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: None,
            operation: None,
        }
    }

    pub fn with_operation(mut self, operation: OperationTag) -> Self {
        self.operation = Some(operation);
        self
    }
}

#[derive(Debug, Default)]
pub struct OptimisticStatusProjector {
    overlays: HashMap<String, OptimisticStatusEntry>,
}

impl OptimisticStatusProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply explicit overlay changes in order.
    pub fn update_optimistic_statuses<I>(&mut self, updates: I)
    where
        I: IntoIterator<Item = OptimisticStatusUpdate>,
    {
        for update in updates {
            match update.state {
                Some(state) => {
                    self.overlays.insert(
                        update.id,
                        OptimisticStatusEntry {
                            state: Some(state),
                            operation: update.operation,
                        },
                    );
                }
                None => {
                    self.overlays.remove(&update.id);
                }
            }
        }
    }

    /// Drop overlays whose entity has left the transitional condition.
    ///
    /// Entities missing from `snapshot` have left it too. Returns the ids,
    /// sorted, that were cleared.
    pub fn reconcile(&mut self, snapshot: &[EntitySnapshot]) -> Vec<String> {
        if self.overlays.is_empty() {
            return Vec::new();
        }

        let still_transitional: HashSet<String> = snapshot
            .iter()
            .filter(|entity| entity.is_transitional())
            .filter_map(EntitySnapshot::entity_key)
            .collect();

        let mut cleared = Vec::new();
        self.overlays.retain(|id, _| {
            let keep = still_transitional.contains(id);
            if !keep {
                cleared.push(id.clone());
            }
            keep
        });

        cleared.sort();
        if !cleared.is_empty() {
            tracing::debug!(cleared = ?cleared, "Reconciled optimistic overlays");
        }
        cleared
    }

    pub fn entry(&self, id: &str) -> Option<&OptimisticStatusEntry> {
        self.overlays.get(id)
    }

    /// Status presentation code should render: the overlay if any, else the
    /// authoritative value. Never written back into the snapshot.
    pub fn display_status(&self, entity: &EntitySnapshot) -> EntityStatus {
        entity
            .entity_key()
            .and_then(|key| self.overlays.get(&key))
            .and_then(|entry| entry.state)
            .unwrap_or(entity.status)
    }

    pub fn remove(&mut self, id: &str) -> Option<OptimisticStatusEntry> {
        self.overlays.remove(id)
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }
}
