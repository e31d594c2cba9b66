//! Collection - a named set of items updated by diff batches.
//!
//! Batches are applied sequentially: each operation sees the state left by
//! the operations before it. Rejections are reported per operation and never
//! abort the batch.

use crate::clock::Clock;
use crate::diff::{DiffEvent, DiffOp, DiffResult, OpResult, RejectReason};
use crate::field::Mutable;
use crate::{CollectionName, Item, ItemId, Timestamp, Version};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Handle returned by [`Collection::subscribe`].
pub type SubscriptionId = u64;

type Listener = Box<dyn FnMut(&DiffEvent<'_>) + Send>;

/// A named collection of items.
pub struct Collection {
    name: CollectionName,
    versioned: bool,
    items: BTreeMap<ItemId, Item>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: SubscriptionId,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("versioned", &self.versioned)
            .field("items", &self.items)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Collection {
    /// Create an empty collection.
    pub fn new(name: impl Into<CollectionName>) -> Self {
        Self {
            name: name.into(),
            versioned: false,
            items: BTreeMap::new(),
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Create an empty collection whose items carry a server version.
    pub fn versioned(name: impl Into<CollectionName>) -> Self {
        Self {
            versioned: true,
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &CollectionName {
        &self.name
    }

    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    /// Get an item by ID.
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    /// Check if an item exists.
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// All items, ordered by id.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Register a listener called once after every batch that changed state.
    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&DiffEvent<'_>) + Send + 'static,
    {
        self.next_subscription += 1;
        let id = self.next_subscription;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    /// Apply an ordered batch of diff operations.
    ///
    /// Returns the outcome of every operation keyed by its operation id.
    pub fn apply_diff(&mut self, ops: &[DiffOp], clock: &dyn Clock) -> DiffResult {
        let now = clock.now();
        let mut results = DiffResult::new();

        for op in ops {
            let result = match op {
                DiffOp::Create { item, .. } => self.apply_create(item, now),
                DiffOp::Update {
                    id,
                    changes,
                    version,
                    ..
                } => self.apply_update(id, changes, *version, now),
                DiffOp::Delete { id, .. } => self.apply_delete(id),
            };

            if let Some(reason) = result.reason {
                tracing::debug!(
                    collection = %self.name,
                    op_id = %op.op_id(),
                    item_id = %op.item_id(),
                    %reason,
                    "diff operation rejected"
                );
            }
            results.insert(op.op_id().clone(), result);
        }

        if results.values().any(|r| r.accepted) {
            let event = DiffEvent {
                collection: &self.name,
                ops,
                results: &results,
            };
            for (_, listener) in self.listeners.iter_mut() {
                listener(&event);
            }
        }

        results
    }

    fn apply_create(&mut self, item: &Item, now: Timestamp) -> OpResult {
        if self.items.contains_key(&item.id) {
            return OpResult::rejected(RejectReason::DuplicateId);
        }

        self.items.insert(item.id.clone(), item.clone().clamped(now));
        OpResult::accepted()
    }

    fn apply_update(
        &mut self,
        id: &str,
        changes: &BTreeMap<String, Mutable<Value>>,
        version: Option<Version>,
        now: Timestamp,
    ) -> OpResult {
        let versioned = self.versioned;
        let Some(item) = self.items.get_mut(id) else {
            return OpResult::rejected(RejectReason::NotFound);
        };

        // The version decides whether the patch is taken at all; timestamps
        // then decide each field inside an accepted patch.
        if versioned {
            if let (Some(stored), Some(incoming)) = (item.version, version) {
                if incoming < stored {
                    return OpResult::rejected(RejectReason::StaleVersion);
                }
            }
            if let Some(incoming) = version {
                item.version = Some(item.version.map_or(incoming, |v| v.max(incoming)));
            }
        }

        for (name, incoming) in changes {
            if item.immutable.contains_key(name) {
                tracing::debug!(
                    collection = %self.name,
                    item_id = %id,
                    field = %name,
                    "ignoring change to immutable attribute"
                );
                continue;
            }
            match item.mutable.get_mut(name) {
                Some(stored) => {
                    stored.merge(incoming.clone(), now);
                }
                None => {
                    item.mutable.insert(name.clone(), incoming.clone().clamped(now));
                }
            }
        }

        OpResult::accepted()
    }

    fn apply_delete(&mut self, id: &str) -> OpResult {
        match self.items.remove(id) {
            Some(_) => OpResult::accepted(),
            None => OpResult::rejected(RejectReason::NotFound),
        }
    }
}
