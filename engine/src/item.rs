//! Item types stored in a diffed collection.

use crate::field::Mutable;
use crate::{ItemId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An item in a [`Collection`](crate::Collection).
///
/// `id` and the immutable attributes are fixed at creation. Mutable
/// attributes carry their own change timestamps and merge field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Unique identifier within the collection
    pub id: ItemId,
    /// Attributes that never change after creation
    #[serde(default)]
    pub immutable: Map<String, Value>,
    /// Attributes merged with last-write-wins
    #[serde(default)]
    pub mutable: BTreeMap<String, Mutable<Value>>,
    /// Server version for versioned collections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

impl Item {
    /// Create an item with no attributes.
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            immutable: Map::new(),
            mutable: BTreeMap::new(),
            version: None,
        }
    }

    /// Builder-style method to add an immutable attribute.
    pub fn with_immutable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.immutable.insert(name.into(), value);
        self
    }

    /// Builder-style method to add a mutable attribute.
    pub fn with_mutable(
        mut self,
        name: impl Into<String>,
        value: Value,
        changed_at: Timestamp,
    ) -> Self {
        self.mutable.insert(name.into(), Mutable::at(value, changed_at));
        self
    }

    /// Builder-style method to set the version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Look up an attribute value, immutable or mutable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.immutable
            .get(name)
            .or_else(|| self.mutable.get(name).map(|field| &field.value))
    }

    /// Look up a mutable attribute with its timestamp.
    pub fn field(&self, name: &str) -> Option<&Mutable<Value>> {
        self.mutable.get(name)
    }

    /// Clamp every mutable timestamp to `now`.
    pub(crate) fn clamped(mut self, now: Timestamp) -> Self {
        for field in self.mutable.values_mut() {
            field.changed_at = crate::clock::clamp(field.changed_at, now);
        }
        self
    }
}
