//! The typed state tree: ID-indexed collections plus singleton objects.
//!
//! Mutation handlers receive a `&mut State` draft. The engine always hands
//! them a private copy, so edits only become visible once the engine swaps
//! the finished tree in.

use crate::{CollectionName, ItemId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Key carrying the server version on versioned documents.
pub const VERSION_KEY: &str = "$version";

/// Snapshot of every collection and singleton.
///
/// Uses BTreeMap for deterministic serialization order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// Collections by name, then items by id
    #[serde(default)]
    pub collections: BTreeMap<CollectionName, BTreeMap<ItemId, Document>>,
    /// Singleton objects by name
    #[serde(default)]
    pub objects: BTreeMap<String, Document>,
}

impl State {
    /// Get an item from a collection.
    pub fn get(&self, collection: &str, id: &str) -> Option<&Document> {
        self.collections.get(collection)?.get(id)
    }

    /// Get a mutable item from a collection.
    pub fn get_mut(&mut self, collection: &str, id: &str) -> Option<&mut Document> {
        self.collections.get_mut(collection)?.get_mut(id)
    }

    /// Read one field of an item.
    pub fn field(&self, collection: &str, id: &str, field: &str) -> Option<&Value> {
        self.get(collection, id)?.get(field)
    }

    /// Set one field of an existing item. Returns false if the item is missing.
    pub fn set_field(
        &mut self,
        collection: &str,
        id: &str,
        field: impl Into<String>,
        value: Value,
    ) -> bool {
        match self.get_mut(collection, id) {
            Some(doc) => {
                doc.insert(field.into(), value);
                true
            }
            None => false,
        }
    }

    /// Insert or replace an item. The collection is created on demand.
    pub fn insert(
        &mut self,
        collection: impl Into<CollectionName>,
        id: impl Into<ItemId>,
        doc: Document,
    ) {
        self.collections
            .entry(collection.into())
            .or_default()
            .insert(id.into(), doc);
    }

    /// Remove an item.
    pub fn remove(&mut self, collection: &str, id: &str) -> Option<Document> {
        self.collections.get_mut(collection)?.remove(id)
    }

    /// All items of a collection.
    pub fn collection(&self, name: &str) -> Option<&BTreeMap<ItemId, Document>> {
        self.collections.get(name)
    }

    /// Get a singleton object.
    pub fn object(&self, name: &str) -> Option<&Document> {
        self.objects.get(name)
    }

    /// Get a mutable singleton object.
    pub fn object_mut(&mut self, name: &str) -> Option<&mut Document> {
        self.objects.get_mut(name)
    }

    /// Count items across all collections.
    pub fn item_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }
}

/// Read the `$version` of a document, if it carries a numeric one.
pub fn document_version(doc: &Document) -> Option<u64> {
    doc.get(VERSION_KEY).and_then(Value::as_u64)
}
