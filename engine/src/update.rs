//! Server updates: partial, per-collection item payloads.
//!
//! An update is parsed against the schema first, so a malformed payload is
//! rejected before anything is applied. Item-level anomalies (missing id,
//! incomplete new item, stale version) are dropped by policy.

use crate::config::RebaseOptions;
use crate::schema::{CollectionSchema, Schema};
use crate::state::{document_version, Document, State, VERSION_KEY};
use crate::{error::Result, CollectionName, Error, ItemId, Version};
use serde_json::Value;
use std::collections::BTreeMap;

/// Marker key that removes an existing item.
pub const DELETED_KEY: &str = "$deleted";

/// One partial item from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpdate {
    /// Item id (absent for singleton objects)
    pub id: Option<ItemId>,
    /// Supplied fields, including `$version` when numeric
    pub fields: Document,
    /// Incoming server version
    pub version: Option<Version>,
    /// Whether the server removed the item
    pub deleted: bool,
}

impl ItemUpdate {
    fn from_document(id: Option<ItemId>, mut fields: Document) -> Self {
        let deleted = matches!(fields.remove(DELETED_KEY), Some(Value::Bool(true)));
        if fields.get(VERSION_KEY).is_some() && document_version(&fields).is_none() {
            tracing::debug!(id = ?id, "ignoring non-numeric $version");
            fields.remove(VERSION_KEY);
        }
        let version = document_version(&fields);
        Self {
            id,
            fields,
            version,
            deleted,
        }
    }
}

/// Counts of what an update did to one state tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub created: usize,
    pub patched: usize,
    pub deleted: usize,
    /// Incomplete new items and stale versions
    pub dropped: usize,
}

/// A parsed server update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerUpdate {
    pub collections: BTreeMap<CollectionName, Vec<ItemUpdate>>,
    pub objects: BTreeMap<String, ItemUpdate>,
}

impl ServerUpdate {
    /// Parse a JSON update of the form
    /// `{ "<collection>": [ {id, ...}, ... ], "<object>": { ... } }`.
    pub fn parse(schema: &Schema, update: &Value) -> Result<Self> {
        let root = update
            .as_object()
            .ok_or_else(|| Error::InvalidUpdate("update must be an object".into()))?;

        let mut parsed = ServerUpdate::default();
        for (name, entry) in root {
            if schema.get_collection(name).is_some() {
                let items = entry.as_array().ok_or_else(|| {
                    Error::InvalidUpdate(format!("collection '{name}' must be an array"))
                })?;
                let mut updates = Vec::with_capacity(items.len());
                for item in items {
                    let fields = item.as_object().ok_or_else(|| {
                        Error::InvalidUpdate(format!("items of '{name}' must be objects"))
                    })?;
                    match fields.get("id").and_then(Value::as_str) {
                        Some(id) => updates.push(ItemUpdate::from_document(
                            Some(id.to_string()),
                            fields.clone(),
                        )),
                        None => tracing::debug!(collection = %name, "dropping item without id"),
                    }
                }
                parsed.collections.insert(name.clone(), updates);
            } else if schema.get_object(name).is_some() {
                let fields = entry.as_object().ok_or_else(|| {
                    Error::InvalidUpdate(format!("object '{name}' must be an object"))
                })?;
                parsed
                    .objects
                    .insert(name.clone(), ItemUpdate::from_document(None, fields.clone()));
            } else {
                tracing::warn!(name = %name, "server update names an undeclared collection");
            }
        }
        Ok(parsed)
    }

    /// Number of item payloads carried.
    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum::<usize>() + self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge this update into `state`.
    pub fn apply(
        &self,
        schema: &Schema,
        state: &mut State,
        options: &RebaseOptions,
    ) -> UpdateStats {
        let mut stats = UpdateStats::default();

        for (name, updates) in &self.collections {
            let Some(collection) = schema.get_collection(name) else {
                continue;
            };
            let items = state.collections.entry(name.clone()).or_default();
            for update in updates {
                let Some(id) = update.id.as_deref() else {
                    continue;
                };
                match items.get_mut(id) {
                    Some(doc) => {
                        if !accepts_version(collection, doc, update.version) {
                            stats.dropped += 1;
                            continue;
                        }
                        if update.deleted {
                            items.remove(id);
                            stats.deleted += 1;
                        } else if collection.patch_document(doc, &update.fields, options) {
                            stats.patched += 1;
                        }
                    }
                    None => match create_document(collection, Some(id), update, options) {
                        Some(doc) => {
                            items.insert(id.to_string(), doc);
                            stats.created += 1;
                        }
                        None if update.deleted => {}
                        None => stats.dropped += 1,
                    },
                }
            }
        }

        for (name, update) in &self.objects {
            let Some(object) = schema.get_object(name) else {
                continue;
            };
            match state.objects.get_mut(name) {
                Some(doc) => {
                    if !accepts_version(object, doc, update.version) {
                        stats.dropped += 1;
                    } else if update.deleted {
                        state.objects.remove(name);
                        stats.deleted += 1;
                    } else if object.patch_document(doc, &update.fields, options) {
                        stats.patched += 1;
                    }
                }
                None => match create_document(object, None, update, options) {
                    Some(doc) => {
                        state.objects.insert(name.clone(), doc);
                        stats.created += 1;
                    }
                    None if update.deleted => {}
                    None => stats.dropped += 1,
                },
            }
        }

        stats
    }
}

/// The stored version never regresses. Unversioned schemas accept everything.
fn accepts_version(
    schema: &CollectionSchema,
    stored: &Document,
    incoming: Option<Version>,
) -> bool {
    if !schema.versioned {
        return true;
    }
    match (document_version(stored), incoming) {
        (Some(stored), Some(incoming)) if incoming < stored => {
            tracing::debug!(
                schema = %schema.name,
                stored,
                incoming,
                "dropping stale version"
            );
            false
        }
        _ => true,
    }
}

/// Build a new document, or `None` if the payload cannot create one.
fn create_document(
    schema: &CollectionSchema,
    id: Option<&str>,
    update: &ItemUpdate,
    options: &RebaseOptions,
) -> Option<Document> {
    if update.deleted {
        return None;
    }
    if !options.allow_server_fields {
        tracing::debug!(schema = %schema.name, id = ?id, "server fields disabled, not creating");
        return None;
    }
    if let Some(field) = schema.missing_required(&update.fields) {
        tracing::debug!(
            schema = %schema.name,
            id = ?id,
            missing = field,
            "dropping incomplete item"
        );
        return None;
    }
    Some(schema.new_document(id, &update.fields, options))
}
