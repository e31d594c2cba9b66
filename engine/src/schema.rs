//! Schema definition and validation.
//!
//! A schema declares the collections (ID-indexed) and singleton objects of
//! the state tree, tags every field as synced, local-only or reference, and
//! holds the table of named mutations.

use crate::config::RebaseOptions;
use crate::mutation::{Mutation, Mutations};
use crate::state::{Document, State, VERSION_KEY};
use crate::{error::Result, CollectionName, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// How a field is exchanged with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Exchanged with the server
    Synced,
    /// Exists only in the replica
    Local,
    /// Synced id of an item in another collection
    Reference,
}

impl FieldKind {
    /// Whether the server owns this field's value.
    pub fn is_server_owned(self) -> bool {
        matches!(self, FieldKind::Synced | FieldKind::Reference)
    }
}

/// Definition of a field in a collection or object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Synced, local or reference
    pub kind: FieldKind,
    /// Field type
    pub field_type: FieldType,
    /// Value used when the field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Target collection of a reference field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<CollectionName>,
    /// Whether `null` is an acceptable value
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDef {
    fn new(name: impl Into<String>, kind: FieldKind, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            field_type,
            default: None,
            references: None,
            nullable: false,
        }
    }

    /// A field exchanged with the server.
    pub fn synced(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, FieldKind::Synced, field_type)
    }

    /// A field that only exists in the replica.
    pub fn local(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, FieldKind::Local, field_type)
    }

    /// A synced field holding the id of an item in `collection`.
    pub fn reference(name: impl Into<String>, collection: impl Into<CollectionName>) -> Self {
        Self {
            references: Some(collection.into()),
            ..Self::new(name, FieldKind::Reference, FieldType::String)
        }
    }

    /// Builder-style method to set a default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Builder-style method to accept `null`.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// A server-owned field that must be present for an item to exist.
    pub fn is_required(&self) -> bool {
        self.kind.is_server_owned() && !self.nullable && self.default.is_none()
    }

    /// Value to use when the field is absent.
    pub fn default_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        let required = !self.nullable && self.default.is_none();
        match value {
            None if required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(Value::Null) if self.nullable => Ok(()),
            Some(Value::Null) => Err(Error::MissingRequiredField(self.name.clone())),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Validate an object against a list of field definitions.
pub fn validate_shape(fields: &[FieldDef], value: &Value) -> Result<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

    for field in fields {
        field.validate(obj.get(&field.name))?;
    }

    Ok(())
}

/// Schema for a collection or a singleton object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection or object name
    pub name: CollectionName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Whether documents carry a server `$version`
    #[serde(default)]
    pub versioned: bool,
}

impl CollectionSchema {
    /// Create a new collection schema.
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            versioned: false,
        }
    }

    /// Builder-style method to track server versions.
    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// Get a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// First required field the incoming document lacks, if any.
    pub fn missing_required<'a>(&'a self, incoming: &Document) -> Option<&'a str> {
        self.fields
            .iter()
            .filter(|f| f.is_required())
            .find(|f| incoming.get(&f.name).map_or(true, Value::is_null))
            .map(|f| f.name.as_str())
    }

    /// Build a new document from a complete incoming payload.
    ///
    /// Server-owned fields are copied or defaulted. Local fields start at
    /// their default unless `allow_local_fields` is set and a value is given.
    /// Undeclared fields are dropped.
    pub fn new_document(
        &self,
        id: Option<&str>,
        incoming: &Document,
        options: &RebaseOptions,
    ) -> Document {
        let mut doc = Document::new();
        if let Some(id) = id {
            doc.insert("id".into(), Value::String(id.to_string()));
        }

        for field in &self.fields {
            let provided = incoming.get(&field.name).cloned();
            let value = match field.kind {
                FieldKind::Local if options.allow_local_fields => provided,
                FieldKind::Local => None,
                _ => provided,
            };
            doc.insert(
                field.name.clone(),
                value.unwrap_or_else(|| field.default_value()),
            );
        }

        if self.versioned {
            if let Some(version) = incoming.get(VERSION_KEY) {
                doc.insert(VERSION_KEY.into(), version.clone());
            }
        }
        doc
    }

    /// Patch an existing document, gated by field kind.
    ///
    /// Returns whether anything changed.
    pub fn patch_document(
        &self,
        doc: &mut Document,
        incoming: &Document,
        options: &RebaseOptions,
    ) -> bool {
        let mut changed = false;
        for (name, value) in incoming {
            if name == "id" || name == VERSION_KEY {
                continue;
            }
            let Some(field) = self.field(name) else {
                tracing::trace!(schema = %self.name, field = %name, "ignoring undeclared field");
                continue;
            };
            let allowed = match field.kind {
                FieldKind::Local => options.allow_local_fields,
                FieldKind::Synced | FieldKind::Reference => options.allow_server_fields,
            };
            if allowed && doc.get(name) != Some(value) {
                doc.insert(name.clone(), value.clone());
                changed = true;
            }
        }

        if self.versioned && options.allow_server_fields {
            if let Some(version) = incoming.get(VERSION_KEY) {
                if doc.get(VERSION_KEY) != Some(version) {
                    doc.insert(VERSION_KEY.into(), version.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Document built from defaults alone, if that makes it complete.
    fn initial_document(&self) -> Option<Document> {
        let empty = Document::new();
        if self.missing_required(&empty).is_some() {
            return None;
        }
        Some(self.new_document(None, &empty, &RebaseOptions::default()))
    }
}

/// Schema for the entire state tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version for persisted snapshots
    pub version: SchemaVersion,
    /// Collection schemas by name
    #[serde(default)]
    pub collections: BTreeMap<CollectionName, CollectionSchema>,
    /// Singleton object schemas by name
    #[serde(default)]
    pub objects: BTreeMap<String, CollectionSchema>,
    /// Mutation handlers (not serialized)
    #[serde(skip)]
    pub mutations: Mutations,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: BTreeMap::new(),
            objects: BTreeMap::new(),
            mutations: Mutations::default(),
        }
    }

    fn ensure_free(&self, name: &str) -> Result<()> {
        if self.collections.contains_key(name) || self.objects.contains_key(name) {
            return Err(Error::DuplicateDefinition(name.to_string()));
        }
        Ok(())
    }

    /// Add a collection to the schema.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> Result<&mut Self> {
        self.ensure_free(&collection.name)?;
        self.collections.insert(collection.name.clone(), collection);
        Ok(self)
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Result<Self> {
        self.add_collection(collection)?;
        Ok(self)
    }

    /// Add a singleton object to the schema.
    pub fn add_object(&mut self, object: CollectionSchema) -> Result<&mut Self> {
        self.ensure_free(&object.name)?;
        self.objects.insert(object.name.clone(), object);
        Ok(self)
    }

    /// Builder-style method to add a singleton object.
    pub fn with_object(mut self, object: CollectionSchema) -> Result<Self> {
        self.add_object(object)?;
        Ok(self)
    }

    /// Register a mutation. Names are unique within a schema.
    pub fn register(&mut self, mutation: Mutation) -> Result<&mut Self> {
        self.mutations.register(mutation)?;
        Ok(self)
    }

    /// Builder-style method to register a mutation.
    pub fn with_mutation(mut self, mutation: Mutation) -> Result<Self> {
        self.register(mutation)?;
        Ok(self)
    }

    /// Get a collection schema by name.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Get a singleton object schema by name.
    pub fn get_object(&self, name: &str) -> Option<&CollectionSchema> {
        self.objects.get(name)
    }

    /// Look up a mutation handler.
    pub fn mutation(&self, name: &str) -> Option<&Mutation> {
        self.mutations.get(name)
    }

    /// Drop collections and objects this schema does not declare.
    ///
    /// Returns how many were removed.
    pub fn retain_declared(&self, state: &mut State) -> usize {
        let before = state.collections.len() + state.objects.len();
        state.collections.retain(|name, _| {
            let declared = self.collections.contains_key(name);
            if !declared {
                tracing::warn!(name = %name, "dropping undeclared collection");
            }
            declared
        });
        state.objects.retain(|name, _| {
            let declared = self.objects.contains_key(name);
            if !declared {
                tracing::warn!(name = %name, "dropping undeclared object");
            }
            declared
        });
        before - state.collections.len() - state.objects.len()
    }

    /// Empty state: every collection present, and every singleton whose
    /// defaults alone make it complete.
    pub fn initial_state(&self) -> State {
        let mut state = State::default();
        for name in self.collections.keys() {
            state.collections.insert(name.clone(), BTreeMap::new());
        }
        for (name, object) in &self.objects {
            if let Some(doc) = object.initial_document() {
                state.objects.insert(name.clone(), doc);
            }
        }
        state
    }
}
