//! Named mutations and their handlers.
//!
//! A mutation is a deterministic function from a draft of the state tree
//! plus an input to an edited draft. Mutations are dispatched by name
//! through a lookup table; typed variants decode their input first.

use crate::schema::{validate_shape, FieldDef};
use crate::state::State;
use crate::{error::Result, Error, MutationName};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Edits a draft of the state tree in place.
pub type Handler = Arc<dyn Fn(&mut State, &Value) + Send + Sync>;

/// Checks a mutation input before it is queued.
pub type Validator = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// A named mutation with optional input validation.
#[derive(Clone)]
pub struct Mutation {
    name: MutationName,
    handler: Handler,
    validators: Vec<Validator>,
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &self.name)
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl Mutation {
    /// Create a mutation taking raw JSON input.
    pub fn new<F>(name: impl Into<MutationName>, handler: F) -> Self
    where
        F: Fn(&mut State, &Value) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            validators: Vec::new(),
        }
    }

    /// Create a mutation whose input decodes into `I`.
    ///
    /// Input that does not decode is rejected before queueing. If it fails
    /// to decode at replay time (for example after a restore under a changed
    /// schema) the handler is skipped with a warning.
    pub fn typed<I, F>(name: impl Into<MutationName>, handler: F) -> Self
    where
        I: DeserializeOwned + 'static,
        F: Fn(&mut State, I) + Send + Sync + 'static,
    {
        let name = name.into();
        let mutation_name = name.clone();
        Self::new(name, move |draft, input| match <I as Deserialize>::deserialize(input) {
            Ok(input) => handler(draft, input),
            Err(e) => {
                tracing::warn!(mutation = %mutation_name, error = %e, "skipping undecodable input")
            }
        })
        .with_validator(|input| {
            <I as Deserialize>::deserialize(input)
                .map(|_| ())
                .map_err(|e| Error::InvalidPayload(e.to_string()))
        })
    }

    /// Validate object input against typed field definitions.
    pub fn with_input_shape(self, fields: Vec<FieldDef>) -> Self {
        self.with_validator(move |input| validate_shape(&fields, input))
    }

    /// Add a custom validator. All validators must pass.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &MutationName {
        &self.name
    }

    /// Run every validator against `input`.
    pub fn validate(&self, input: &Value) -> Result<()> {
        for validator in &self.validators {
            validator(input).map_err(|e| Error::InvalidInput {
                mutation: self.name.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Apply the handler to a draft.
    pub fn apply(&self, draft: &mut State, input: &Value) {
        (self.handler)(draft, input)
    }
}

/// Lookup table of mutations by name.
#[derive(Clone, Default)]
pub struct Mutations {
    table: BTreeMap<MutationName, Mutation>,
}

impl fmt::Debug for Mutations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}

impl Mutations {
    /// Register a mutation. A second registration under the same name fails.
    pub fn register(&mut self, mutation: Mutation) -> Result<()> {
        if self.table.contains_key(&mutation.name) {
            return Err(Error::DuplicateMutation(mutation.name));
        }
        self.table.insert(mutation.name.clone(), mutation);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Mutation> {
        self.table.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &MutationName> {
        self.table.keys()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
