//! # Replica Engine
//!
//! A client-side reconciliation core for collaborative applications.
//!
//! The engine keeps a local replica of server-owned data, applies local
//! edits optimistically, and reconciles the replica against authoritative
//! server updates without losing unconfirmed local work.
//!
//! ## Design Principles
//!
//! - **No IO**: The engine has no knowledge of files, network, or platform
//! - **Deterministic**: Computed state is a pure fold of the queue over server state
//! - **Synchronous**: Every operation runs to completion before returning
//! - **Copy-on-write**: State trees are replaced wholesale, never edited under a reader
//!
//! ## Core Concepts
//!
//! ### Three views of state
//!
//! The [`Engine`] owns:
//! - **server state**: the authoritative replica, changed only by [`Engine::rebase`]
//! - **the pending queue**: local mutations not yet confirmed by the server
//! - **computed state**: server state with the queue replayed on top
//!
//! ### Schema
//!
//! A [`Schema`] declares collections and singleton objects, tags each field
//! as synced, local-only or reference, and registers named [`Mutation`]s.
//!
//! ### Field-level last-write-wins
//!
//! A [`Collection`] applies batches of [`DiffOp`]s to [`Item`]s whose
//! mutable attributes are [`Mutable`] fields. Fields merge by timestamp,
//! with future timestamps clamped to the local clock.
//!
//! ## Quick Start
//!
//! ```rust
//! use replica_engine::{
//!     CollectionSchema, Engine, FieldDef, FieldType, MutateOptions, Mutation,
//!     RebaseOptions, Schema,
//! };
//! use serde_json::json;
//!
//! // 1. Define a schema with a mutation
//! let schema = Schema::new(1)
//!     .with_collection(CollectionSchema::new(
//!         "todos",
//!         vec![
//!             FieldDef::synced("title", FieldType::String),
//!             FieldDef::synced("completed", FieldType::Bool),
//!         ],
//!     ))
//!     .unwrap()
//!     .with_mutation(Mutation::new("createTodo", |draft, input| {
//!         if let (Some(id), Some(doc)) = (input["id"].as_str(), input.as_object()) {
//!             draft.insert("todos", id, doc.clone());
//!         }
//!     }))
//!     .unwrap();
//!
//! // 2. Create an engine and mutate optimistically
//! let mut engine = Engine::new(schema);
//! let id = engine
//!     .mutate(
//!         "createTodo",
//!         json!({"id": "t1", "title": "X", "completed": false}),
//!         MutateOptions::default(),
//!     )
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(engine.pending_mutations().len(), 1);
//!
//! // 3. The server confirms
//! engine
//!     .rebase(
//!         &json!({"todos": [{"id": "t1", "title": "X", "completed": true}]}),
//!         RebaseOptions::default(),
//!     )
//!     .unwrap();
//! engine.commit([&id]);
//!
//! assert!(engine.pending_mutations().is_empty());
//! assert_eq!(engine.state().field("todos", "t1", "completed"), Some(&json!(true)));
//! ```
//!
//! ## Persistence
//!
//! [`Engine::persist`] serializes server state and the queue to a string;
//! [`Engine::restore`] rebuilds an engine from it and recomputes state by
//! replay.

pub mod clock;
pub mod collection;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod field;
pub mod item;
pub mod mutation;
pub mod schema;
pub mod snapshot;
pub mod state;
pub mod update;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::{Collection, SubscriptionId};
pub use config::{ConfigError, EngineConfig, MutateOptions, RebaseOptions};
pub use diff::{DiffEvent, DiffOp, DiffResult, OpResult, OperationId, RejectReason};
pub use engine::{Engine, OutboundMutation, PendingMutation};
pub use error::Error;
pub use field::Mutable;
pub use item::Item;
pub use mutation::{Mutation, Mutations};
pub use schema::{validate_shape, CollectionSchema, FieldDef, FieldKind, FieldType, Schema};
pub use snapshot::{EngineSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};
pub use state::{Document, State, VERSION_KEY};
pub use update::{ServerUpdate, UpdateStats, DELETED_KEY};

/// Type aliases for clarity
pub type ItemId = String;
pub type CollectionName = String;
pub type MutationId = String;
pub type MutationName = String;
pub type Version = u64;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
