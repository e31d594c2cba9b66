//! Snapshot types for persisting and restoring engine state.
//!
//! Only the two ground truths are persisted: server state and the pending
//! queue. Computed state is always rebuilt by replay on restore, so a
//! persisted engine and a freshly replayed one cannot drift apart.

use crate::config::EngineConfig;
use crate::engine::PendingMutation;
use crate::state::State;
use crate::{error::Result, Error, Schema, SchemaVersion};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Durable engine state.
///
/// State trees use BTreeMap, so serialization order is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// Authoritative replica
    pub server_state: State,
    /// Unconfirmed mutations in queue order
    pub pending: Vec<PendingMutation>,
}

impl EngineSnapshot {
    /// Capture server state and the queue.
    pub fn capture(
        schema_version: SchemaVersion,
        server_state: &State,
        pending: &[PendingMutation],
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            server_state: server_state.clone(),
            pending: pending.to_vec(),
        }
    }

    /// Validate the snapshot against a schema.
    ///
    /// Queued mutations with no registered handler are allowed: they are
    /// skipped with a warning during replay.
    pub fn validate(&self, schema: &Schema, config: &EngineConfig) -> Result<()> {
        if config.verify_schema_version && self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        for name in self.server_state.collections.keys() {
            if schema.get_collection(name).is_none() {
                return Err(Error::InvalidSnapshot(format!("unknown collection: {name}")));
            }
        }
        for name in self.server_state.objects.keys() {
            if schema.get_object(name).is_none() {
                return Err(Error::InvalidSnapshot(format!("unknown object: {name}")));
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about the durable state (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version
    pub schema_version: SchemaVersion,
    /// Items across all server collections
    pub item_count: usize,
    /// Pending mutation count, local ones included
    pub pending_count: usize,
}

impl From<&EngineSnapshot> for SnapshotMetadata {
    fn from(snapshot: &EngineSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema_version,
            item_count: snapshot.server_state.item_count(),
            pending_count: snapshot.pending.len(),
        }
    }
}
