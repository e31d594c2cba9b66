//! Diff operation types for batched collection updates.
//!
//! A batch is an ordered list of [`DiffOp`]s. Each operation is evaluated on
//! its own and resolves to an [`OpResult`]; one rejection never aborts the
//! rest of the batch.

use crate::field::Mutable;
use crate::{CollectionName, Item, ItemId, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Caller-supplied identifier for a diff operation.
pub type OperationId = String;

/// Per-operation outcomes of one batch, keyed by operation id.
pub type DiffResult = BTreeMap<OperationId, OpResult>;

/// A single create, update or delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiffOp {
    #[serde(rename_all = "camelCase")]
    Create { op_id: OperationId, item: Item },
    #[serde(rename_all = "camelCase")]
    Update {
        op_id: OperationId,
        id: ItemId,
        /// Changed mutable fields only
        changes: BTreeMap<String, Mutable<Value>>,
        /// Server version carried by the update, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<Version>,
    },
    #[serde(rename_all = "camelCase")]
    Delete { op_id: OperationId, id: ItemId },
}

impl DiffOp {
    /// Create operation.
    pub fn create(op_id: impl Into<OperationId>, item: Item) -> Self {
        DiffOp::Create {
            op_id: op_id.into(),
            item,
        }
    }

    /// Update operation without a version.
    pub fn update(
        op_id: impl Into<OperationId>,
        id: impl Into<ItemId>,
        changes: impl IntoIterator<Item = (String, Mutable<Value>)>,
    ) -> Self {
        DiffOp::Update {
            op_id: op_id.into(),
            id: id.into(),
            changes: changes.into_iter().collect(),
            version: None,
        }
    }

    /// Delete operation.
    pub fn delete(op_id: impl Into<OperationId>, id: impl Into<ItemId>) -> Self {
        DiffOp::Delete {
            op_id: op_id.into(),
            id: id.into(),
        }
    }

    /// Attach a server version to an update. Other operations are returned unchanged.
    pub fn with_version(mut self, new_version: Version) -> Self {
        if let DiffOp::Update { version, .. } = &mut self {
            *version = Some(new_version);
        }
        self
    }

    /// Get the operation ID.
    pub fn op_id(&self) -> &OperationId {
        match self {
            DiffOp::Create { op_id, .. } => op_id,
            DiffOp::Update { op_id, .. } => op_id,
            DiffOp::Delete { op_id, .. } => op_id,
        }
    }

    /// Get the item ID this operation targets.
    pub fn item_id(&self) -> &ItemId {
        match self {
            DiffOp::Create { item, .. } => &item.id,
            DiffOp::Update { id, .. } => id,
            DiffOp::Delete { id, .. } => id,
        }
    }
}

/// Why an operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// Create for an id that already exists
    DuplicateId,
    /// Update or delete for an id that does not exist
    NotFound,
    /// Update older than the stored item's version
    StaleVersion,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DuplicateId => write!(f, "duplicate id"),
            RejectReason::NotFound => write!(f, "not found"),
            RejectReason::StaleVersion => write!(f, "stale version"),
        }
    }
}

/// Outcome of one diff operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpResult {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl OpResult {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }
}

/// Payload delivered to collection subscribers after a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEvent<'a> {
    /// Collection the batch was applied to
    pub collection: &'a CollectionName,
    /// The batch exactly as submitted
    pub ops: &'a [DiffOp],
    /// Per-operation outcomes
    pub results: &'a DiffResult,
}

impl DiffEvent<'_> {
    /// Operations that changed state.
    pub fn accepted_ops(&self) -> impl Iterator<Item = &DiffOp> {
        self.ops
            .iter()
            .filter(|op| self.results.get(op.op_id()).is_some_and(|r| r.accepted))
    }
}
