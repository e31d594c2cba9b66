//! Engine - server state, the pending-mutation queue, and computed state.
//!
//! Server updates only ever touch server state. Local edits are queued and
//! computed state is rebuilt by replaying the whole queue, in order, on top
//! of server state. Every state tree is held behind an `Arc` and replaced
//! wholesale, so a snapshot returned by [`Engine::state`] never changes
//! under its holder.

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, MutateOptions, RebaseOptions};
use crate::snapshot::{EngineSnapshot, SnapshotMetadata};
use crate::state::State;
use crate::update::ServerUpdate;
use crate::{error::Result, Error, MutationId, MutationName, Schema, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// A locally applied mutation awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    /// Unique mutation ID
    pub id: MutationId,
    /// When it was applied locally
    pub timestamp: Timestamp,
    /// Registered mutation name
    pub name: MutationName,
    /// Handler input
    pub input: Value,
    /// Replayed locally but never sent upstream
    #[serde(default)]
    pub is_local: bool,
}

/// The payload a transport sends upstream for one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMutation {
    pub id: MutationId,
    pub timestamp: Timestamp,
    pub name: MutationName,
    pub input: Value,
}

impl From<&PendingMutation> for OutboundMutation {
    fn from(pending: &PendingMutation) -> Self {
        Self {
            id: pending.id.clone(),
            timestamp: pending.timestamp,
            name: pending.name.clone(),
            input: pending.input.clone(),
        }
    }
}

/// The replica reconciliation engine.
#[derive(Debug)]
pub struct Engine {
    schema: Arc<Schema>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    /// Authoritative replica, changed only by server updates
    server_state: Arc<State>,
    /// Mutations not yet confirmed, in application order
    queue: Vec<PendingMutation>,
    /// Server state with the queue replayed on top
    state: Arc<State>,
}

impl Engine {
    /// Create an engine using the system clock.
    pub fn new(schema: Schema) -> Self {
        Self::with_clock(schema, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit clock.
    pub fn with_clock(schema: Schema, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(schema, clock, EngineConfig::default())
    }

    /// Create an engine with an explicit clock and configuration.
    pub fn with_config(schema: Schema, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let initial = Arc::new(schema.initial_state());
        Self {
            schema: Arc::new(schema),
            clock,
            config,
            server_state: Arc::clone(&initial),
            queue: Vec::new(),
            state: initial,
        }
    }

    /// Rebuild an engine from a [`persist`](Self::persist) payload.
    pub fn restore(schema: Schema, payload: &str) -> Result<Self> {
        Self::restore_with(schema, Arc::new(SystemClock), EngineConfig::default(), payload)
    }

    /// Rebuild an engine from a payload with an explicit clock and configuration.
    ///
    /// Computed state is recomputed by replay, never read from the payload.
    pub fn restore_with(
        schema: Schema,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        payload: &str,
    ) -> Result<Self> {
        let snapshot = EngineSnapshot::from_json(payload)?;
        snapshot.validate(&schema, &config)?;

        let mut engine = Self::with_config(schema, clock, config);
        engine.server_state = Arc::new(snapshot.server_state);
        engine.queue = snapshot.pending;
        engine.recompute();

        tracing::debug!(
            pending = engine.queue.len(),
            items = engine.server_state.item_count(),
            "engine restored"
        );
        Ok(engine)
    }

    /// Computed state: what the UI reads.
    pub fn state(&self) -> Arc<State> {
        Arc::clone(&self.state)
    }

    /// Server state without any pending mutation applied.
    pub fn server_state(&self) -> Arc<State> {
        Arc::clone(&self.server_state)
    }

    /// Every queued mutation, local ones included, in queue order.
    pub fn queue(&self) -> &[PendingMutation] {
        &self.queue
    }

    /// Queued mutations a transport should send upstream, in queue order.
    pub fn pending_mutations(&self) -> Vec<OutboundMutation> {
        self.queue
            .iter()
            .filter(|m| !m.is_local)
            .map(OutboundMutation::from)
            .collect()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply a named mutation.
    ///
    /// Queued mutations return their id. Direct mutations are applied once
    /// to server and computed state, create no queue entry, and return `None`.
    pub fn mutate(
        &mut self,
        name: &str,
        input: Value,
        options: MutateOptions,
    ) -> Result<Option<MutationId>> {
        let mutation = self
            .schema
            .mutation(name)
            .ok_or_else(|| Error::UnregisteredMutation(name.to_string()))?;
        mutation.validate(&input)?;

        if options.direct {
            // Persisted state only holds names the schema declares.
            let server_state = Arc::make_mut(&mut self.server_state);
            mutation.apply(server_state, &input);
            self.schema.retain_declared(server_state);
            let state = Arc::make_mut(&mut self.state);
            mutation.apply(state, &input);
            self.schema.retain_declared(state);
            tracing::debug!(mutation = %name, "applied direct mutation");
            return Ok(None);
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.queue.push(PendingMutation {
            id: id.clone(),
            timestamp: self.clock.now(),
            name: name.to_string(),
            input,
            is_local: options.local,
        });
        self.recompute();

        tracing::debug!(
            mutation = %name,
            id = %id,
            local = options.local,
            pending = self.queue.len(),
            "queued mutation"
        );
        Ok(Some(id))
    }

    /// Remove confirmed mutations from the queue.
    ///
    /// Returns how many were removed. Nothing is recomputed if none of the
    /// ids were queued.
    pub fn commit<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed = self.remove_queued(ids);
        if removed > 0 {
            tracing::debug!(removed, pending = self.queue.len(), "committed mutations");
        }
        removed
    }

    /// Drop mutations the server rejected, reverting their optimistic effect.
    ///
    /// Queue semantics match [`commit`](Self::commit).
    pub fn discard<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed = self.remove_queued(ids);
        if removed > 0 {
            tracing::debug!(removed, pending = self.queue.len(), "discarded mutations");
        }
        removed
    }

    fn remove_queued<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: HashSet<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        let before = self.queue.len();
        self.queue.retain(|m| !ids.contains(&m.id));
        let removed = before - self.queue.len();
        if removed > 0 {
            self.recompute();
        }
        removed
    }

    /// Merge a server update into server state.
    ///
    /// Computed state is then rebuilt by replaying the queue, unless
    /// `options.direct` is set, in which case the same patch is applied to
    /// computed state without replay.
    pub fn rebase(&mut self, update: &Value, options: RebaseOptions) -> Result<()> {
        let update = ServerUpdate::parse(&self.schema, update)?;

        let stats = update.apply(
            &self.schema,
            Arc::make_mut(&mut self.server_state),
            &options,
        );
        tracing::debug!(
            created = stats.created,
            patched = stats.patched,
            deleted = stats.deleted,
            dropped = stats.dropped,
            direct = options.direct,
            "rebased server update"
        );

        if options.direct {
            update.apply(&self.schema, Arc::make_mut(&mut self.state), &options);
        } else {
            self.recompute();
        }
        Ok(())
    }

    /// [`rebase`](Self::rebase) with the configured default options.
    pub fn rebase_default(&mut self, update: &Value) -> Result<()> {
        self.rebase(update, self.config.rebase_defaults)
    }

    /// Serialize server state and the queue to one opaque string.
    pub fn persist(&self) -> Result<String> {
        EngineSnapshot::capture(self.schema.version, &self.server_state, &self.queue).to_json()
    }

    /// Summary of the durable state without serializing it.
    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            format_version: crate::snapshot::SNAPSHOT_FORMAT_VERSION,
            schema_version: self.schema.version,
            item_count: self.server_state.item_count(),
            pending_count: self.queue.len(),
        }
    }

    /// Rebuild computed state: a left fold of the queue over server state.
    fn recompute(&mut self) {
        let mut draft = State::clone(&self.server_state);
        for pending in &self.queue {
            match self.schema.mutation(&pending.name) {
                Some(mutation) => mutation.apply(&mut draft, &pending.input),
                None => tracing::warn!(
                    mutation = %pending.name,
                    id = %pending.id,
                    "no handler for queued mutation, skipping during replay"
                ),
            }
        }
        tracing::trace!(replayed = self.queue.len(), "recomputed state");
        self.state = Arc::new(draft);
    }
}
