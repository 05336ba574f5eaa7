//! One actor's complete sync state.
//!
//! A replica ties the field store to the offline change queue and the
//! config-upload flag. It is still pure: callers pass in the current time and
//! perform all I/O themselves.

use crate::{
    cell::{RemoteSource, Topology},
    error::Result,
    snapshot::{ActorSnapshot, SNAPSHOT_FORMAT_VERSION},
    store::{FieldStore, IngestReport, PayloadStamp},
    wire::{WireBatch, WireField},
    ChangeQueue, Error, FieldKey, FieldSchema, FieldValue, Millis, PendingChange, Timestamp,
    VersionedValue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of a local edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEdit {
    pub key: FieldKey,
    /// The version written into Self
    pub stored: VersionedValue<FieldValue>,
    /// Whether the change queue took the edit
    pub queued: bool,
}

/// A priority upload built from the current Self values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityPush {
    /// Every field, stamped with the priority flag
    pub fields: Vec<WireField>,
    /// Modification epoch the payload was built at
    pub epoch: u64,
    /// Queued changes whose values the payload already carries
    pub covered: Vec<PendingChange>,
}

/// Result of completing a priority upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushCompletion {
    /// Keys that adopted a peer-assigned timestamp
    pub adopted: Vec<FieldKey>,
    /// Queue entries dropped because the upload delivered them
    pub acknowledged: usize,
    /// Whether the upload covered every local edit
    pub synced: bool,
}

/// Store, queue and upload flag of one actor.
#[derive(Debug, Clone)]
pub struct Replica {
    store: FieldStore,
    queue: ChangeQueue,
    config_sync_status: bool,
    modification_epoch: u64,
}

impl Replica {
    /// Create a replica with default values.
    ///
    /// A fresh replica has nothing to upload; its defaults are replaced by
    /// the first fetch.
    pub fn new(schema: FieldSchema, topology: Topology) -> Result<Self> {
        Ok(Self {
            store: FieldStore::new(schema, topology)?,
            queue: ChangeQueue::new(),
            config_sync_status: true,
            modification_epoch: 0,
        })
    }

    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut FieldStore {
        &mut self.store
    }

    pub fn queue(&self) -> &ChangeQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ChangeQueue {
        &mut self.queue
    }

    pub fn config_sync_status(&self) -> bool {
        self.config_sync_status
    }

    pub fn needs_config_upload(&self) -> bool {
        !self.config_sync_status
    }

    /// Flag that Self holds edits the peers have not seen.
    pub fn mark_config_modified(&mut self) {
        self.config_sync_status = false;
        self.modification_epoch += 1;
    }

    /// Apply a local edit at `now`.
    ///
    /// With a synced clock the edit is stamped `now`; otherwise it is stamped
    /// priority so it still wins once it reaches a peer.
    pub fn record_local_edit(
        &mut self,
        key: &str,
        value: FieldValue,
        now: Timestamp,
    ) -> Result<LocalEdit> {
        let def = self
            .store
            .schema()
            .get(key)
            .ok_or_else(|| Error::UnknownField(key.to_string()))?;
        def.validate(&value)?;

        let timestamp = match now {
            Timestamp::At(ms) => Timestamp::At(ms),
            Timestamp::Priority | Timestamp::Unset => Timestamp::Priority,
        };
        let stored = VersionedValue::new(value, timestamp);

        self.store.update_self(key, stored.clone())?;
        self.mark_config_modified();

        let queued = self.queue.enqueue(PendingChange::new(
            key,
            stored.value.clone(),
            timestamp,
            now,
        ));

        Ok(LocalEdit {
            key: key.to_string(),
            stored,
            queued,
        })
    }

    /// Build the priority upload of every Self value.
    pub fn priority_payload(&self) -> Result<PriorityPush> {
        Ok(PriorityPush {
            fields: self.store.outgoing_payload(PayloadStamp::Priority)?,
            epoch: self.modification_epoch,
            covered: self.queue.entries(),
        })
    }

    /// Record a successful priority upload.
    ///
    /// Self adopts the assigned timestamps where its value is unchanged. The
    /// upload flag is cleared only if no edit landed since the payload was
    /// built.
    pub fn complete_priority_push(
        &mut self,
        push: &PriorityPush,
        assigned: &BTreeMap<FieldKey, Millis>,
    ) -> PushCompletion {
        let adopted = self.store.apply_assigned_timestamps(&push.fields, assigned);
        let acknowledged = push
            .covered
            .iter()
            .filter(|change| self.queue.acknowledge(change))
            .count();

        let synced = push.epoch == self.modification_epoch;
        if synced {
            self.config_sync_status = true;
        }

        PushCompletion {
            adopted,
            acknowledged,
            synced,
        }
    }

    /// Write a fetched batch into `source` and merge with `mode`.
    pub fn ingest(
        &mut self,
        source: RemoteSource,
        batch: &WireBatch,
        fill: Timestamp,
        mode: RemoteSource,
    ) -> IngestReport {
        self.store.ingest(source, batch, fill, mode)
    }

    /// Capture the replica for persistence.
    pub fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version: self.store.schema().version,
            topology: self.store.topology(),
            cells: self.store.export_cells(),
            pending: self.queue.clone(),
            config_sync_status: self.config_sync_status,
        }
    }

    /// Rebuild a replica from a snapshot taken with the same schema.
    pub fn restore(schema: FieldSchema, snapshot: ActorSnapshot) -> Result<Self> {
        snapshot.validate(&schema)?;

        let mut store = FieldStore::new(schema, snapshot.topology)?;
        store.import_cells(snapshot.cells)?;

        Ok(Self {
            store,
            queue: snapshot.pending,
            config_sync_status: snapshot.config_sync_status,
            modification_epoch: 0,
        })
    }

    /// Replace this replica's state with a snapshot of the same schema and
    /// topology. On error the replica is left untouched.
    pub fn import(&mut self, snapshot: ActorSnapshot) -> Result<()> {
        let topology = self.store.topology();
        if snapshot.topology != topology {
            return Err(Error::InvalidSnapshot(format!(
                "snapshot topology {:?} does not match replica topology {:?}",
                snapshot.topology, topology
            )));
        }

        *self = Self::restore(self.store.schema().clone(), snapshot)?;
        Ok(())
    }
}
