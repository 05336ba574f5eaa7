//! Snapshot types for persisting and restoring an actor's sync state.
//!
//! Snapshots are the bridge between the in-memory [`Replica`](crate::Replica)
//! and persistent storage. Clock state is not part of a snapshot: the uptime
//! counter restarts with the process, so a restored actor must resync.

use crate::{
    cell::Topology, error::Result, store::FieldCell, ChangeQueue, Error, FieldKey, FieldSchema,
    SchemaVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of one actor.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// Cell topology of the actor
    pub topology: Topology,
    /// Every field's cell, by key
    pub cells: BTreeMap<FieldKey, FieldCell>,
    /// Local edits not yet delivered
    pub pending: ChangeQueue,
    /// Whether the last config upload covered every local edit
    pub config_sync_status: bool,
}

impl ActorSnapshot {
    /// Number of fields in the snapshot.
    pub fn field_count(&self) -> usize {
        self.cells.len()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &FieldSchema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        for (key, cell) in &self.cells {
            let def = schema
                .get(key)
                .ok_or_else(|| Error::UnknownField(key.clone()))?;
            if cell.field_type() != def.field_type {
                return Err(Error::TypeMismatch {
                    field: key.clone(),
                    expected: def.field_type.to_string(),
                    got: cell.field_type().to_string(),
                });
            }
            if cell.topology() != self.topology {
                return Err(Error::InvalidSnapshot(format!(
                    "topology mismatch for field: {}",
                    key
                )));
            }
        }

        for change in self.pending.entries() {
            let def = schema
                .get(&change.key)
                .ok_or_else(|| Error::UnknownField(change.key.clone()))?;
            def.validate(&change.value)?;
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
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
