//! FieldStore - the in-memory set of sync cells for one actor.
//!
//! The store owns one typed cell per schema field. Inbound batches are
//! written into a remote slot field by field, then merged in one pass, so a
//! caller holding the store never observes a half-applied batch.

use crate::{
    cell::{CellMerge, RemoteSource, SyncCell, Topology},
    error::Result,
    wire::{SkippedField, WireBatch, WireField},
    Error, FieldKey, FieldSchema, FieldType, FieldValue, Millis, SyncValue, Timestamp,
    VersionedValue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A sync cell of any supported type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "cell")]
pub enum FieldCell {
    #[serde(rename = "boolean")]
    Bool(SyncCell<bool>),
    #[serde(rename = "number")]
    Number(SyncCell<f64>),
    #[serde(rename = "string")]
    Text(SyncCell<String>),
}

macro_rules! each_cell {
    ($cell:expr, $c:ident => $body:expr) => {
        match $cell {
            FieldCell::Bool($c) => $body,
            FieldCell::Number($c) => $body,
            FieldCell::Text($c) => $body,
        }
    };
}

fn typed<T: SyncValue>(
    key: &str,
    expected: FieldType,
    value: VersionedValue<FieldValue>,
) -> Result<VersionedValue<T>> {
    let got = value.value.field_type();
    VersionedValue::from_dynamic(value).ok_or_else(|| Error::TypeMismatch {
        field: key.to_string(),
        expected: expected.to_string(),
        got: got.to_string(),
    })
}

impl FieldCell {
    /// Create a cell for `default`'s type.
    pub fn new(topology: Topology, default: FieldValue) -> Self {
        match default {
            FieldValue::Bool(b) => FieldCell::Bool(SyncCell::new(topology, b)),
            FieldValue::Number(n) => FieldCell::Number(SyncCell::new(topology, n)),
            FieldValue::Text(s) => FieldCell::Text(SyncCell::new(topology, s)),
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldCell::Bool(_) => FieldType::Boolean,
            FieldCell::Number(_) => FieldType::Number,
            FieldCell::Text(_) => FieldType::String,
        }
    }

    pub fn topology(&self) -> Topology {
        each_cell!(self, c => c.topology())
    }

    pub fn current(&self) -> VersionedValue<FieldValue> {
        each_cell!(self, c => c.current().clone().into_dynamic())
    }

    pub fn slot(&self, source: RemoteSource) -> VersionedValue<FieldValue> {
        each_cell!(self, c => c.slot(source).clone().into_dynamic())
    }

    pub fn update_from(
        &mut self,
        key: &str,
        source: RemoteSource,
        value: VersionedValue<FieldValue>,
    ) -> Result<()> {
        let expected = self.field_type();
        each_cell!(self, c => {
            c.update_from(source, typed(key, expected, value)?);
            Ok(())
        })
    }

    pub fn update_self(&mut self, key: &str, value: VersionedValue<FieldValue>) -> Result<()> {
        let expected = self.field_type();
        each_cell!(self, c => {
            c.update_self(typed(key, expected, value)?);
            Ok(())
        })
    }

    pub fn merge(&mut self, mode: RemoteSource) -> CellMerge {
        each_cell!(self, c => c.merge(mode))
    }

    fn adopt_assigned_timestamp(&mut self, sent: &FieldValue, assigned: Timestamp) -> bool {
        each_cell!(self, c => match SyncValue::from_field_value(sent.clone()) {
            Some(value) => c.adopt_assigned_timestamp(&value, assigned),
            None => false,
        })
    }
}

/// Result of merging every cell in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    /// Keys whose Self value changed
    pub changed: Vec<FieldKey>,
    /// Per-field merge details
    pub merges: BTreeMap<FieldKey, CellMerge>,
}

impl MergeSummary {
    pub fn any_changed(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Result of writing a batch into a remote slot and merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Keys written into the remote slot
    pub applied: Vec<FieldKey>,
    /// Entries that were skipped, with the reason
    pub skipped: Vec<SkippedField>,
    /// The merge that followed
    pub merge: MergeSummary,
}

/// How to stamp an outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStamp {
    /// Every field carries the priority flag
    Priority,
    /// Every field carries its Self timestamp
    Current,
}

/// All sync cells of one actor.
#[derive(Debug, Clone)]
pub struct FieldStore {
    schema: FieldSchema,
    topology: Topology,
    cells: BTreeMap<FieldKey, FieldCell>,
}

impl FieldStore {
    /// Create a store with one default cell per schema field.
    pub fn new(schema: FieldSchema, topology: Topology) -> Result<Self> {
        schema.validate()?;

        let cells = schema
            .fields
            .iter()
            .map(|def| (def.key.clone(), FieldCell::new(topology, def.default.clone())))
            .collect();

        Ok(Self {
            schema,
            topology,
            cells,
        })
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn get(&self, key: &str) -> Option<&FieldCell> {
        self.cells.get(key)
    }

    /// Self value and timestamp of a field.
    pub fn current(&self, key: &str) -> Option<VersionedValue<FieldValue>> {
        self.cells.get(key).map(FieldCell::current)
    }

    /// Self values of every field.
    pub fn values(&self) -> BTreeMap<FieldKey, FieldValue> {
        self.cells
            .iter()
            .map(|(key, cell)| (key.clone(), cell.current().value))
            .collect()
    }

    fn cell_mut(&mut self, key: &str) -> Result<&mut FieldCell> {
        self.cells
            .get_mut(key)
            .ok_or_else(|| Error::UnknownField(key.to_string()))
    }

    /// Write one version into a remote slot without merging.
    pub fn update_from(
        &mut self,
        source: RemoteSource,
        key: &str,
        value: VersionedValue<FieldValue>,
    ) -> Result<()> {
        self.cell_mut(key)?.update_from(key, source, value)
    }

    /// Overwrite Self for one field.
    pub fn update_self(&mut self, key: &str, value: VersionedValue<FieldValue>) -> Result<()> {
        self.cell_mut(key)?.update_self(key, value)
    }

    /// Write a batch of wire fields into `source`'s slots.
    ///
    /// Fields that are unknown, mistyped or unordered are skipped; the rest
    /// are applied. `fill` stamps fields that arrive without a timestamp.
    pub fn apply_wire(
        &mut self,
        source: RemoteSource,
        fields: &[WireField],
        fill: Timestamp,
    ) -> (Vec<FieldKey>, Vec<SkippedField>) {
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for field in fields {
            match self.apply_one(source, field, fill) {
                Ok(()) => applied.push(field.key.clone()),
                Err(error) => skipped.push(SkippedField {
                    key: Some(field.key.clone()),
                    error,
                }),
            }
        }

        (applied, skipped)
    }

    fn apply_one(&mut self, source: RemoteSource, field: &WireField, fill: Timestamp) -> Result<()> {
        let def = self
            .schema
            .get(&field.key)
            .ok_or_else(|| Error::UnknownField(field.key.clone()))?;
        let value = field.decode(def, fill)?;
        self.update_from(source, &field.key, value)
    }

    /// Merge every cell.
    pub fn merge_all(&mut self, mode: RemoteSource) -> MergeSummary {
        let mut summary = MergeSummary::default();

        for (key, cell) in self.cells.iter_mut() {
            let merge = cell.merge(mode);
            if merge.changed {
                summary.changed.push(key.clone());
            }
            summary.merges.insert(key.clone(), merge);
        }

        summary
    }

    /// Apply a decoded batch to `source` and merge with `mode`, in one step.
    pub fn ingest(
        &mut self,
        source: RemoteSource,
        batch: &WireBatch,
        fill: Timestamp,
        mode: RemoteSource,
    ) -> IngestReport {
        let (applied, mut skipped) = self.apply_wire(source, &batch.fields, fill);
        let mut all_skipped = batch.skipped.clone();
        all_skipped.append(&mut skipped);

        IngestReport {
            applied,
            skipped: all_skipped,
            merge: self.merge_all(mode),
        }
    }

    /// Build an outgoing payload of every Self value.
    ///
    /// With [`PayloadStamp::Current`], a field that was never stamped makes
    /// the whole payload fail with [`Error::ClockUnsynced`].
    pub fn outgoing_payload(&self, stamp: PayloadStamp) -> Result<Vec<WireField>> {
        self.schema
            .fields
            .iter()
            .map(|def| {
                let current = self
                    .current(&def.key)
                    .ok_or_else(|| Error::UnknownField(def.key.clone()))?;
                let stamped = match stamp {
                    PayloadStamp::Priority => VersionedValue::priority(current.value),
                    PayloadStamp::Current => current,
                };
                WireField::encode(def, &stamped)
            })
            .collect()
    }

    /// Adopt timestamps a peer assigned to a pushed payload.
    ///
    /// Only fields whose Self value still matches what was sent are updated.
    /// Returns the keys that adopted a timestamp.
    pub fn apply_assigned_timestamps(
        &mut self,
        sent: &[WireField],
        assigned: &BTreeMap<FieldKey, Millis>,
    ) -> Vec<FieldKey> {
        let mut adopted = Vec::new();

        for field in sent {
            let Some(&ms) = assigned.get(&field.key) else {
                continue;
            };
            let Ok(sent_value) = FieldValue::from_json(&field.key, field.field_type, &field.value)
            else {
                continue;
            };
            if self.adopt_assigned(&field.key, &sent_value, ms) {
                adopted.push(field.key.clone());
            }
        }

        adopted
    }

    /// Adopt a peer-assigned timestamp for one field if Self still holds
    /// `sent`.
    pub fn adopt_assigned(&mut self, key: &str, sent: &FieldValue, ms: Millis) -> bool {
        match self.cells.get_mut(key) {
            Some(cell) => cell.adopt_assigned_timestamp(sent, Timestamp::from_wire(ms)),
            None => false,
        }
    }

    /// Clone every cell for a snapshot.
    pub fn export_cells(&self) -> BTreeMap<FieldKey, FieldCell> {
        self.cells.clone()
    }

    /// Replace every cell from a snapshot.
    ///
    /// Each imported cell must match a schema field's type and the store's
    /// topology; nothing is replaced unless all of them do.
    pub fn import_cells(&mut self, cells: BTreeMap<FieldKey, FieldCell>) -> Result<()> {
        for def in &self.schema.fields {
            let cell = cells.get(&def.key).ok_or_else(|| {
                Error::InvalidSnapshot(format!("missing field: {}", def.key))
            })?;
            if cell.field_type() != def.field_type {
                return Err(Error::TypeMismatch {
                    field: def.key.clone(),
                    expected: def.field_type.to_string(),
                    got: cell.field_type().to_string(),
                });
            }
            if cell.topology() != self.topology {
                return Err(Error::InvalidSnapshot(format!(
                    "topology mismatch for field: {}",
                    def.key
                )));
            }
        }

        if let Some(extra) = cells.keys().find(|k| self.schema.get(k).is_none()) {
            return Err(Error::UnknownField(extra.clone()));
        }

        self.cells = cells;
        Ok(())
    }
}
