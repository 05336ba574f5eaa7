//! Per-field sync cells.
//!
//! A cell holds an actor's own copy of a field (Self) plus the last versions
//! received from the cloud API and from the LAN-local path. Remote slots are
//! written only when fresh data arrives; `merge` folds them into Self.

use crate::{
    merge::{merge_two_source, MergeRule, Winner},
    SyncValue, Timestamp, VersionedValue,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many sources a cell reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Self against one remote chosen per merge (mobile app)
    TwoSource,
    /// API, Local and Self together (device)
    ThreeSource,
}

/// A remote source slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSource {
    /// Cloud service
    Api,
    /// LAN peer (device webserver or app on the same network)
    Local,
}

impl fmt::Display for RemoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteSource::Api => write!(f, "api"),
            RemoteSource::Local => write!(f, "local"),
        }
    }
}

/// One pairwise merge performed inside a cell merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStep {
    pub source: RemoteSource,
    pub rule: MergeRule,
}

/// Result of merging a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMerge {
    /// Whether Self's value changed
    pub changed: bool,
    /// Pairwise merges in evaluation order
    pub steps: Vec<MergeStep>,
}

/// Sync state for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCell<T> {
    topology: Topology,
    #[serde(rename = "self")]
    own: VersionedValue<T>,
    api: VersionedValue<T>,
    local: VersionedValue<T>,
}

impl<T: SyncValue> SyncCell<T> {
    /// Create a cell where every slot holds `default` and nothing is set.
    pub fn new(topology: Topology, default: T) -> Self {
        Self {
            topology,
            own: VersionedValue::unset(default.clone()),
            api: VersionedValue::unset(default.clone()),
            local: VersionedValue::unset(default),
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// The actor's current value.
    pub fn value(&self) -> &T {
        &self.own.value
    }

    /// The actor's current value with its timestamp.
    pub fn current(&self) -> &VersionedValue<T> {
        &self.own
    }

    /// The last version received from `source`.
    pub fn slot(&self, source: RemoteSource) -> &VersionedValue<T> {
        match source {
            RemoteSource::Api => &self.api,
            RemoteSource::Local => &self.local,
        }
    }

    pub fn update_from_api(&mut self, incoming: VersionedValue<T>) {
        self.api = incoming;
    }

    pub fn update_from_local(&mut self, incoming: VersionedValue<T>) {
        self.local = incoming;
    }

    pub fn update_from(&mut self, source: RemoteSource, incoming: VersionedValue<T>) {
        match source {
            RemoteSource::Api => self.update_from_api(incoming),
            RemoteSource::Local => self.update_from_local(incoming),
        }
    }

    /// Overwrite Self, as a local mutation does.
    pub fn update_self(&mut self, value: VersionedValue<T>) {
        self.own = value;
    }

    /// Merge according to the cell's topology.
    ///
    /// A two-source cell merges Self with the slot selected by `mode`. A
    /// three-source cell folds in both remotes and ignores `mode`.
    pub fn merge(&mut self, mode: RemoteSource) -> CellMerge {
        match self.topology {
            Topology::TwoSource => self.merge_from(mode),
            Topology::ThreeSource => self.merge_three_way(),
        }
    }

    /// Merge one remote slot into Self. The remote slot is left as received.
    pub fn merge_from(&mut self, source: RemoteSource) -> CellMerge {
        let outcome = merge_two_source(self.slot(source), &self.own);
        if outcome.changed {
            self.own = outcome.result;
        }

        CellMerge {
            changed: outcome.changed,
            steps: vec![MergeStep {
                source,
                rule: outcome.rule,
            }],
        }
    }

    /// API into Self, then Local into the intermediate result. Local goes
    /// last so it wins dual-priority conflicts and exact timestamp ties with
    /// the API version. Every slot ends up holding the final version.
    pub fn merge_three_way(&mut self) -> CellMerge {
        let first = merge_two_source(&self.api, &self.own);
        let mut second = merge_two_source(&self.local, &first.result);

        let api_took_over = first.rule.winner() == Winner::Incoming;
        if api_took_over
            && second.rule == MergeRule::CurrentNewerOrTied
            && self.local.timestamp.is_set()
            && self.local.timestamp == first.result.timestamp
        {
            second.result = self.local.clone();
            second.rule = MergeRule::LocalTieBreak;
        }

        let changed = !second.result.value.same_value(&self.own.value);
        let resolved = second.result;

        self.api = resolved.clone();
        self.local = resolved.clone();
        self.own = resolved;

        CellMerge {
            changed,
            steps: vec![
                MergeStep {
                    source: RemoteSource::Api,
                    rule: first.rule,
                },
                MergeStep {
                    source: RemoteSource::Local,
                    rule: second.rule,
                },
            ],
        }
    }

    /// Adopt a timestamp assigned by a peer that accepted `sent`.
    ///
    /// Ignored when Self has moved on to a different value since the push.
    pub fn adopt_assigned_timestamp(&mut self, sent: &T, assigned: Timestamp) -> bool {
        if !self.own.value.same_value(sent) {
            return false;
        }
        self.own.timestamp = assigned;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cell_is_unset() {
        let cell = SyncCell::new(Topology::ThreeSource, 85.0);
        assert_eq!(*cell.value(), 85.0);
        assert_eq!(cell.current().timestamp, Timestamp::Unset);
        assert_eq!(cell.slot(RemoteSource::Api).timestamp, Timestamp::Unset);
    }

    #[test]
    fn two_source_merge_leaves_remote_slot() {
        let mut cell = SyncCell::new(Topology::TwoSource, 85.0);
        cell.update_from_api(VersionedValue::at(90.0, 2000));
        cell.update_self(VersionedValue::at(85.0, 1000));

        let merge = cell.merge(RemoteSource::Api);
        assert!(merge.changed);
        assert_eq!(cell.current(), &VersionedValue::at(90.0, 2000));
        assert_eq!(cell.slot(RemoteSource::Api), &VersionedValue::at(90.0, 2000));
        assert_eq!(cell.slot(RemoteSource::Local).timestamp, Timestamp::Unset);
    }

    #[test]
    fn two_source_merge_uses_selected_slot_only() {
        let mut cell = SyncCell::new(Topology::TwoSource, false);
        cell.update_self(VersionedValue::at(false, 1000));
        cell.update_from_local(VersionedValue::at(true, 5000));

        let merge = cell.merge(RemoteSource::Api);
        assert!(!merge.changed);
        assert!(!*cell.value());

        let merge = cell.merge(RemoteSource::Local);
        assert!(merge.changed);
        assert!(*cell.value());
    }

    #[test]
    fn three_way_converges_all_slots() {
        let mut cell = SyncCell::new(Topology::ThreeSource, 20.0);
        cell.update_self(VersionedValue::at(20.0, 1000));
        cell.update_from_api(VersionedValue::at(25.0, 3000));
        cell.update_from_local(VersionedValue::at(30.0, 2000));

        let merge = cell.merge(RemoteSource::Api);
        assert!(merge.changed);
        assert_eq!(merge.steps.len(), 2);
        assert_eq!(merge.steps[0].rule, MergeRule::IncomingNewer);
        assert_eq!(merge.steps[1].rule, MergeRule::CurrentNewerOrTied);

        let expected = VersionedValue::at(25.0, 3000);
        assert_eq!(cell.current(), &expected);
        assert_eq!(cell.slot(RemoteSource::Api), &expected);
        assert_eq!(cell.slot(RemoteSource::Local), &expected);
    }

    #[test]
    fn three_way_api_and_local_conflicts() {
        let mut cell = SyncCell::new(Topology::ThreeSource, "Cylindrical".to_string());
        cell.update_self(VersionedValue::at("Cylindrical".to_string(), 1000));
        cell.update_from_api(VersionedValue::at("Rectangular".to_string(), 4000));
        cell.update_from_local(VersionedValue::at("Spherical".to_string(), 4000));

        // Exact tie between API and Local: Local is evaluated second and wins.
        let merge = cell.merge_three_way();
        assert_eq!(cell.value(), "Spherical");
        assert_eq!(merge.steps[1].rule, MergeRule::LocalTieBreak);

        // Local older than API: API stands.
        cell.update_from_api(VersionedValue::at("Rectangular".to_string(), 6000));
        cell.update_from_local(VersionedValue::at("Conical".to_string(), 5000));
        cell.merge_three_way();
        assert_eq!(cell.value(), "Rectangular");

        // Dual priority resolves the same way.
        cell.update_from_api(VersionedValue::priority("Rectangular".to_string()));
        cell.update_from_local(VersionedValue::priority("Spherical".to_string()));
        cell.merge_three_way();
        assert_eq!(cell.value(), "Spherical");
    }

    #[test]
    fn three_way_is_idempotent() {
        let mut cell = SyncCell::new(Topology::ThreeSource, 1.0);
        cell.update_from_api(VersionedValue::at(2.0, 10));
        cell.update_from_local(VersionedValue::at(3.0, 20));

        assert!(cell.merge_three_way().changed);
        let again = cell.merge_three_way();
        assert!(!again.changed);
        assert_eq!(cell.current(), &VersionedValue::at(3.0, 20));
    }

    #[test]
    fn adopt_assigned_timestamp_requires_same_value() {
        let mut cell = SyncCell::new(Topology::ThreeSource, 85.0);
        cell.update_self(VersionedValue::priority(85.0));

        assert!(!cell.adopt_assigned_timestamp(&70.0, Timestamp::At(10)));
        assert_eq!(cell.current().timestamp, Timestamp::Priority);

        assert!(cell.adopt_assigned_timestamp(&85.0, Timestamp::At(1737123999999)));
        assert_eq!(cell.current(), &VersionedValue::at(85.0, 1737123999999));
    }

    #[test]
    fn serialization_uses_self_key() {
        let cell = SyncCell::new(Topology::TwoSource, true);
        let json = serde_json::to_value(&cell).unwrap();
        assert!(json.get("self").is_some());
        assert_eq!(json["topology"], "two-source");
    }
}
