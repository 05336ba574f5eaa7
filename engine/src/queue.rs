//! Offline change queue.
//!
//! Local edits made while a peer is unreachable are queued per key. Only the
//! latest edit of a key is kept, and replay sends each key at most once.

use crate::{
    merge::{merge_two_source, Winner},
    FieldKey, FieldType, FieldValue, Millis, Timestamp, VersionedValue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A local edit waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub key: FieldKey,
    pub value: FieldValue,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub timestamp: Timestamp,
    /// Local time the edit was queued, if the clock was synced
    pub enqueued_at: Timestamp,
}

impl PendingChange {
    pub fn new(
        key: impl Into<FieldKey>,
        value: FieldValue,
        timestamp: Timestamp,
        enqueued_at: Timestamp,
    ) -> Self {
        Self {
            key: key.into(),
            field_type: value.field_type(),
            value,
            timestamp,
            enqueued_at,
        }
    }

    pub fn versioned(&self) -> VersionedValue<FieldValue> {
        VersionedValue::new(self.value.clone(), self.timestamp)
    }

    /// Whether this change may replace `existing` for the same key.
    ///
    /// Edits arrive in the order they were made, so a later edit replaces the
    /// queued one. Only between two timed entries does the timestamp decide:
    /// the new one must be strictly newer. A priority entry is always an edit
    /// made before the clock synced, so a timed edit replaces it.
    pub fn supersedes(&self, existing: &PendingChange) -> bool {
        match (self.timestamp, existing.timestamp) {
            (Timestamp::At(new), Timestamp::At(old)) => new > old,
            _ => true,
        }
    }
}

/// What a peer answered to a sent change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SendOutcome {
    /// The peer took the change, optionally re-stamping it
    Accepted { assigned: Option<Millis> },
    /// The peer kept its own version and reports it back
    Rejected { remote: VersionedValue<FieldValue> },
}

/// How a sent entry was settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Settlement {
    /// Accepted and removed
    Delivered { assigned: Option<Millis> },
    /// The peer holds a version that wins the merge; entry dropped
    StaleRejected { authoritative: Timestamp },
    /// Send failed or the peer's version loses; entry kept for the next replay
    Retained,
    /// A newer edit replaced the entry while it was in flight
    Superseded,
}

/// Totals of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub delivered: Vec<FieldKey>,
    pub stale: Vec<FieldKey>,
    pub retained: Vec<FieldKey>,
    pub superseded: Vec<FieldKey>,
}

impl ReplayReport {
    pub fn record(&mut self, key: FieldKey, settlement: &Settlement) {
        match settlement {
            Settlement::Delivered { .. } => self.delivered.push(key),
            Settlement::StaleRejected { .. } => self.stale.push(key),
            Settlement::Retained => self.retained.push(key),
            Settlement::Superseded => self.superseded.push(key),
        }
    }
}

/// Pending changes, at most one per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeQueue {
    entries: BTreeMap<FieldKey, PendingChange>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a change. Returns whether it was stored.
    pub fn enqueue(&mut self, change: PendingChange) -> bool {
        if let Some(existing) = self.entries.get(&change.key) {
            if !change.supersedes(existing) {
                return false;
            }
        }
        self.entries.insert(change.key.clone(), change);
        true
    }

    pub fn get(&self, key: &str) -> Option<&PendingChange> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending changes in key order.
    pub fn entries(&self) -> Vec<PendingChange> {
        self.entries.values().cloned().collect()
    }

    pub fn remove(&mut self, key: &str) -> Option<PendingChange> {
        self.entries.remove(key)
    }

    /// Remove `sent` if it is still the queued entry for its key.
    pub fn acknowledge(&mut self, sent: &PendingChange) -> bool {
        if self.entries.get(&sent.key) == Some(sent) {
            self.entries.remove(&sent.key);
            true
        } else {
            false
        }
    }

    /// Settle one sent entry. `None` means the send failed.
    pub fn settle(&mut self, sent: &PendingChange, outcome: Option<SendOutcome>) -> Settlement {
        if self.entries.get(&sent.key) != Some(sent) {
            return Settlement::Superseded;
        }

        match outcome {
            None => Settlement::Retained,
            Some(SendOutcome::Accepted { assigned }) => {
                self.entries.remove(&sent.key);
                Settlement::Delivered { assigned }
            }
            Some(SendOutcome::Rejected { remote }) => {
                let outcome = merge_two_source(&sent.versioned(), &remote);
                if outcome.rule.winner() == Winner::Current {
                    self.entries.remove(&sent.key);
                    Settlement::StaleRejected {
                        authoritative: remote.timestamp,
                    }
                } else {
                    Settlement::Retained
                }
            }
        }
    }

    /// Send every entry once and settle it.
    pub fn replay<F>(&mut self, mut send: F) -> ReplayReport
    where
        F: FnMut(&PendingChange) -> Option<SendOutcome>,
    {
        let mut report = ReplayReport::default();
        for change in self.entries() {
            let outcome = send(&change);
            let settlement = self.settle(&change, outcome);
            report.record(change.key, &settlement);
        }
        report
    }
}
