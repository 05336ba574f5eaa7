//! In-memory collaborators.
//!
//! Deterministic stand-ins for the cloud API, a trusted time server and
//! flash storage. Used by the simulation binary and the tests.

use crate::collaborator::{ConfigRemote, SnapshotStore, TimeSource};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use dashmap::DashMap;
use fieldsync_engine::{
    merge_two_source, ActorSnapshot, FieldKey, FieldValue, Millis, PendingChange, SendOutcome,
    Timestamp, VersionedValue, WireField, Winner,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared simulated wall clock.
#[derive(Debug, Clone)]
pub struct SimClock(Arc<AtomicU64>);

impl SimClock {
    pub fn new(now_ms: Millis) -> Self {
        Self(Arc::new(AtomicU64::new(now_ms)))
    }

    pub fn now(&self) -> Millis {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, now_ms: Millis) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: Millis) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

/// Reachability and latency shared by the in-memory collaborators.
#[derive(Debug, Default)]
struct Link {
    unreachable: AtomicBool,
    delay_ms: AtomicU64,
}

impl Link {
    async fn traverse(&self, name: &str) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SyncError::NetworkUnreachable(name.to_string()));
        }
        Ok(())
    }
}

/// A cloud API holding one copy of every field.
///
/// Accepted writes are stamped with the simulated clock, the way the real
/// service assigns its own receive time.
#[derive(Debug)]
pub struct MemoryRemote {
    name: String,
    clock: SimClock,
    fields: DashMap<FieldKey, WireField>,
    link: Link,
    fetches: AtomicUsize,
    pushes: AtomicUsize,
    changes: AtomicUsize,
}

impl MemoryRemote {
    pub fn new(name: impl Into<String>, clock: SimClock) -> Self {
        Self {
            name: name.into(),
            clock,
            fields: DashMap::new(),
            link: Link::default(),
            fetches: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            changes: AtomicUsize::new(0),
        }
    }

    /// Seed or overwrite a field.
    pub fn set_field(&self, field: WireField) {
        self.fields.insert(field.key.clone(), field);
    }

    pub fn field(&self, key: &str) -> Option<WireField> {
        self.fields.get(key).map(|f| f.clone())
    }

    /// The stored version of a field, decoded.
    pub fn versioned(&self, key: &str) -> Option<VersionedValue<FieldValue>> {
        let field = self.field(key)?;
        decode_stored(&field)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.link.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Delay every call by `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.link
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn change_count(&self) -> usize {
        self.changes.load(Ordering::SeqCst)
    }

    fn store(&self, mut field: WireField, ms: Millis) {
        field.last_modified = Some(ms);
        self.fields.insert(field.key.clone(), field);
    }
}

fn decode_stored(field: &WireField) -> Option<VersionedValue<FieldValue>> {
    let value = FieldValue::from_json(&field.key, field.field_type, &field.value).ok()?;
    let timestamp = field
        .last_modified
        .map(Timestamp::from_wire)
        .unwrap_or(Timestamp::Unset);
    Some(VersionedValue::new(value, timestamp))
}

#[async_trait]
impl ConfigRemote for MemoryRemote {
    async fn fetch_remote_config(&self) -> Result<Vec<WireField>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.link.traverse(&self.name).await?;

        let mut fields: Vec<WireField> = self.fields.iter().map(|f| f.value().clone()).collect();
        fields.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(fields)
    }

    async fn send_remote_config_priority(
        &self,
        payload: &[WireField],
    ) -> Result<BTreeMap<FieldKey, Millis>> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.link.traverse(&self.name).await?;

        let now = self.clock.now();
        let mut assigned = BTreeMap::new();
        for field in payload {
            self.store(field.clone(), now);
            assigned.insert(field.key.clone(), now);
        }

        tracing::debug!(remote = %self.name, fields = payload.len(), assigned_at = now, "Stored priority payload");

        Ok(assigned)
    }

    async fn send_change(&self, change: &PendingChange) -> Result<SendOutcome> {
        self.changes.fetch_add(1, Ordering::SeqCst);
        self.link.traverse(&self.name).await?;

        let stored = self.field(&change.key);
        let current = stored.as_ref().and_then(decode_stored);

        if let Some(current) = current {
            let outcome = merge_two_source(&change.versioned(), &current);
            if outcome.rule.winner() == Winner::Current {
                return Ok(SendOutcome::Rejected { remote: current });
            }
        }

        let ms = change
            .timestamp
            .millis()
            .unwrap_or_else(|| self.clock.now());
        let field = WireField {
            key: change.key.clone(),
            label: stored.map(|f| f.label).unwrap_or_default(),
            field_type: change.field_type,
            value: change.value.to_json(),
            last_modified: None,
        };
        self.store(field, ms);

        Ok(SendOutcome::Accepted { assigned: Some(ms) })
    }
}

/// A trusted time server backed by a [`SimClock`].
#[derive(Debug)]
pub struct MemoryTimeSource {
    clock: SimClock,
    link: Link,
}

impl MemoryTimeSource {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            link: Link::default(),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.link.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.link
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeSource for MemoryTimeSource {
    async fn fetch_remote_time(&self) -> Result<Millis> {
        self.link.traverse("time").await?;
        Ok(self.clock.now())
    }
}

/// Snapshot storage that keeps the serialized JSON in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    json: Mutex<Option<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved snapshot as JSON.
    pub fn raw(&self) -> Option<String> {
        self.json.lock().ok().and_then(|json| json.clone())
    }

    pub fn set_raw(&self, json: impl Into<String>) {
        if let Ok(mut slot) = self.json.lock() {
            *slot = Some(json.into());
        }
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &ActorSnapshot) -> Result<()> {
        let json = snapshot.to_json()?;
        let mut slot = self
            .json
            .lock()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        *slot = Some(json);
        Ok(())
    }

    async fn load(&self) -> Result<Option<ActorSnapshot>> {
        match self.raw() {
            Some(json) => Ok(Some(ActorSnapshot::from_json(&json)?)),
            None => Ok(None),
        }
    }
}
