//! Connection sync manager.
//!
//! Drives one actor through `Offline -> Syncing -> Online` on connectivity
//! changes. A cycle syncs the clock, then either fetches and merges the
//! remote configuration or, when local edits are pending, pushes them with
//! the priority flag. Queued changes are replayed last.
//!
//! Replica and clock sit behind async mutexes that are never held across a
//! collaborator call. Collaborator results are applied in one locked step,
//! so a failed cycle leaves the in-memory state untouched.

use crate::collaborator::{ConfigRemote, SnapshotStore, TimeSource};
use crate::config::AgentConfig;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use fieldsync_engine::{
    Correction, FieldKey, FieldSchema, FieldValue, IngestReport, LocalEdit, Millis,
    MonotonicSource, PendingChange, PushCompletion, RemoteSource, ReplayReport, Replica,
    SendOutcome, Settlement, SystemUptime, TimeAuthority, Timestamp, VersionedValue, WireBatch,
    WireField,
};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Connectivity state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Offline,
    Syncing,
    Online,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Offline => write!(f, "offline"),
            ConnectionState::Syncing => write!(f, "syncing"),
            ConnectionState::Online => write!(f, "online"),
        }
    }
}

/// Which branch a sync cycle took.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "branch", rename_all = "camelCase")]
pub enum ConfigPhase {
    /// Remote configuration fetched and merged
    Fetched { ingest: IngestReport },
    /// Local configuration pushed with the priority flag
    Pushed {
        completion: PushCompletion,
        /// Merge of the post-push fetch; `None` if that fetch failed
        refetch: Option<IngestReport>,
    },
}

/// Outcome of a successful sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Wall-clock time the cycle synced to
    pub synced_at: Millis,
    pub config: ConfigPhase,
    pub replay: ReplayReport,
}

/// Diagnostics snapshot of an actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub actor: String,
    pub state: ConnectionState,
    pub time_synced: bool,
    pub now: Timestamp,
    pub config_sync_status: bool,
    pub pending_changes: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Link {
    state: ConnectionState,
    last_sync: Option<Millis>,
}

/// Sync manager for one actor.
pub struct Synchronizer<M = SystemUptime> {
    config: AgentConfig,
    remote: Arc<dyn ConfigRemote>,
    time: Arc<dyn TimeSource>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    clock: Mutex<TimeAuthority<M>>,
    replica: Mutex<Replica>,
    link: Mutex<Link>,
    /// Serializes sync cycles
    cycle: Mutex<()>,
}

impl<M: MonotonicSource> Synchronizer<M> {
    /// Create a manager with default field values.
    pub fn new(
        config: AgentConfig,
        schema: FieldSchema,
        counter: M,
        remote: Arc<dyn ConfigRemote>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let replica = Replica::new(schema, config.topology)?;
        Ok(Self::from_replica(config, replica, counter, remote, time))
    }

    /// Create a manager around an existing replica.
    pub fn from_replica(
        config: AgentConfig,
        replica: Replica,
        counter: M,
        remote: Arc<dyn ConfigRemote>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            config,
            remote,
            time,
            snapshots: None,
            clock: Mutex::new(TimeAuthority::new(counter)),
            replica: Mutex::new(replica),
            link: Mutex::new(Link {
                state: ConnectionState::Offline,
                last_sync: None,
            }),
            cycle: Mutex::new(()),
        }
    }

    /// Restore from `snapshots`, or start fresh if nothing was saved.
    ///
    /// The restored actor's clock is unsynced until the next cycle.
    pub async fn restore(
        config: AgentConfig,
        schema: FieldSchema,
        counter: M,
        remote: Arc<dyn ConfigRemote>,
        time: Arc<dyn TimeSource>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        let replica = match snapshots.load().await? {
            Some(snapshot) => {
                if snapshot.topology != config.topology {
                    return Err(SyncError::Storage(format!(
                        "snapshot topology {:?} does not match configured {:?}",
                        snapshot.topology, config.topology
                    )));
                }
                tracing::info!(
                    actor = %config.actor,
                    fields = snapshot.field_count(),
                    pending = snapshot.pending.len(),
                    "Restored actor snapshot"
                );
                Replica::restore(schema, snapshot)?
            }
            None => Replica::new(schema, config.topology)?,
        };

        Ok(Self::from_replica(config, replica, counter, remote, time).with_snapshot_store(snapshots))
    }

    /// Persist state after every cycle and local edit.
    pub fn with_snapshot_store(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Run a full sync cycle.
    ///
    /// On failure the actor is back `Offline` with its configuration
    /// untouched and the error is returned; the next transition retries.
    pub async fn on_device_online(&self) -> Result<SyncReport> {
        let _cycle = self.cycle.lock().await;
        self.set_state(ConnectionState::Syncing).await;
        tracing::info!(actor = %self.config.actor, "Sync cycle started");

        match self.run_cycle().await {
            Ok(report) => {
                {
                    let mut link = self.link.lock().await;
                    link.state = ConnectionState::Online;
                    link.last_sync = Some(report.synced_at);
                }
                self.persist().await;
                tracing::info!(
                    actor = %self.config.actor,
                    delivered = report.replay.delivered.len(),
                    retained = report.replay.retained.len(),
                    "Sync cycle complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(ConnectionState::Offline).await;
                tracing::warn!(actor = %self.config.actor, error = %e, "Sync cycle failed, staying offline");
                Err(e)
            }
        }
    }

    /// Drop to `Offline`. No collaborator is called.
    pub async fn on_device_offline(&self) {
        self.set_state(ConnectionState::Offline).await;
        tracing::info!(actor = %self.config.actor, "Device offline");
    }

    async fn run_cycle(&self) -> Result<SyncReport> {
        let synced_at = self.sync_time().await?;

        let needs_upload = self.replica.lock().await.needs_config_upload();
        let config = if needs_upload {
            self.push_config().await?
        } else {
            let fields = self.call(self.remote.fetch_remote_config()).await?;
            ConfigPhase::Fetched {
                ingest: self.merge_remote(self.config.remote, fields).await,
            }
        };

        let replay = self.replay_queue().await;

        Ok(SyncReport {
            synced_at,
            config,
            replay,
        })
    }

    async fn sync_time(&self) -> Result<Millis> {
        let wall_ms = self.call(self.time.fetch_remote_time()).await?;
        self.clock.lock().await.sync(wall_ms);
        tracing::debug!(actor = %self.config.actor, wall_ms, "Clock synced");
        Ok(wall_ms)
    }

    async fn push_config(&self) -> Result<ConfigPhase> {
        let push = self.replica.lock().await.priority_payload()?;
        tracing::info!(
            actor = %self.config.actor,
            fields = push.fields.len(),
            "Pushing local configuration with priority"
        );

        let assigned = self
            .call(self.remote.send_remote_config_priority(&push.fields))
            .await?;
        let completion = self
            .replica
            .lock()
            .await
            .complete_priority_push(&push, &assigned);

        if !completion.synced {
            tracing::info!(
                actor = %self.config.actor,
                "Local edit landed during push, upload stays pending"
            );
        }

        let refetch = match self.call(self.remote.fetch_remote_config()).await {
            Ok(fields) => Some(self.merge_remote(self.config.remote, fields).await),
            Err(e) => {
                tracing::warn!(
                    actor = %self.config.actor,
                    error = %e,
                    "Post-push fetch failed, remote state merges next cycle"
                );
                None
            }
        };

        Ok(ConfigPhase::Pushed {
            completion,
            refetch,
        })
    }

    async fn replay_queue(&self) -> ReplayReport {
        let entries = self.replica.lock().await.queue().entries();
        if entries.is_empty() {
            return ReplayReport::default();
        }

        tracing::debug!(actor = %self.config.actor, pending = entries.len(), "Replaying change queue");

        let results = join_all(
            entries
                .iter()
                .map(|change| self.call(self.remote.send_change(change))),
        )
        .await;

        let mut report = ReplayReport::default();
        let mut replica = self.replica.lock().await;
        let mut stale_remote = false;

        for (change, result) in entries.into_iter().zip(results) {
            let outcome = match result {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::warn!(key = %change.key, error = %e, "Change not delivered, kept in queue");
                    None
                }
            };

            let settlement = replica.queue_mut().settle(&change, outcome.clone());
            match (&settlement, outcome) {
                (Settlement::Delivered { assigned: Some(ms) }, _) => {
                    replica.store_mut().adopt_assigned(&change.key, &change.value, *ms);
                }
                (Settlement::StaleRejected { authoritative }, Some(SendOutcome::Rejected { remote })) => {
                    tracing::debug!(key = %change.key, authoritative = %authoritative, "Remote holds newer value, change dropped");
                    if let Err(e) = replica
                        .store_mut()
                        .update_from(self.config.remote, &change.key, remote)
                    {
                        tracing::warn!(key = %change.key, error = %e, "Rejected change carried an unusable value");
                    }
                    stale_remote = true;
                }
                _ => {}
            }
            report.record(change.key, &settlement);
        }

        if stale_remote {
            let summary = replica.store_mut().merge_all(self.config.remote);
            log_changed(&self.config.actor, &summary.changed);
        }

        report
    }

    /// Write fetched fields into `source` and merge, in one locked step.
    async fn merge_remote(&self, source: RemoteSource, fields: Vec<WireField>) -> IngestReport {
        let batch = WireBatch::from(fields);
        let mut clock = self.clock.lock().await;
        let mut replica = self.replica.lock().await;

        let fill = clock.current_timestamp();
        let report = replica.ingest(source, &batch, fill, source);
        log_ingest(&self.config.actor, &report);
        report
    }

    /// Bound a collaborator call by the control timeout.
    async fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.config.control_timeout;
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(limit.as_millis() as u64)),
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        let mut link = self.link.lock().await;
        if link.state != state {
            tracing::debug!(actor = %self.config.actor, from = %link.state, to = %state, "State transition");
            link.state = state;
        }
    }

    async fn persist(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let snapshot = self.replica.lock().await.snapshot();
        if let Err(e) = snapshots.save(&snapshot).await {
            tracing::warn!(actor = %self.config.actor, error = %e, "Failed to persist snapshot");
        }
    }

    // ========================================================================
    // Local Mutations
    // ========================================================================

    /// Apply a local edit and queue it for delivery.
    pub async fn record_local_edit(&self, key: &str, value: FieldValue) -> Result<LocalEdit> {
        let edit = {
            let mut clock = self.clock.lock().await;
            let mut replica = self.replica.lock().await;
            let now = clock.current_timestamp();
            replica.record_local_edit(key, value, now)?
        };

        tracing::info!(
            actor = %self.config.actor,
            key = %edit.key,
            value = %edit.stored.value,
            timestamp = %edit.stored.timestamp,
            "Local edit"
        );

        self.persist().await;
        Ok(edit)
    }

    /// Flag that the local configuration must be uploaded.
    pub async fn mark_config_modified(&self) {
        self.replica.lock().await.mark_config_modified();
    }

    /// Merge configuration a peer pushed to this actor, such as the app
    /// posting to the device's LAN webserver.
    pub async fn receive_remote_config(
        &self,
        source: RemoteSource,
        fields: Vec<WireField>,
    ) -> IngestReport {
        let report = self.merge_remote(source, fields).await;
        self.persist().await;
        report
    }

    // ========================================================================
    // Time
    // ========================================================================

    pub async fn current_timestamp(&self) -> Timestamp {
        self.clock.lock().await.current_timestamp()
    }

    /// Correct the clock from a trusted reading if it drifted past the
    /// configured threshold.
    pub async fn correct_time(&self, trusted_ms: Millis) -> Correction {
        let correction = self
            .clock
            .lock()
            .await
            .apply_correction(trusted_ms, self.config.drift_policy);

        if correction.applied {
            tracing::info!(actor = %self.config.actor, drift_ms = ?correction.drift_ms, "Clock corrected");
        } else {
            tracing::debug!(actor = %self.config.actor, drift_ms = ?correction.drift_ms, "Clock within drift threshold");
        }

        correction
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn state(&self) -> ConnectionState {
        self.link.lock().await.state
    }

    pub async fn is_online(&self) -> bool {
        self.state().await == ConnectionState::Online
    }

    pub async fn is_time_synced(&self) -> bool {
        self.clock.lock().await.is_synced()
    }

    pub async fn needs_config_upload(&self) -> bool {
        self.replica.lock().await.needs_config_upload()
    }

    pub async fn config_sync_status(&self) -> bool {
        self.replica.lock().await.config_sync_status()
    }

    /// Self value of one field.
    pub async fn field(&self, key: &str) -> Option<VersionedValue<FieldValue>> {
        self.replica.lock().await.store().current(key)
    }

    /// Self values of every field.
    pub async fn values(&self) -> BTreeMap<FieldKey, FieldValue> {
        self.replica.lock().await.store().values()
    }

    pub async fn pending_changes(&self) -> Vec<PendingChange> {
        self.replica.lock().await.queue().entries()
    }

    /// Version held in a remote slot.
    pub async fn slot(&self, source: RemoteSource, key: &str) -> Option<VersionedValue<FieldValue>> {
        self.replica
            .lock()
            .await
            .store()
            .get(key)
            .map(|cell| cell.slot(source))
    }

    pub async fn status(&self) -> SyncStatus {
        let (state, last_sync) = {
            let link = self.link.lock().await;
            (link.state, link.last_sync)
        };
        let (time_synced, now) = {
            let mut clock = self.clock.lock().await;
            (clock.is_synced(), clock.current_timestamp())
        };
        let (config_sync_status, pending_changes) = {
            let replica = self.replica.lock().await;
            (replica.config_sync_status(), replica.queue().len())
        };

        SyncStatus {
            actor: self.config.actor.clone(),
            state,
            time_synced,
            now,
            config_sync_status,
            pending_changes,
            last_sync: last_sync.and_then(|ms| DateTime::from_timestamp_millis(ms as i64)),
        }
    }
}

fn log_ingest(actor: &str, report: &IngestReport) {
    for skipped in &report.skipped {
        tracing::warn!(
            actor = %actor,
            key = ?skipped.key,
            error = %skipped.error,
            "Skipped inbound field"
        );
    }
    for (key, merge) in &report.merge.merges {
        for step in &merge.steps {
            tracing::trace!(actor = %actor, key = %key, source = %step.source, rule = ?step.rule, "Merge step");
        }
    }
    log_changed(actor, &report.merge.changed);
}

fn log_changed(actor: &str, changed: &[FieldKey]) {
    if !changed.is_empty() {
        tracing::info!(actor = %actor, changed = ?changed, "Configuration updated from remote");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRemote, MemorySnapshotStore, MemoryTimeSource, SimClock};
    use fieldsync_engine::{FieldType, ManualCounter, Topology};
    use serde_json::json;

    struct Harness {
        clock: SimClock,
        remote: Arc<MemoryRemote>,
        time: Arc<MemoryTimeSource>,
        counter: ManualCounter,
        sync: Synchronizer<ManualCounter>,
    }

    fn harness() -> Harness {
        let clock = SimClock::new(1_000_000);
        let remote = Arc::new(MemoryRemote::new("cloud", clock.clone()));
        let time = Arc::new(MemoryTimeSource::new(clock.clone()));
        let counter = ManualCounter::new(0);
        let sync = Synchronizer::new(
            AgentConfig::default(),
            FieldSchema::tank_controller(),
            counter.clone(),
            remote.clone(),
            time.clone(),
        )
        .unwrap();

        Harness {
            clock,
            remote,
            time,
            counter,
            sync,
        }
    }

    fn number(key: &str, value: f64, ms: Millis) -> WireField {
        WireField {
            key: key.into(),
            label: String::new(),
            field_type: FieldType::Number,
            value: json!(value),
            last_modified: Some(ms),
        }
    }

    #[tokio::test]
    async fn fresh_actor_fetches() {
        let h = harness();
        h.remote.set_field(number("tankHeight", 120.0, 900_000));

        let report = h.sync.on_device_online().await.unwrap();

        assert!(matches!(report.config, ConfigPhase::Fetched { .. }));
        assert_eq!(report.synced_at, 1_000_000);
        assert_eq!(h.remote.push_count(), 0);
        assert_eq!(
            h.sync.field("tankHeight").await,
            Some(VersionedValue::at(FieldValue::Number(120.0), 900_000))
        );
        assert!(h.sync.is_online().await);
    }

    #[tokio::test]
    async fn modified_actor_pushes_with_priority() {
        let h = harness();
        h.sync
            .record_local_edit("tankWidth", FieldValue::Number(70.0))
            .await
            .unwrap();
        assert!(h.sync.needs_config_upload().await);

        h.clock.set(2_000_000);
        let report = h.sync.on_device_online().await.unwrap();

        match report.config {
            ConfigPhase::Pushed { completion, refetch } => {
                assert!(completion.synced);
                assert_eq!(completion.acknowledged, 1);
                assert!(refetch.is_some());
            }
            other => panic!("expected push, got {:?}", other),
        }
        assert_eq!(h.remote.push_count(), 1);
        assert!(!h.sync.needs_config_upload().await);
        assert!(h.sync.pending_changes().await.is_empty());
        assert_eq!(
            h.sync.field("tankWidth").await,
            Some(VersionedValue::at(FieldValue::Number(70.0), 2_000_000))
        );
    }

    #[tokio::test]
    async fn time_failure_stays_offline() {
        let h = harness();
        h.time.set_reachable(false);

        let err = h.sync.on_device_online().await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(h.sync.state().await, ConnectionState::Offline);
        assert!(!h.sync.is_time_synced().await);
        assert_eq!(h.remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn correction_respects_threshold() {
        let h = harness();
        h.sync.on_device_online().await.unwrap();

        h.counter.advance(1_000);
        let small = h.sync.correct_time(1_001_000 + 2_000).await;
        assert!(!small.applied);

        let large = h.sync.correct_time(1_001_000 + 60_000).await;
        assert!(large.applied);
        assert_eq!(
            h.sync.current_timestamp().await,
            Timestamp::At(1_061_000)
        );
    }

    #[tokio::test]
    async fn receive_from_local_peer() {
        let h = harness();
        h.sync.on_device_online().await.unwrap();

        let report = h
            .sync
            .receive_remote_config(RemoteSource::Local, vec![number("lowerThreshold", 15.0, 1_200_000)])
            .await;

        assert_eq!(report.applied, vec!["lowerThreshold".to_string()]);
        assert_eq!(
            h.sync.slot(RemoteSource::Local, "lowerThreshold").await,
            Some(VersionedValue::at(FieldValue::Number(15.0), 1_200_000))
        );
        assert_eq!(
            h.sync.values().await.get("lowerThreshold"),
            Some(&FieldValue::Number(15.0))
        );
    }

    #[tokio::test]
    async fn snapshot_persisted_and_restored() {
        let h = harness();
        let store = Arc::new(MemorySnapshotStore::new());
        let sync = h.sync.with_snapshot_store(store.clone());

        sync.record_local_edit("tankShape", FieldValue::Text("Rectangular".into()))
            .await
            .unwrap();
        assert!(store.raw().is_some());

        let restored = Synchronizer::restore(
            AgentConfig::default(),
            FieldSchema::tank_controller(),
            ManualCounter::new(0),
            h.remote.clone(),
            h.time.clone(),
            store.clone(),
        )
        .await
        .unwrap();

        assert_eq!(
            restored.values().await.get("tankShape"),
            Some(&FieldValue::Text("Rectangular".into()))
        );
        assert!(restored.needs_config_upload().await);
        assert_eq!(restored.pending_changes().await.len(), 1);
        assert!(!restored.is_time_synced().await);

        let app = AgentConfig {
            topology: Topology::TwoSource,
            ..AgentConfig::default()
        };
        let mismatch = Synchronizer::restore(
            app,
            FieldSchema::tank_controller(),
            ManualCounter::new(0),
            h.remote.clone(),
            h.time.clone(),
            store,
        )
        .await;
        assert!(matches!(mismatch, Err(SyncError::Storage(_))));
    }
}
