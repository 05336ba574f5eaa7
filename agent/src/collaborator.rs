//! Collaborator traits: everything the sync manager talks to.
//!
//! Implementations own the transport (HTTP to the cloud, the device's LAN
//! webserver, flash storage). The manager only trusts what they return.

use crate::error::Result;
use async_trait::async_trait;
use fieldsync_engine::{ActorSnapshot, FieldKey, Millis, PendingChange, SendOutcome, WireField};
use std::collections::BTreeMap;

/// The peer holding the remote copy of the configuration.
#[async_trait]
pub trait ConfigRemote: Send + Sync {
    /// Fetch every field with the peer's timestamps.
    async fn fetch_remote_config(&self) -> Result<Vec<WireField>>;

    /// Push every field with the priority flag. The peer answers with the
    /// timestamp it assigned to each field it stored.
    async fn send_remote_config_priority(
        &self,
        payload: &[WireField],
    ) -> Result<BTreeMap<FieldKey, Millis>>;

    /// Deliver one queued change.
    async fn send_change(&self, change: &PendingChange) -> Result<SendOutcome>;
}

/// A trusted wall-clock source.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    async fn fetch_remote_time(&self) -> Result<Millis>;
}

/// Persistent storage for an actor's sync state.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &ActorSnapshot) -> Result<()>;

    async fn load(&self) -> Result<Option<ActorSnapshot>>;
}
