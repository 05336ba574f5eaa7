//! Fieldsync Agent - connection sync manager for field configuration.
//!
//! Wraps a [`fieldsync_engine::Replica`] with the I/O side of
//! synchronization: clock sync against a trusted source, fetching or pushing
//! the remote configuration on reconnect, and replaying changes queued while
//! offline. Every peer is reached through a collaborator trait so actors can
//! be wired to HTTP clients, a LAN webserver or the in-memory doubles in
//! [`memory`].
//!
//! # Quick Start
//!
//! ```no_run
//! use fieldsync_agent::{AgentConfig, MemoryRemote, MemoryTimeSource, SimClock, Synchronizer};
//! use fieldsync_engine::{FieldSchema, FieldValue, SystemUptime};
//! use std::sync::Arc;
//!
//! # async fn run() -> fieldsync_agent::Result<()> {
//! let clock = SimClock::new(1737123456789);
//! let cloud = Arc::new(MemoryRemote::new("cloud", clock.clone()));
//! let time = Arc::new(MemoryTimeSource::new(clock));
//!
//! let device = Synchronizer::new(
//!     AgentConfig::default(),
//!     FieldSchema::tank_controller(),
//!     SystemUptime::new(),
//!     cloud,
//!     time,
//! )?;
//!
//! device.record_local_edit("upperThreshold", FieldValue::Number(90.0)).await?;
//! device.on_device_online().await?;
//! # Ok(())
//! # }
//! ```

pub mod collaborator;
pub mod config;
pub mod error;
pub mod manager;
pub mod memory;

pub use collaborator::{ConfigRemote, SnapshotStore, TimeSource};
pub use config::{AgentConfig, ConfigError};
pub use error::{Result, SyncError};
pub use manager::{ConfigPhase, ConnectionState, SyncReport, SyncStatus, Synchronizer};
pub use memory::{MemoryRemote, MemorySnapshotStore, MemoryTimeSource, SimClock};
