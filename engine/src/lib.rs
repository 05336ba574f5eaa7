//! # Fieldsync Engine
//!
//! A deterministic field-synchronization engine for a fleet of small actors:
//! a cloud service, embedded devices and a companion app, each holding its
//! own copy of a shared set of configuration fields.
//!
//! This crate holds the pure logic: conflict resolution, per-field sync
//! cells, the wall-clock authority, the offline change queue and snapshots.
//! The same inputs always produce the same outputs.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Testable**: Pure logic, no mocks needed
//! - **Portable**: Runs anywhere Rust runs (native, mobile, embedded)
//!
//! ## Core Concepts
//!
//! ### Timestamps
//!
//! A [`Timestamp`] is `Unset`, `Priority` or a concrete time in
//! milliseconds. On the wire `0` encodes `Priority`; `Unset` never leaves
//! the engine.
//!
//! ### Merging
//!
//! [`merge_two_source`] decides between an incoming and a current version
//! by value identity, then priority, then last-write-wins.
//!
//! ### Sync Cells
//!
//! A [`SyncCell`] keeps Self plus the last API and Local versions of one
//! field. Two-source cells (app) merge against one remote at a time;
//! three-source cells (device) fold API then Local into Self.
//!
//! ### Time
//!
//! [`TimeAuthority`] turns a wrapping 32-bit uptime counter into wall-clock
//! time after a sync with a trusted source.
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldsync_engine::{
//!     parse_batch, FieldSchema, FieldValue, RemoteSource, Replica, Timestamp, Topology,
//! };
//!
//! // 1. Create a device replica with the tank controller fields
//! let mut device = Replica::new(FieldSchema::tank_controller(), Topology::ThreeSource).unwrap();
//!
//! // 2. Edit offline: no clock yet, so the edit carries the priority flag
//! device
//!     .record_local_edit("upperThreshold", FieldValue::Number(80.0), Timestamp::Unset)
//!     .unwrap();
//! assert!(device.needs_config_upload());
//!
//! // 3. Merge a batch fetched from the cloud
//! let batch = parse_batch(
//!     r#"[{"key": "tankHeight", "type": "number", "value": 120, "lastModified": 1737123456789}]"#,
//! )
//! .unwrap();
//! let report = device.ingest(RemoteSource::Api, &batch, Timestamp::Unset, RemoteSource::Api);
//! assert_eq!(report.merge.changed, vec!["tankHeight"]);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module provides C-compatible functions for the companion app.
//! All data is exchanged as JSON strings.
//!
//! ## Persistence
//!
//! Use [`Replica::snapshot`] and [`Replica::restore`] with [`ActorSnapshot`]
//! for persistence. Snapshots are serializable to JSON with deterministic ordering.

pub mod cell;
pub mod clock;
pub mod error;
pub mod ffi;
pub mod merge;
pub mod queue;
pub mod replica;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod timestamp;
pub mod value;
pub mod wire;

// Re-export main types at crate root
pub use cell::{CellMerge, MergeStep, RemoteSource, SyncCell, Topology};
pub use clock::{
    ClockState, Correction, DriftPolicy, ManualCounter, MonotonicSource, SystemUptime,
    TimeAuthority, U32_COUNTER_PERIOD,
};
pub use error::Error;
pub use merge::{merge_two_source, MergeOutcome, MergeRule, Winner};
pub use queue::{ChangeQueue, PendingChange, ReplayReport, SendOutcome, Settlement};
pub use replica::{LocalEdit, PriorityPush, PushCompletion, Replica};
pub use schema::{FieldDef, FieldSchema};
pub use snapshot::{ActorSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{FieldCell, FieldStore, IngestReport, MergeSummary, PayloadStamp};
pub use timestamp::{Timestamp, PRIORITY_WIRE};
pub use value::{FieldType, FieldValue, SyncValue, VersionedValue, FLOAT_TOLERANCE};
pub use wire::{parse_batch, SkippedField, WireBatch, WireField};

/// Type aliases for clarity
pub type FieldKey = String;
pub type Millis = u64;
pub type SchemaVersion = u32;
