//! FFI layer for the mobile companion app.
//!
//! This module provides C-compatible functions that can be called via Dart FFI.
//! All data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `fieldsync_*` functions are allocated by Rust
//! - Caller must free them with `fieldsync_string_free`
//! - Replica pointers must be freed with `fieldsync_replica_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure
//!
//! # Enumerations
//!
//! - topology: `0` two-source, `1` three-source
//! - remote source: `0` API, `1` local
//! - payload stamp: `0` priority, `1` current timestamps

use crate::{
    error::Result, store::PayloadStamp, wire::parse_batch, ActorSnapshot, FieldKey, FieldSchema,
    FieldValue, Millis, PriorityPush, RemoteSource, Replica, Timestamp, Topology,
};
use std::collections::BTreeMap;
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// Result wrapper for FFI responses.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum FfiResult<T: serde::Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: serde::Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

impl<T: serde::Serialize> From<Result<T>> for FfiResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => FfiResult::ok(value),
            Err(e) => FfiResult::err(e.to_string()),
        }
    }
}

/// Convert a Rust string to a C string pointer.
/// Interior null bytes are dropped.
/// Caller must free with `fieldsync_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    let cs = CString::new(s).unwrap_or_else(|e| {
        let mut bytes = e.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    });
    cs.into_raw()
}

fn error_string(message: impl Into<String>) -> *mut c_char {
    to_c_string(FfiResult::<()>::err(message).to_json())
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn topology_from_i32(value: i32) -> Option<Topology> {
    match value {
        0 => Some(Topology::TwoSource),
        1 => Some(Topology::ThreeSource),
        _ => None,
    }
}

fn source_from_i32(value: i32) -> Option<RemoteSource> {
    match value {
        0 => Some(RemoteSource::Api),
        1 => Some(RemoteSource::Local),
        _ => None,
    }
}

/// `0` is the caller's "clock not synced".
fn timestamp_from_ms(ms: u64) -> Timestamp {
    if ms == 0 {
        Timestamp::Unset
    } else {
        Timestamp::At(ms)
    }
}

// ============================================================================
// Replica Lifecycle
// ============================================================================

/// Create a new replica.
///
/// # Arguments
/// - `schema_json`: JSON string of FieldSchema
/// - `topology`: `0` two-source, `1` three-source
///
/// # Returns
/// Pointer to Replica, or null on failure.
///
/// # Safety
/// - `schema_json` must be a valid null-terminated C string or null
/// - Caller must free the returned pointer with `fieldsync_replica_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_new(
    schema_json: *const c_char,
    topology: i32,
) -> *mut Replica {
    let schema_str = match from_c_string(schema_json) {
        Some(s) => s,
        None => return ptr::null_mut(),
    };

    let topology = match topology_from_i32(topology) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };

    let schema: FieldSchema = match serde_json::from_str(&schema_str) {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };

    match Replica::new(schema, topology) {
        Ok(replica) => Box::into_raw(Box::new(replica)),
        Err(_) => ptr::null_mut(),
    }
}

/// Free a replica.
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_free(replica: *mut Replica) {
    if !replica.is_null() {
        drop(Box::from_raw(replica));
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `fieldsync_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn fieldsync_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// The water-tank controller schema.
///
/// # Returns
/// JSON string: `{"ok": FieldSchema}`; free with `fieldsync_string_free`
#[no_mangle]
pub extern "C" fn fieldsync_schema_tank_controller() -> *mut c_char {
    to_c_string(FfiResult::ok(FieldSchema::tank_controller()).to_json())
}

// ============================================================================
// Field Access
// ============================================================================

/// Get every Self value.
///
/// # Returns
/// JSON string: `{"ok": {key: value, ...}}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_values(replica: *const Replica) -> *mut c_char {
    let replica = match replica.as_ref() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    to_c_string(FfiResult::ok(replica.store().values()).to_json())
}

/// Get one field's Self value and timestamp.
///
/// # Returns
/// JSON string: `{"ok": VersionedValue}` or `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - `key` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_get(
    replica: *const Replica,
    key: *const c_char,
) -> *mut c_char {
    let replica = match replica.as_ref() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    let key_str = match from_c_string(key) {
        Some(s) => s,
        None => return error_string("invalid key"),
    };

    to_c_string(FfiResult::ok(replica.store().current(&key_str)).to_json())
}

/// Apply a local edit.
///
/// # Arguments
/// - `value_json`: JSON value of the field's type
/// - `now_ms`: synced wall-clock time, or `0` if the clock is not synced
///
/// # Returns
/// JSON string: `{"ok": LocalEdit}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - `key` and `value_json` must be valid null-terminated C strings or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_edit(
    replica: *mut Replica,
    key: *const c_char,
    value_json: *const c_char,
    now_ms: u64,
) -> *mut c_char {
    let replica = match replica.as_mut() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    let key_str = match from_c_string(key) {
        Some(s) => s,
        None => return error_string("invalid key"),
    };

    let value_str = match from_c_string(value_json) {
        Some(s) => s,
        None => return error_string("invalid value JSON"),
    };

    let value: FieldValue = match serde_json::from_str(&value_str) {
        Ok(v) => v,
        Err(e) => return error_string(format!("parse error: {}", e)),
    };

    let result = replica.record_local_edit(&key_str, value, timestamp_from_ms(now_ms));
    to_c_string(FfiResult::from(result).to_json())
}

/// Flag that Self holds edits the peers have not seen.
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_mark_modified(replica: *mut Replica) {
    if let Some(r) = replica.as_mut() {
        r.mark_config_modified();
    }
}

/// Whether a priority upload is pending: `1` yes, `0` no, `-1` null pointer.
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_needs_upload(replica: *const Replica) -> i32 {
    match replica.as_ref() {
        Some(r) => i32::from(r.needs_config_upload()),
        None => -1,
    }
}

/// Get pending change count.
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_pending_count(replica: *const Replica) -> i64 {
    match replica.as_ref() {
        Some(r) => r.queue().len() as i64,
        None => -1,
    }
}

// ============================================================================
// Sync
// ============================================================================

/// Write a fetched batch into a remote slot and merge.
///
/// # Arguments
/// - `batch_json`: JSON array of wire fields
/// - `source`: slot to write, `0` API or `1` local
/// - `fill_ms`: stamp for fields without `lastModified`, `0` if unsynced
/// - `mode`: slot a two-source replica merges from
///
/// # Returns
/// JSON string: `{"ok": IngestReport}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - `batch_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_ingest(
    replica: *mut Replica,
    batch_json: *const c_char,
    source: i32,
    fill_ms: u64,
    mode: i32,
) -> *mut c_char {
    let replica = match replica.as_mut() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    let batch_str = match from_c_string(batch_json) {
        Some(s) => s,
        None => return error_string("invalid batch JSON"),
    };

    let (source, mode) = match (source_from_i32(source), source_from_i32(mode)) {
        (Some(s), Some(m)) => (s, m),
        _ => return error_string("invalid remote source"),
    };

    let batch = match parse_batch(&batch_str) {
        Ok(b) => b,
        Err(e) => return error_string(e.to_string()),
    };

    let report = replica.ingest(source, &batch, timestamp_from_ms(fill_ms), mode);
    to_c_string(FfiResult::ok(report).to_json())
}

/// Build an outgoing payload of every Self value.
///
/// # Arguments
/// - `stamp`: `0` priority, `1` current timestamps
///
/// # Returns
/// JSON string: `{"ok": [WireField, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_payload(
    replica: *const Replica,
    stamp: i32,
) -> *mut c_char {
    let replica = match replica.as_ref() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    let stamp = match stamp {
        0 => PayloadStamp::Priority,
        1 => PayloadStamp::Current,
        _ => return error_string("invalid payload stamp"),
    };

    let result = replica.store().outgoing_payload(stamp);
    to_c_string(FfiResult::from(result).to_json())
}

/// Build a priority upload.
///
/// Pass the returned object back to `fieldsync_replica_complete_push` once
/// the peer accepted it.
///
/// # Returns
/// JSON string: `{"ok": PriorityPush}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_priority_push(replica: *const Replica) -> *mut c_char {
    let replica = match replica.as_ref() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    to_c_string(FfiResult::from(replica.priority_payload()).to_json())
}

/// Record a priority upload the peer accepted.
///
/// # Arguments
/// - `push_json`: the object returned by `fieldsync_replica_priority_push`
/// - `assigned_json`: JSON object of key to peer-assigned timestamp
///
/// # Returns
/// JSON string: `{"ok": PushCompletion}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - `push_json` and `assigned_json` must be valid null-terminated C strings or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_complete_push(
    replica: *mut Replica,
    push_json: *const c_char,
    assigned_json: *const c_char,
) -> *mut c_char {
    let replica = match replica.as_mut() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    let push: PriorityPush = match from_c_string(push_json).map(|s| serde_json::from_str(&s)) {
        Some(Ok(p)) => p,
        Some(Err(e)) => return error_string(format!("parse error: {}", e)),
        None => return error_string("invalid push JSON"),
    };

    let assigned: BTreeMap<FieldKey, Millis> =
        match from_c_string(assigned_json).map(|s| serde_json::from_str(&s)) {
            Some(Ok(a)) => a,
            Some(Err(e)) => return error_string(format!("parse error: {}", e)),
            None => return error_string("invalid assigned JSON"),
        };

    let completion = replica.complete_priority_push(&push, &assigned);
    to_c_string(FfiResult::ok(completion).to_json())
}

// ============================================================================
// Snapshots
// ============================================================================

/// Export replica state as a snapshot.
///
/// # Returns
/// JSON string: `{"ok": ActorSnapshot}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_export(replica: *const Replica) -> *mut c_char {
    let replica = match replica.as_ref() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    to_c_string(FfiResult::ok(replica.snapshot()).to_json())
}

/// Replace replica state from a snapshot.
///
/// The replica is left untouched if the snapshot does not fit its schema or
/// topology.
///
/// # Returns
/// JSON string: `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `replica` must be a valid pointer from `fieldsync_replica_new` or null
/// - `snapshot_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fieldsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fieldsync_replica_import(
    replica: *mut Replica,
    snapshot_json: *const c_char,
) -> *mut c_char {
    let replica = match replica.as_mut() {
        Some(r) => r,
        None => return error_string("null replica pointer"),
    };

    let snapshot_str = match from_c_string(snapshot_json) {
        Some(s) => s,
        None => return error_string("invalid snapshot JSON"),
    };

    let imported =
        ActorSnapshot::from_json(&snapshot_str).and_then(|snapshot| replica.import(snapshot));
    to_c_string(FfiResult::from(imported).to_json())
}

// ============================================================================
// Utility
// ============================================================================

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn fieldsync_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

/// Get the snapshot format version.
#[no_mangle]
pub extern "C" fn fieldsync_snapshot_format_version() -> u32 {
    crate::SNAPSHOT_FORMAT_VERSION
}
