//! Edge case tests for fieldsync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use fieldsync_engine::{
    merge_two_source, parse_batch, ActorSnapshot, ChangeQueue, Error, FieldDef, FieldSchema,
    FieldStore, FieldValue, ManualCounter, MergeRule, PayloadStamp, PendingChange, RemoteSource,
    Replica, SendOutcome, SyncCell, TimeAuthority, Timestamp, Topology, VersionedValue,
};

fn device() -> Replica {
    Replica::new(FieldSchema::tank_controller(), Topology::ThreeSource).unwrap()
}

fn app() -> Replica {
    Replica::new(FieldSchema::tank_controller(), Topology::TwoSource).unwrap()
}

// ============================================================================
// Merge Scenarios
// ============================================================================

#[test]
fn same_value_older_timestamp_is_noop() {
    let outcome = merge_two_source(&VersionedValue::at(90.0, 1000), &VersionedValue::at(90.0, 2000));
    assert_eq!(outcome.result, VersionedValue::at(90.0, 2000));
    assert!(!outcome.changed);
}

#[test]
fn newer_timestamp_takes_over() {
    let outcome = merge_two_source(&VersionedValue::at(90.0, 2000), &VersionedValue::at(85.0, 1000));
    assert_eq!(outcome.result, VersionedValue::at(90.0, 2000));
    assert!(outcome.changed);
}

#[test]
fn exact_tie_keeps_current() {
    let outcome = merge_two_source(
        &VersionedValue::at("A".to_string(), 5000),
        &VersionedValue::at("B".to_string(), 5000),
    );
    assert_eq!(outcome.result.value, "B");
    assert!(!outcome.changed);
    assert_eq!(outcome.rule, MergeRule::CurrentNewerOrTied);
}

#[test]
fn float_just_outside_tolerance_is_a_change() {
    let outcome = merge_two_source(&VersionedValue::at(85.002, 2000), &VersionedValue::at(85.0, 1000));
    assert!(outcome.changed);
}

// ============================================================================
// Unsynced Clock
// ============================================================================

#[test]
fn unsynced_clock_reports_unset() {
    let mut clock = TimeAuthority::new(ManualCounter::new(123));
    assert_eq!(clock.current_timestamp(), Timestamp::Unset);
    assert_eq!(clock.now_ms(), Err(Error::ClockUnsynced));
}

#[test]
fn timestamped_payload_requires_synced_clock() {
    let replica = device();
    assert_eq!(
        replica.store().outgoing_payload(PayloadStamp::Current),
        Err(Error::ClockUnsynced)
    );
}

#[test]
fn untimed_inbound_fields_skipped_without_clock() {
    let mut replica = device();
    let batch = parse_batch(r#"[{"key": "tankHeight", "type": "number", "value": 120}]"#).unwrap();

    let report = replica.ingest(RemoteSource::Local, &batch, Timestamp::Unset, RemoteSource::Local);
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].error, Error::ClockUnsynced);
    assert_eq!(
        replica.store().current("tankHeight").map(|v| v.value),
        Some(FieldValue::Number(100.0))
    );
}

// ============================================================================
// Topologies
// ============================================================================

#[test]
fn app_only_merges_selected_remote() {
    let mut replica = app();
    let batch = parse_batch(
        r#"[{"key": "ipAddress", "type": "string", "value": "192.168.1.40", "lastModified": 3000}]"#,
    )
    .unwrap();

    let report = replica.ingest(RemoteSource::Local, &batch, Timestamp::Unset, RemoteSource::Api);
    assert!(report.merge.changed.is_empty());

    let summary = replica.store_mut().merge_all(RemoteSource::Local);
    assert_eq!(summary.changed, vec!["ipAddress"]);

    // The API slot was never touched.
    let cell = replica.store().get("ipAddress").unwrap();
    assert_eq!(cell.slot(RemoteSource::Api).timestamp, Timestamp::Unset);
}

#[test]
fn device_converges_all_slots() {
    let mut replica = device();
    let api = parse_batch(
        r#"[{"key": "lowerThreshold", "type": "number", "value": 25, "lastModified": 4000}]"#,
    )
    .unwrap();
    let local = parse_batch(
        r#"[{"key": "lowerThreshold", "type": "number", "value": 30, "lastModified": 6000}]"#,
    )
    .unwrap();

    replica.store_mut().apply_wire(RemoteSource::Api, &api.fields, Timestamp::Unset);
    replica
        .store_mut()
        .apply_wire(RemoteSource::Local, &local.fields, Timestamp::Unset);
    replica.store_mut().merge_all(RemoteSource::Api);

    let cell = replica.store().get("lowerThreshold").unwrap();
    let expected = VersionedValue::at(FieldValue::Number(30.0), 6000);
    assert_eq!(cell.current(), expected);
    assert_eq!(cell.slot(RemoteSource::Api), expected);
    assert_eq!(cell.slot(RemoteSource::Local), expected);
}

#[test]
fn dual_priority_three_way_local_wins() {
    let mut cell = SyncCell::new(Topology::ThreeSource, false);
    cell.update_from_api(VersionedValue::priority(false));
    cell.update_from_local(VersionedValue::priority(true));
    cell.update_self(VersionedValue::at(false, 10));

    let merge = cell.merge(RemoteSource::Api);
    assert!(merge.changed);
    assert!(*cell.value());
}

// ============================================================================
// Queue
// ============================================================================

#[test]
fn rapid_edits_converge_to_one_entry() {
    let mut replica = device();
    for (i, value) in [81.0, 82.0, 83.0, 84.0, 85.0].into_iter().enumerate() {
        replica
            .record_local_edit(
                "upperThreshold",
                FieldValue::Number(value),
                Timestamp::At(10_000 + i as u64),
            )
            .unwrap();
    }

    assert_eq!(replica.queue().len(), 1);
    assert_eq!(
        replica.queue().get("upperThreshold").map(|c| c.value.clone()),
        Some(FieldValue::Number(85.0))
    );
}

#[test]
fn replay_against_newer_remote_drops_entry() {
    let mut queue = ChangeQueue::new();
    queue.enqueue(PendingChange::new(
        "tankWidth",
        FieldValue::Number(40.0),
        Timestamp::At(1000),
        Timestamp::At(1000),
    ));

    let report = queue.replay(|_| {
        Some(SendOutcome::Rejected {
            remote: VersionedValue::at(FieldValue::Number(60.0), 9000),
        })
    });

    assert_eq!(report.stale, vec!["tankWidth"]);
    assert!(queue.is_empty());
}

// ============================================================================
// Schema And Store
// ============================================================================

#[test]
fn empty_schema_store() {
    let store = FieldStore::new(FieldSchema::new(1), Topology::TwoSource).unwrap();
    assert!(store.values().is_empty());
    assert_eq!(store.outgoing_payload(PayloadStamp::Current), Ok(vec![]));
}

#[test]
fn unicode_string_values() {
    let schema = FieldSchema::new(1).with_field(FieldDef::string("label", "Label", ""));
    let mut replica = Replica::new(schema, Topology::TwoSource).unwrap();

    for (i, name) in ["水タンク", "Резервуар", "🚰", "tab\there"].iter().enumerate() {
        replica
            .record_local_edit("label", FieldValue::Text(name.to_string()), Timestamp::At(100 + i as u64))
            .unwrap();
        assert_eq!(
            replica.store().current("label").map(|v| v.value),
            Some(FieldValue::Text(name.to_string()))
        );
    }
}

#[test]
fn batch_that_is_not_json() {
    assert!(matches!(parse_batch("{{{"), Err(Error::InvalidPayload(_))));
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn snapshot_survives_json() {
    let mut replica = device();
    replica
        .record_local_edit("forceUpdate", FieldValue::Bool(true), Timestamp::Unset)
        .unwrap();

    let json = replica.snapshot().to_json_pretty().unwrap();
    let snapshot = ActorSnapshot::from_json(&json).unwrap();
    let restored = Replica::restore(FieldSchema::tank_controller(), snapshot).unwrap();

    assert_eq!(restored.store().values(), replica.store().values());
    assert!(restored.needs_config_upload());
    assert_eq!(restored.queue().len(), 1);
}

#[test]
fn snapshot_from_other_schema_version_rejected() {
    let snapshot = device().snapshot();
    let mut schema = FieldSchema::tank_controller();
    schema.version = 2;

    assert!(matches!(
        Replica::restore(schema, snapshot),
        Err(Error::SchemaVersionMismatch { expected: 2, actual: 1 })
    ));
}
