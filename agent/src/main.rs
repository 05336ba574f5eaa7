//! fieldsync-sim - replays an offline edit between a device, the cloud and
//! the companion app, all wired to in-memory collaborators.

use fieldsync_agent::{
    AgentConfig, MemoryRemote, MemorySnapshotStore, MemoryTimeSource, SimClock, Synchronizer,
};
use fieldsync_engine::{
    FieldSchema, FieldValue, RemoteSource, SystemUptime, Topology, VersionedValue, WireField,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CLOUD_WRITE_MS: u64 = 1737123456789;
const RECONNECT_MS: u64 = 1737123999999;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync_agent=debug,fieldsync_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let device_config = AgentConfig::from_env()?;
    let app_config = AgentConfig {
        actor: "app".to_string(),
        topology: Topology::TwoSource,
        remote: RemoteSource::Api,
        ..device_config.clone()
    };

    tracing::info!(
        device = %device_config.actor,
        timeout_ms = device_config.control_timeout.as_millis() as u64,
        "Starting fieldsync simulation"
    );

    let schema = FieldSchema::tank_controller();
    let clock = SimClock::new(CLOUD_WRITE_MS);
    let cloud = Arc::new(MemoryRemote::new("cloud", clock.clone()));
    let time = Arc::new(MemoryTimeSource::new(clock.clone()));

    if let Some(def) = schema.get("upperThreshold") {
        cloud.set_field(WireField::encode(
            def,
            &VersionedValue::at(FieldValue::Number(90.0), CLOUD_WRITE_MS),
        )?);
    }

    let app = Synchronizer::new(
        app_config,
        schema.clone(),
        SystemUptime::new(),
        cloud.clone(),
        time.clone(),
    )?;
    app.on_device_online().await?;

    let flash = Arc::new(MemorySnapshotStore::new());
    let device = Synchronizer::new(
        device_config,
        schema,
        SystemUptime::new(),
        cloud.clone(),
        time.clone(),
    )?
    .with_snapshot_store(flash.clone());

    // Device boots without network: the edit is stamped priority
    device
        .record_local_edit("upperThreshold", FieldValue::Number(85.0))
        .await?;

    clock.set(RECONNECT_MS);
    let report = device.on_device_online().await?;
    tracing::info!(report = %serde_json::to_string(&report)?, "Device reconnected");

    app.on_device_online().await?;

    for (actor, value) in [
        ("device", device.field("upperThreshold").await),
        ("app", app.field("upperThreshold").await),
        ("cloud", cloud.versioned("upperThreshold")),
    ] {
        match value {
            Some(v) => tracing::info!(actor, value = %v.value, timestamp = %v.timestamp, "upperThreshold"),
            None => tracing::warn!(actor, "upperThreshold missing"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&device.status().await)?);
    println!("{}", serde_json::to_string_pretty(&app.status().await)?);
    if let Some(json) = flash.raw() {
        tracing::debug!(bytes = json.len(), "Device snapshot persisted");
    }

    Ok(())
}
