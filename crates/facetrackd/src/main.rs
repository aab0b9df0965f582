use anyhow::{Context, Result};
use facetrack_core::{ArcFaceExtractor, PunchPolicy, SharedRegistry};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use config::{BusKind, Config};
use dbus_interface::{FaceTrackService, BUS_NAME, OBJECT_PATH};
use store::Database;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facetrackd starting");

    let config = Config::load()?;
    tracing::info!(
        db = %config.db_path.display(),
        model = %config.model_path.display(),
        detector = %config.detector_model_path.display(),
        threshold = config.match_threshold,
        cooldown_secs = config.punch_cooldown_secs,
        bus = ?config.bus,
        "configuration loaded"
    );

    // Fail fast: database and model must both be available before serving.
    let db = Arc::new(
        Database::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    let registry = Arc::new(SharedRegistry::load(db.clone()).context("loading registry")?);

    let extractor = ArcFaceExtractor::load(&config.model_path, &config.detector_model_path)
        .context("loading face models")?;
    let engine = engine::spawn_engine(Box::new(extractor))?;

    let service = FaceTrackService {
        registry,
        db,
        engine,
        threshold: config.match_threshold,
        punch_policy: PunchPolicy::new(config.punch_cooldown_secs),
        model_path: config.model_path.clone(),
        detector_path: config.detector_model_path.clone(),
    };

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facetrackd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facetrackd shutting down");

    Ok(())
}
