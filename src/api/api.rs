use chrono::Utc;
use std::sync::{Arc, Mutex, OnceLock};

use crate::config::CoreConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gps_processor::LocationSample;
use crate::journey_data::JourneyHeader;
use crate::logs;
use crate::map_renderer::RenderResult;
use crate::raw_data::RawDataFile;

static MAIN_STATE: OnceLock<Arc<Engine>> = OnceLock::new();
// serializes `init` so the engine is only opened once
static INIT_LOCK: Mutex<()> = Mutex::new(());

pub fn init(temp_dir: String, doc_dir: String, support_dir: String, cache_dir: String) -> Result<()> {
    let _guard = INIT_LOCK.lock().unwrap();
    if MAIN_STATE.get().is_some() {
        warn!("`init` is called multiple times");
        return Ok(());
    }

    // a host may have installed its own logger already
    if let Err(e) = logs::init(&cache_dir) {
        warn!("failed to init logging: {}", e);
    }

    let config = CoreConfig::load_or_default(&support_dir)?;
    let engine = Engine::open(temp_dir, doc_dir, support_dir, cache_dir, config)?;
    let _ = MAIN_STATE.set(Arc::new(engine));
    info!("initialized");
    Ok(())
}

fn get() -> Result<&'static Arc<Engine>> {
    MAIN_STATE.get().ok_or(Error::NotInitialized)
}

/// The global engine, for hosts that drive it through a `Service`.
pub fn engine() -> Result<Arc<Engine>> {
    get().cloned()
}

pub fn on_location_update(
    latitude: f64,
    longitude: f64,
    timestamp_ms: i64,
    accuracy: f32,
    altitude: Option<f32>,
    speed: Option<f32>,
) -> Result<()> {
    get()?.on_location_update(LocationSample {
        latitude,
        longitude,
        timestamp_ms,
        accuracy,
        altitude,
        speed,
    })?;
    Ok(())
}

// NOTE: On Android, we might receive a batch of location updates that are out
// of order.
pub fn on_location_updates(samples: Vec<LocationSample>) -> Result<()> {
    get()?.on_location_updates(samples)?;
    Ok(())
}

pub fn finalize_ongoing_journey() -> Result<Option<String>> {
    get()?.finalize_ongoing_journey()
}

pub fn try_auto_finalize_journey() -> Result<Option<String>> {
    get()?.try_auto_finalize_journey(Utc::now())
}

pub fn has_ongoing_journey() -> Result<bool> {
    get()?.has_ongoing_journey()
}

pub fn list_all_journeys() -> Result<Vec<JourneyHeader>> {
    get()?.list_all_journeys()
}

pub fn get_coverage_area() -> Result<u64> {
    Ok(get()?.get_coverage_area())
}

pub fn get_journey_area(id: String) -> Result<Option<u64>> {
    get()?.get_journey_area(&id)
}

pub fn render_map_overlay(
    zoom: f32,
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
) -> Result<RenderResult> {
    get()?.render_map_overlay(zoom, left, top, right, bottom)
}

pub fn reset_map_renderer() -> Result<()> {
    get()?.reset_map_renderer();
    Ok(())
}

pub fn toggle_raw_data_mode(enable: bool) -> Result<()> {
    get()?.toggle_raw_data_mode(enable)
}

pub fn get_raw_data_mode() -> Result<bool> {
    Ok(get()?.get_raw_data_mode())
}

pub fn list_all_raw_data() -> Result<Vec<RawDataFile>> {
    get()?.list_all_raw_data()
}

pub fn delete_raw_data_file(name: String) -> Result<()> {
    get()?.delete_raw_data_file(&name)
}

pub fn flush() -> Result<()> {
    get()?.flush()
}
