use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::error::Result;
use crate::gps_processor::LocationSample;
use crate::journey_area_utils;
use crate::journey_data::{Journey, JourneyHeader};
use crate::journey_tracker::JourneyTracker;
use crate::map_renderer::{MapRenderer, RenderResult};
use crate::raw_data::RawDataFile;
use crate::storage::Storage;

/// One instance of every component, wired to the four storage roots.
pub struct Engine {
    config: CoreConfig,
    storage: Arc<Storage>,
    journey_tracker: JourneyTracker,
    map_renderer: MapRenderer,
}

impl Engine {
    pub fn open(
        temp_dir: String,
        doc_dir: String,
        support_dir: String,
        cache_dir: String,
        config: CoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        // temp_dir and doc_dir are not written to yet
        info!(
            "opening engine, temp_dir = {}, doc_dir = {}, support_dir = {}, cache_dir = {}",
            temp_dir, doc_dir, support_dir, cache_dir
        );
        let storage = Arc::new(Storage::init(support_dir, cache_dir, &config)?);
        let journey_tracker = JourneyTracker::new(storage.clone(), &config);
        if storage.tile_store().needs_rebuild() {
            journey_tracker.rebuild_coverage()?;
        }
        let map_renderer = MapRenderer::new(storage.tile_store().clone(), &config);
        Ok(Engine {
            config,
            storage,
            journey_tracker,
            map_renderer,
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn on_location_update(&self, sample: LocationSample) -> Result<bool> {
        self.journey_tracker.on_location_update(sample)
    }

    pub fn on_location_updates(&self, samples: Vec<LocationSample>) -> Result<bool> {
        self.journey_tracker.on_location_updates(samples)
    }

    pub fn finalize_ongoing_journey(&self) -> Result<Option<String>> {
        self.journey_tracker.finalize_ongoing_journey()
    }

    pub fn try_auto_finalize_journey(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        self.journey_tracker.try_auto_finalize_journey(now)
    }

    pub fn has_ongoing_journey(&self) -> Result<bool> {
        self.storage.has_ongoing_journey()
    }

    pub fn list_all_journeys(&self) -> Result<Vec<JourneyHeader>> {
        self.storage.list_all_journeys()
    }

    pub fn get_journey(&self, id: &str) -> Result<Option<Journey>> {
        self.storage.get_journey(id)
    }

    /// Covered area of all journeys in m².
    pub fn get_coverage_area(&self) -> u64 {
        journey_area_utils::compute_tile_store_area(self.storage.tile_store())
    }

    /// Area in m² covered by one journey on its own, `None` if it does not
    /// exist.
    pub fn get_journey_area(&self, id: &str) -> Result<Option<u64>> {
        match self.storage.get_journey(id)? {
            Some(journey) => Ok(Some(journey_area_utils::compute_journey_area(
                &journey.points,
                &self.config,
            )?)),
            None => Ok(None),
        }
    }

    pub fn render_map_overlay(
        &self,
        zoom: f32,
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
    ) -> Result<RenderResult> {
        self.map_renderer
            .render_map_overlay(zoom, left, top, right, bottom)
    }

    pub fn reset_map_renderer(&self) {
        self.map_renderer.reset()
    }

    pub fn toggle_raw_data_mode(&self, enable: bool) -> Result<()> {
        self.storage.toggle_raw_data_mode(enable)
    }

    pub fn get_raw_data_mode(&self) -> bool {
        self.storage.get_raw_data_mode()
    }

    pub fn list_all_raw_data(&self) -> Result<Vec<RawDataFile>> {
        self.storage.list_all_raw_data()
    }

    pub fn delete_raw_data_file(&self, name: &str) -> Result<()> {
        self.storage.delete_raw_data_file(name)
    }

    pub fn rebuild_coverage(&self) -> Result<()> {
        self.journey_tracker.rebuild_coverage()?;
        self.map_renderer.reset();
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }
}
