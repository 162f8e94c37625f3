use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

use crate::config::CoreConfig;
use crate::coverage::CoverageWriter;
use crate::error::{Error, Result};
use crate::gps_processor::{GpsProcessor, LocationSample, ProcessResult};
use crate::storage::Storage;

/// Turns incoming samples into the ongoing journey and its coverage. The
/// `gps_processor` lock is the tracker lock: holding it serializes appends and
/// keeps finalize away from a half written sample.
pub struct JourneyTracker {
    storage: Arc<Storage>,
    gps_processor: Mutex<GpsProcessor>,
}

impl JourneyTracker {
    pub fn new(storage: Arc<Storage>, config: &CoreConfig) -> Self {
        let mut gps_processor = GpsProcessor::new(config);
        // pick up where the last process left off, so a restart in the middle
        // of a journey does not break the line
        match storage.get_ongoing_journey() {
            Ok(points) => {
                if let Some(last) = points
                    .into_iter()
                    .rev()
                    .find(|p| p.process_result != ProcessResult::Ignore)
                {
                    gps_processor.resume_from(last.sample);
                }
            }
            Err(e) => warn!("failed to load ongoing journey: {}", e),
        }
        JourneyTracker {
            storage,
            gps_processor: Mutex::new(gps_processor),
        }
    }

    // The samples behind the coverage are already committed and dirty tiles
    // stay dirty, so the next flush picks them up.
    fn flush_tiles(&self) {
        if let Err(e) = self.storage.tile_store().flush() {
            warn!("failed to flush tiles: {}", e);
        }
    }

    fn ingest(&self, gps_processor: &mut GpsProcessor, sample: LocationSample) -> Result<bool> {
        sample.validate()?;
        let tile_store = self.storage.tile_store();
        gps_processor.preprocess(sample, |last, curr, process_result| {
            self.storage.record_gps_data(curr, process_result)?;
            let mut coverage = CoverageWriter::new(tile_store);
            coverage.add_sample(last.as_ref(), curr, process_result)?;
            Ok(coverage.newly_covered() > 0)
        })
    }

    /// Returns whether any new coverage was added.
    pub fn on_location_update(&self, sample: LocationSample) -> Result<bool> {
        let mut gps_processor = self.gps_processor.lock().unwrap();
        let changed = self.ingest(&mut gps_processor, sample)?;
        if changed {
            self.flush_tiles();
        }
        Ok(changed)
    }

    /// Samples are applied in timestamp order. Processing stops at the first
    /// invalid sample, the ones before it are kept.
    pub fn on_location_updates(&self, mut samples: Vec<LocationSample>) -> Result<bool> {
        samples.sort_by_key(|s| s.timestamp_ms);
        let mut gps_processor = self.gps_processor.lock().unwrap();
        let mut changed = false;
        let mut result = Ok(());
        for sample in samples {
            match self.ingest(&mut gps_processor, sample) {
                Ok(c) => changed |= c,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if changed {
            self.flush_tiles();
        }
        result.map(|()| changed)
    }

    pub fn finalize_ongoing_journey(&self) -> Result<Option<String>> {
        let mut gps_processor = self.gps_processor.lock().unwrap();
        // coverage must be durable before the samples behind it leave the
        // ongoing journey
        self.storage.tile_store().flush()?;
        let header = self.storage.finalize_ongoing_journey()?;
        if header.is_some() {
            gps_processor.reset();
        }
        Ok(header.map(|h| h.id))
    }

    pub fn try_auto_finalize_journey(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let mut gps_processor = self.gps_processor.lock().unwrap();
        self.storage.tile_store().flush()?;
        let header = self.storage.try_auto_finalize_journey(now)?;
        if header.is_some() {
            gps_processor.reset();
        }
        Ok(header.map(|h| h.id))
    }

    /// Replays every finalized journey and the ongoing one into the tile
    /// store, used when the stored coverage was dropped. Journeys that fail
    /// to decode are skipped. The tile store keeps asking for a rebuild until
    /// one finishes.
    pub fn rebuild_coverage(&self) -> Result<()> {
        let _gps_processor = self.gps_processor.lock().unwrap();
        let tile_store = self.storage.tile_store();
        tile_store.clear()?;
        let headers = self.storage.list_all_journeys()?;
        info!("rebuilding coverage from {} journeys", headers.len());
        for header in headers {
            match self.storage.get_journey(&header.id) {
                Ok(Some(journey)) => {
                    CoverageWriter::new(tile_store).add_journey_points(&journey.points)?
                }
                Ok(None) => warn!("journey {} disappeared during rebuild", header.id),
                Err(Error::Serialization(e)) => {
                    warn!("skipping unreadable journey {}: {}", header.id, e)
                }
                Err(e) => return Err(e),
            }
        }
        let ongoing = self.storage.get_ongoing_journey()?;
        CoverageWriter::new(tile_store).add_journey_points(&ongoing)?;
        tile_store.flush()?;
        tile_store.mark_rebuilt()
    }
}
