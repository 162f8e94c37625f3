use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

use crate::config::CoreConfig;
use crate::error::Result;
use crate::gps_processor::{LocationSample, ProcessResult};
use crate::journey_data::{Journey, JourneyHeader, JourneyPoint};
use crate::main_db::{MainDb, Setting};
use crate::raw_data::{self, RawDataFile, RawDataRecorder};
use crate::tile_store::TileStore;

// Lock order: `raw_data_recorder` -> `main_db` -> `tile_store`.
pub struct Storage {
    support_dir: String,
    zstd_compress_level: i32,
    main_db: Mutex<MainDb>,
    raw_data_recorder: Mutex<Option<RawDataRecorder>>, // `None` means disabled
    tile_store: Arc<TileStore>,
}

impl Storage {
    pub fn init(
        support_dir: String,
        cache_dir: String,
        config: &CoreConfig,
    ) -> Result<Self> {
        let mut main_db = MainDb::open(&support_dir, config.db_busy_timeout_ms)?;
        let tile_store = TileStore::open(&cache_dir, config)?;
        let raw_data_recorder = if main_db.get_setting_with_default(Setting::RawDataMode, false) {
            Some(RawDataRecorder::init(&support_dir)?)
        } else {
            None
        };
        Ok(Storage {
            support_dir,
            zstd_compress_level: config.zstd_compress_level,
            main_db: Mutex::new(main_db),
            raw_data_recorder: Mutex::new(raw_data_recorder),
            tile_store: Arc::new(tile_store),
        })
    }

    pub fn tile_store(&self) -> &Arc<TileStore> {
        &self.tile_store
    }

    pub fn toggle_raw_data_mode(&self, enable: bool) -> Result<()> {
        let mut raw_data_recorder = self.raw_data_recorder.lock().unwrap();
        if enable == raw_data_recorder.is_some() {
            return Ok(());
        }
        let recorder = if enable {
            Some(RawDataRecorder::init(&self.support_dir)?)
        } else {
            None
        };
        // the in-memory state only changes once the setting is durable
        self.main_db
            .lock()
            .unwrap()
            .set_setting(Setting::RawDataMode, enable)?;
        debug!("[storage] raw data mode enabled = {}", enable);
        // `drop` flushes and closes the previous file.
        *raw_data_recorder = recorder;
        Ok(())
    }

    pub fn get_raw_data_mode(&self) -> bool {
        let raw_data_recorder = self.raw_data_recorder.lock().unwrap();
        raw_data_recorder.is_some()
    }

    /// The sample is committed to `main.db` first. The raw copy is best
    /// effort, failing to write it does not fail the call.
    pub fn record_gps_data(
        &self,
        sample: &LocationSample,
        process_result: ProcessResult,
    ) -> Result<()> {
        let mut raw_data_recorder = self.raw_data_recorder.lock().unwrap();
        self.main_db
            .lock()
            .unwrap()
            .record(sample, process_result)?;
        if let Some(ref mut x) = *raw_data_recorder {
            if let Err(e) = x.record(sample, process_result) {
                warn!("[storage] failed to write raw data: {:#}", e);
            }
        }
        Ok(())
    }

    pub fn list_all_raw_data(&self) -> Result<Vec<RawDataFile>> {
        Ok(raw_data::list_all_raw_data(&self.support_dir)?)
    }

    pub fn delete_raw_data_file(&self, name: &str) -> Result<()> {
        // keep the recorder out of the way while a file is removed
        let _raw_data_recorder = self.raw_data_recorder.lock().unwrap();
        Ok(raw_data::delete_raw_data_file(&self.support_dir, name)?)
    }

    // Runs after the journey is committed, so it can only warn.
    fn after_finalize(
        &self,
        raw_data_recorder: &mut Option<RawDataRecorder>,
        header: &Option<JourneyHeader>,
    ) {
        if header.is_some() {
            if let Some(ref mut x) = *raw_data_recorder {
                if let Err(e) = x.rotate() {
                    warn!("[storage] failed to close raw data file: {:#}", e);
                }
            }
        }
    }

    pub fn finalize_ongoing_journey(&self) -> Result<Option<JourneyHeader>> {
        let mut raw_data_recorder = self.raw_data_recorder.lock().unwrap();
        let level = self.zstd_compress_level;
        let header = self
            .main_db
            .lock()
            .unwrap()
            .with_txn(|txn| txn.finalize_ongoing_journey(level))?;
        self.after_finalize(&mut raw_data_recorder, &header);
        Ok(header)
    }

    pub fn try_auto_finalize_journey(&self, now: DateTime<Utc>) -> Result<Option<JourneyHeader>> {
        let mut raw_data_recorder = self.raw_data_recorder.lock().unwrap();
        let level = self.zstd_compress_level;
        let header = self
            .main_db
            .lock()
            .unwrap()
            .with_txn(|txn| txn.try_auto_finalize_journey(now, level))?;
        self.after_finalize(&mut raw_data_recorder, &header);
        Ok(header)
    }

    pub fn has_ongoing_journey(&self) -> Result<bool> {
        Ok(self
            .main_db
            .lock()
            .unwrap()
            .with_txn(|txn| txn.has_ongoing_journey())?)
    }

    pub fn get_ongoing_journey(&self) -> Result<Vec<JourneyPoint>> {
        Ok(self
            .main_db
            .lock()
            .unwrap()
            .with_txn(|txn| txn.get_ongoing_journey())?)
    }

    pub fn list_all_journeys(&self) -> Result<Vec<JourneyHeader>> {
        Ok(self
            .main_db
            .lock()
            .unwrap()
            .with_txn(|txn| txn.list_all_journeys())?)
    }

    pub fn get_journey(&self, id: &str) -> Result<Option<Journey>> {
        Ok(self
            .main_db
            .lock()
            .unwrap()
            .with_txn(|txn| txn.get_journey(id))?)
    }

    pub fn flush(&self) -> Result<()> {
        debug!("[storage] flushing");

        let mut raw_data_recorder = self.raw_data_recorder.lock().unwrap();
        if let Some(ref mut x) = *raw_data_recorder {
            x.flush()?;
        }
        drop(raw_data_recorder);

        let main_db = self.main_db.lock().unwrap();
        main_db.flush()?;
        drop(main_db);

        self.tile_store.flush()
    }
}
