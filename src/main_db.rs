use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::cmp::Ordering;
use std::error::Error;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::gps_processor::{LocationSample, ProcessResult};
use crate::journey_data::{self, Journey, JourneyHeader, JourneyPoint};
use crate::journey_date_picker::JourneyDatePicker;
use crate::utils;

/* The main database. Unlike the cache db, everything in here is user data and
must survive an upgrade, so schema changes go through migrations.

`ongoing_journey` keeps every sample of the journey that is being recorded,
one row per sample, including the ignored ones.

`journey` keeps all finalized journeys. The header is stored as json next to
the compressed points so listing does not need to touch the points.
*/

pub const MAIN_DB_FILE_NAME: &str = "main.db";

#[allow(clippy::type_complexity)]
fn open_db_and_run_migration(
    conn: &mut Connection,
    migrations: &[&dyn Fn(&Transaction) -> Result<()>],
) -> Result<()> {
    let tx = conn.transaction()?;

    let version = utils::db::init_metadata_and_get_version(&tx)? as usize;
    let target_version = migrations.len();
    debug!(
        "current version = {}, target_version = {}",
        version, target_version
    );
    match version.cmp(&target_version) {
        Ordering::Equal => (),
        Ordering::Less => {
            for (i, f) in migrations.iter().enumerate().skip(version) {
                info!("running migration for version: {}", i + 1);
                f(&tx)?;
            }
            utils::db::set_version_in_metadata(&tx, target_version as i32)?;
        }
        Ordering::Greater => {
            bail!(
                "version too high: current version = {}, target_version = {}",
                version,
                target_version
            );
        }
    }
    tx.commit()?;
    Ok(())
}

fn generate_random_revision() -> String {
    random_string::generate(8, random_string::charsets::ALPHANUMERIC)
}

fn timestamp_ms_to_datetime(timestamp_ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| anyhow!("timestamp out of range: {}", timestamp_ms))
}

// Falls back to the local date of the first sample when every sample was
// ignored.
fn pick_journey_date(points: &[JourneyPoint], start: i64) -> Result<NaiveDate> {
    let mut picker = JourneyDatePicker::new();
    points
        .iter()
        .filter(|p| p.process_result != ProcessResult::Ignore)
        .for_each(|p| picker.add_sample(&p.sample));
    match picker.pick_journey_date() {
        Some(date) => Ok(date),
        None => Ok(timestamp_ms_to_datetime(start)?
            .with_timezone(&Local)
            .date_naive()),
    }
}

pub struct Txn<'a> {
    db_txn: rusqlite::Transaction<'a>,
}

impl Txn<'_> {
    pub fn get_ongoing_journey(&self) -> Result<Vec<JourneyPoint>> {
        // `id` in `ongoing_journey` is auto incremented, it is the arrival order.
        let mut query = self.db_txn.prepare(
            "SELECT timestamp_ms, lat, lng, accuracy, altitude, speed, process_result FROM ongoing_journey ORDER BY id;",
        )?;
        let mut rows = query.query(())?;
        let mut points = Vec::new();
        while let Some(row) = rows.next()? {
            let process_result: i8 = row.get(6)?;
            points.push(JourneyPoint {
                sample: LocationSample {
                    timestamp_ms: row.get(0)?,
                    latitude: row.get(1)?,
                    longitude: row.get(2)?,
                    accuracy: row.get(3)?,
                    altitude: row.get(4)?,
                    speed: row.get(5)?,
                },
                process_result: ProcessResult::of_int(process_result)?,
            });
        }
        Ok(points)
    }

    pub fn has_ongoing_journey(&self) -> Result<bool> {
        let exists: bool = self.db_txn.query_row(
            "SELECT EXISTS (SELECT 1 FROM ongoing_journey);",
            (),
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // the first timestamp is the start time, the second is the end time
    pub fn get_ongoing_journey_timestamp_range(
        &self,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let range: (Option<i64>, Option<i64>) = self.db_txn.query_row(
            "SELECT MIN(timestamp_ms), MAX(timestamp_ms) FROM ongoing_journey;",
            (),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        match range {
            (Some(start), Some(end)) => Ok(Some((
                timestamp_ms_to_datetime(start)?,
                timestamp_ms_to_datetime(end)?,
            ))),
            _ => Ok(None),
        }
    }

    fn insert_journey(&mut self, journey: &Journey, zstd_compress_level: i32) -> Result<()> {
        let header = &journey.header;
        if self.get_journey_header(&header.id)?.is_some() {
            bail!("Journey with ID {} already exists", &header.id);
        }
        let header_json = serde_json::to_string(header)?;
        let mut data_bytes = Vec::new();
        journey_data::serialize_journey_points(&journey.points, &mut data_bytes, zstd_compress_level)?;

        let sql = "INSERT INTO journey (id, end_timestamp_ms, header, data) VALUES (?1, ?2, ?3, ?4);";
        self.db_txn.execute(
            sql,
            (
                &header.id,
                header.end.timestamp_millis(),
                header_json,
                data_bytes,
            ),
        )?;
        Ok(())
    }

    /// Moves the ongoing journey into `journey`. Returns `None` when there was
    /// nothing to seal.
    pub fn finalize_ongoing_journey(
        &mut self,
        zstd_compress_level: i32,
    ) -> Result<Option<JourneyHeader>> {
        let points = self.get_ongoing_journey()?;
        let header = match (
            points.iter().map(|p| p.sample.timestamp_ms).min(),
            points.iter().map(|p| p.sample.timestamp_ms).max(),
        ) {
            (Some(start), Some(end)) => {
                let header = JourneyHeader {
                    id: Uuid::new_v4().as_hyphenated().to_string(),
                    // we use id + revision as the equality check, a short
                    // random string is good enough.
                    revision: generate_random_revision(),
                    created_at: Utc::now(),
                    start: timestamp_ms_to_datetime(start)?,
                    end: timestamp_ms_to_datetime(end)?,
                    journey_date: pick_journey_date(&points, start)?,
                    sample_count: points.len() as u64,
                };
                let journey = Journey {
                    header: header.clone(),
                    points,
                };
                self.insert_journey(&journey, zstd_compress_level)?;
                Some(header)
            }
            _ => None,
        };

        self.db_txn.execute("DELETE FROM ongoing_journey;", ())?;
        self.db_txn.execute(
            "DELETE FROM sqlite_sequence WHERE name='ongoing_journey';",
            (),
        )?;

        info!(
            "Ongoing journey finalized: id={:?}",
            header.as_ref().map(|h| &h.id)
        );
        Ok(header)
    }

    pub fn list_all_journeys(&self) -> Result<Vec<JourneyHeader>> {
        let mut query = self.db_txn.prepare(
            // use `id` to break tie
            "SELECT header FROM journey ORDER BY end_timestamp_ms DESC, id;",
        )?;
        let mut rows = query.query(())?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let header_json: String = row.get(0)?;
            results.push(serde_json::from_str(&header_json)?);
        }
        Ok(results)
    }

    pub fn get_journey_header(&self, id: &str) -> Result<Option<JourneyHeader>> {
        let header_json: Option<String> = self
            .db_txn
            .query_row("SELECT header FROM journey WHERE id = ?1;", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match header_json {
            Some(header_json) => Ok(Some(serde_json::from_str(&header_json)?)),
            None => Ok(None),
        }
    }

    pub fn get_journey(&self, id: &str) -> Result<Option<Journey>> {
        let row: Option<(String, Vec<u8>)> = self
            .db_txn
            .query_row(
                "SELECT header, data FROM journey WHERE id = ?1;",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((header_json, data)) => {
                let header: JourneyHeader = serde_json::from_str(&header_json)?;
                let points = journey_data::deserialize_journey_points(data.as_slice())?;
                Ok(Some(Journey { header, points }))
            }
        }
    }

    pub fn try_auto_finalize_journey(
        &mut self,
        now: DateTime<Utc>,
        zstd_compress_level: i32,
    ) -> Result<Option<JourneyHeader>> {
        match self.get_ongoing_journey_timestamp_range()? {
            None => Ok(None),
            Some((start, end)) => {
                let recording_length_hour = (end.timestamp() - start.timestamp()) / 60 / 60;
                let required_gap_mins = if recording_length_hour >= 72 {
                    0 // let's just finalize it
                } else if recording_length_hour >= 48 {
                    2
                } else if recording_length_hour >= 24 {
                    5
                } else if start.with_timezone(&Local).date_naive()
                    != now.with_timezone(&Local).date_naive()
                {
                    // the local date changed since start
                    15
                } else {
                    6 * 60
                };

                let try_finalize = (now.timestamp() - end.timestamp()) / 60 >= required_gap_mins;

                info!(
                    "Auto finalize ongoing journey: start={}, end={}, now={}, try_finalize={}",
                    start, end, now, try_finalize
                );
                if try_finalize {
                    self.finalize_ongoing_journey(zstd_compress_level)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

pub struct MainDb {
    conn: Connection,
}

impl MainDb {
    pub fn open(support_dir: &str, busy_timeout_ms: u64) -> Result<MainDb> {
        debug!("opening main db in {}", support_dir);
        let mut conn = Connection::open(Path::new(support_dir).join(MAIN_DB_FILE_NAME))?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        open_db_and_run_migration(
            &mut conn,
            &[&|tx| {
                let sql = "
                CREATE TABLE ongoing_journey (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT
                                        UNIQUE
                                        NOT NULL,
                    timestamp_ms   INTEGER NOT NULL,
                    lat            REAL    NOT NULL,
                    lng            REAL    NOT NULL,
                    accuracy       REAL    NOT NULL,
                    altitude       REAL,
                    speed          REAL,
                    process_result INTEGER NOT NULL
                );
                CREATE TABLE journey (
                    id                TEXT    PRIMARY KEY
                                              NOT NULL
                                              UNIQUE,
                    end_timestamp_ms  INTEGER NOT NULL,
                    header            TEXT    NOT NULL,
                    data              BLOB    NOT NULL
                );
                CREATE INDEX journey_end_index ON journey (
                    end_timestamp_ms DESC
                );
                CREATE TABLE setting (
                    key               TEXT    PRIMARY KEY
                                              NOT NULL
                                              UNIQUE,
                    value             TEXT
                );
                ";
                for s in sql_split::split(sql) {
                    tx.execute(&s, ())?;
                }
                Ok(())
            }],
        )?;
        Ok(MainDb { conn })
    }

    pub fn with_txn<F, O>(&mut self, f: F) -> Result<O>
    where
        F: FnOnce(&mut Txn) -> Result<O>,
    {
        let mut txn = Txn {
            db_txn: self.conn.transaction()?,
        };
        let output = f(&mut txn)?;
        txn.db_txn.commit()?;
        Ok(output)
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.cache_flush()?;
        Ok(())
    }

    /* NOTE:
      Only operations that do NOT need transactionality can be put outside
      `Txn`. Be extra careful.
    */

    /// Appends a sample to the ongoing journey, ignored ones included.
    pub fn record(&mut self, sample: &LocationSample, process_result: ProcessResult) -> Result<()> {
        let sql = "INSERT INTO ongoing_journey (timestamp_ms, lat, lng, accuracy, altitude, speed, process_result) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);";
        self.conn.prepare_cached(sql)?.execute((
            sample.timestamp_ms,
            sample.latitude,
            sample.longitude,
            sample.accuracy,
            sample.altitude,
            sample.speed,
            process_result.to_int(),
        ))?;
        Ok(())
    }

    pub fn get_setting<T: FromStr>(&mut self, setting: Setting) -> Result<Option<T>>
    where
        <T as FromStr>::Err: Error + Send + Sync + 'static,
    {
        let result: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM setting WHERE key = ?1;",
                [setting.to_db_key()],
                |row| row.get(0),
            )
            .optional()?;
        match result {
            None => Ok(None),
            Some(s) => {
                let v = FromStr::from_str(&s)?;
                Ok(Some(v))
            }
        }
    }

    pub fn get_setting_with_default<T: FromStr>(&mut self, setting: Setting, default: T) -> T
    where
        <T as FromStr>::Err: Error + Send + Sync + 'static,
    {
        match self.get_setting(setting) {
            Ok(v) => v,
            Err(error) => {
                warn!(
                    "[main_db.get_setting_with_default] setting:{:?}, error:{}",
                    setting, error
                );
                None
            }
        }
        .unwrap_or(default)
    }

    pub fn set_setting<T: ToString>(&mut self, setting: Setting, value: T) -> Result<()> {
        let sql = "INSERT OR REPLACE INTO setting (key, value) VALUES (?1, ?2);";
        self.conn
            .execute(sql, (setting.to_db_key(), value.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Setting {
    RawDataMode,
}

impl Setting {
    fn to_db_key(self) -> &'static str {
        match self {
            Self::RawDataMode => "RAW_DATA_MODE",
        }
    }
}
