use std::f64::consts::PI;

use crate::error::{Error, Result};

// Latitude where the Web Mercator projection becomes a square.
pub const MAX_LATITUDE: f64 = 85.05112878;

pub const EARTH_RADIUS: f64 = 6371000.0; // unit: meter

// https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames
pub fn lng_lat_to_tile_x_y(lng: f64, lat: f64, zoom: i32) -> (i64, i64) {
    let n = f64::powi(2.0, zoom);
    let lat_rad = (lat / 180.0) * PI;
    let x = ((lng + 180.0) / 360.0) * n;
    let y = (1.0 - ((lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI)) / 2.0 * n;
    (x.floor() as i64, y.floor() as i64)
}

pub fn tile_x_y_to_lng_lat(x: i64, y: i64, zoom: i32) -> (f64, f64) {
    let n = f64::powi(2.0, zoom);
    let lng = (x as f64 / n) * 360.0 - 180.0;
    let lat = (f64::atan(f64::sinh(PI * (1.0 - (2.0 * y as f64) / n))) * 180.0) / PI;
    (lng, lat)
}

pub fn validate_lng_lat(lng: f64, lat: f64) -> Result<()> {
    if !lng.is_finite() || !lat.is_finite() {
        return Err(Error::InvalidCoordinate(format!(
            "non-finite coordinate: lng={lng}, lat={lat}"
        )));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(Error::InvalidCoordinate(format!(
            "longitude out of range: {lng}"
        )));
    }
    if !(-MAX_LATITUDE..=MAX_LATITUDE).contains(&lat) {
        return Err(Error::InvalidCoordinate(format!(
            "latitude out of range: {lat}"
        )));
    }
    Ok(())
}

/// Slippy-map pixel at `zoom`, with both axes clamped into the world so that
/// lng = 180 and the latitude limit stay on the map.
pub fn lng_lat_to_pixel(lng: f64, lat: f64, zoom: i16) -> (i64, i64) {
    let max = (1_i64 << zoom) - 1;
    let (x, y) = lng_lat_to_tile_x_y(lng, lat, zoom as i32);
    (x.clamp(0, max), y.clamp(0, max))
}

/// Great-circle distance in meters.
pub fn haversine_distance(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS * a.sqrt().asin()
}

pub mod db {
    use anyhow::Result;
    use rusqlite::{OptionalExtension, Transaction};

    pub fn init_metadata_and_get_version(tx: &Transaction) -> Result<i32> {
        let create_db_metadata_sql = "
        CREATE TABLE IF NOT EXISTS `db_metadata` (
        `key`	TEXT NOT NULL,
        `value`	TEXT,
        PRIMARY KEY(`key`)
        )";
        tx.execute(create_db_metadata_sql, ())?;
        let version = match get_metadata(tx, "version")? {
            None => 0,
            Some(s) => s.parse()?,
        };
        Ok(version)
    }

    pub fn set_version_in_metadata(tx: &Transaction, version: i32) -> Result<()> {
        set_metadata(tx, "version", &version.to_string())
    }

    pub fn get_metadata(tx: &Transaction, key: &str) -> Result<Option<String>> {
        let value = tx
            .query_row(
                "SELECT `value` FROM `db_metadata` WHERE key=?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(tx: &Transaction, key: &str, value: &str) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO `db_metadata` (key, value) VALUES (?1, ?2)",
            (key, value),
        )?;
        Ok(())
    }
}
