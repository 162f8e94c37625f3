use std::io::{Read, Write};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use integer_encoding::*;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::gps_processor::{LocationSample, ProcessResult};

const JOURNEY_POINTS_MAGIC_HEADER: [u8; 2] = [b'J', b'0'];
const TILE_BITMAP_MAGIC_HEADER: [u8; 2] = [b'T', b'0'];

const HAS_ALTITUDE: u8 = 1;
const HAS_SPEED: u8 = 1 << 1;

#[derive(Clone, Debug, PartialEq)]
pub struct JourneyPoint {
    pub sample: LocationSample,
    pub process_result: ProcessResult,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JourneyHeader {
    pub id: String,
    pub revision: String,
    pub created_at: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Local date the journey is filed under, see `JourneyDatePicker`.
    pub journey_date: NaiveDate,
    pub sample_count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Journey {
    pub header: JourneyHeader,
    pub points: Vec<JourneyPoint>,
}

impl Journey {
    pub fn samples(&self) -> impl Iterator<Item = &LocationSample> {
        self.points.iter().map(|p| &p.sample)
    }
}

pub fn validate_magic_header<T: Read>(reader: &mut T, expected_header: &[u8; 2]) -> Result<()> {
    let mut magic_header: [u8; 2] = [0; 2];
    reader.read_exact(&mut magic_header)?;
    if &magic_header != expected_header {
        bail!(
            "Invalid magic header, expect: {:?}, got: {:?}",
            expected_header,
            &magic_header
        );
    };
    Ok(())
}

pub fn serialize_journey_points<T: Write>(
    points: &[JourneyPoint],
    mut writer: T,
    level: i32,
) -> Result<()> {
    writer.write_all(&JOURNEY_POINTS_MAGIC_HEADER)?;

    // data is compressed as a whole
    let mut encoder = zstd::Encoder::new(writer, level)?.auto_finish();
    encoder.write_all(&(points.len() as u64).encode_var_vec())?;
    for point in points {
        let sample = &point.sample;
        encoder.write_all(&sample.timestamp_ms.encode_var_vec())?;
        encoder.write_all(&sample.latitude.to_be_bytes())?;
        encoder.write_all(&sample.longitude.to_be_bytes())?;
        encoder.write_all(&sample.accuracy.to_be_bytes())?;
        let mut flags = 0;
        if sample.altitude.is_some() {
            flags |= HAS_ALTITUDE;
        }
        if sample.speed.is_some() {
            flags |= HAS_SPEED;
        }
        encoder.write_all(&[flags, point.process_result.to_int() as u8])?;
        if let Some(altitude) = sample.altitude {
            encoder.write_all(&altitude.to_be_bytes())?;
        }
        if let Some(speed) = sample.speed {
            encoder.write_all(&speed.to_be_bytes())?;
        }
    }
    Ok(())
}

fn read_f32<T: Read>(reader: &mut T) -> Result<f32> {
    let mut buf: [u8; 4] = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

fn read_f64<T: Read>(reader: &mut T) -> Result<f64> {
    let mut buf: [u8; 8] = [0; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

fn deserialize_journey_points_internal<T: Read>(mut reader: T) -> Result<Vec<JourneyPoint>> {
    validate_magic_header(&mut reader, &JOURNEY_POINTS_MAGIC_HEADER)?;

    let mut decoder = zstd::Decoder::new(reader)?;
    let count: u64 = decoder.read_varint()?;
    // don't trust the count for preallocation, the data may be corrupted.
    let mut points = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        let timestamp_ms: i64 = decoder.read_varint()?;
        let latitude = read_f64(&mut decoder)?;
        let longitude = read_f64(&mut decoder)?;
        let accuracy = read_f32(&mut decoder)?;
        let mut buf: [u8; 2] = [0; 2];
        decoder.read_exact(&mut buf)?;
        let [flags, process_result] = buf;
        let altitude = if flags & HAS_ALTITUDE != 0 {
            Some(read_f32(&mut decoder)?)
        } else {
            None
        };
        let speed = if flags & HAS_SPEED != 0 {
            Some(read_f32(&mut decoder)?)
        } else {
            None
        };
        points.push(JourneyPoint {
            sample: LocationSample {
                latitude,
                longitude,
                timestamp_ms,
                accuracy,
                altitude,
                speed,
            },
            process_result: ProcessResult::of_int(process_result as i8)?,
        });
    }
    Ok(points)
}

pub fn deserialize_journey_points<T: Read>(reader: T) -> crate::error::Result<Vec<JourneyPoint>> {
    deserialize_journey_points_internal(reader)
        .map_err(|e| Error::Serialization(format!("journey data: {e:#}")))
}

pub fn serialize_tile_bitmap<T: Write>(data: &[u8], mut writer: T, level: i32) -> Result<()> {
    writer.write_all(&TILE_BITMAP_MAGIC_HEADER)?;
    let mut encoder = zstd::Encoder::new(writer, level)?.auto_finish();
    encoder.write_all(data)?;
    Ok(())
}

pub fn deserialize_tile_bitmap<T: Read>(
    mut reader: T,
    expected_size: usize,
) -> crate::error::Result<Vec<u8>> {
    let f = || -> Result<Vec<u8>> {
        validate_magic_header(&mut reader, &TILE_BITMAP_MAGIC_HEADER)?;
        let mut decoder = zstd::Decoder::new(reader)?;
        let mut data = Vec::with_capacity(expected_size);
        // one extra byte is enough to tell that the bitmap is too large
        decoder
            .take(expected_size as u64 + 1)
            .read_to_end(&mut data)?;
        if data.len() != expected_size {
            bail!(
                "unexpected bitmap size, expect: {}, got: {}",
                expected_size,
                data.len()
            );
        }
        Ok(data)
    };
    f().map_err(|e| Error::Serialization(format!("tile bitmap: {e:#}")))
}
