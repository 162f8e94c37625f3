use chrono::DateTime;
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::utils;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: i64,
    pub accuracy: f32,
    pub altitude: Option<f32>,
    pub speed: Option<f32>,
}

impl LocationSample {
    pub fn validate(&self) -> Result<()> {
        utils::validate_lng_lat(self.longitude, self.latitude)?;
        // journeys store their time range as `DateTime`
        if DateTime::from_timestamp_millis(self.timestamp_ms).is_none() {
            return Err(Error::InvalidCoordinate(format!(
                "timestamp out of range: {}",
                self.timestamp_ms
            )));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
#[repr(i8)]
pub enum ProcessResult {
    Append = 0,
    NewSegment = 1,
    // negative values are for ones that do not contribute to coverage.
    Ignore = -1,
}

impl ProcessResult {
    pub fn to_int(&self) -> i8 {
        *self as i8
    }

    pub fn of_int(i: i8) -> anyhow::Result<Self> {
        match i {
            0 => Ok(ProcessResult::Append),
            1 => Ok(ProcessResult::NewSegment),
            -1 => Ok(ProcessResult::Ignore),
            _ => bail!("Invalid int for `ProcessResult` {}", i),
        }
    }
}

pub struct GpsProcessor {
    accuracy_threshold: f32,
    segment_gap_ms: i64,
    last_data: Option<LocationSample>,
}

impl GpsProcessor {
    pub fn new(config: &CoreConfig) -> Self {
        GpsProcessor {
            accuracy_threshold: config.accuracy_threshold,
            segment_gap_ms: config.segment_gap_ms,
            last_data: None,
        }
    }

    pub fn last_data(&self) -> Option<&LocationSample> {
        self.last_data.as_ref()
    }

    pub fn resume_from(&mut self, last_data: LocationSample) {
        self.last_data = Some(last_data);
    }

    /// Forget the previous sample so the next one starts a new segment.
    pub fn reset(&mut self) {
        self.last_data = None;
    }

    pub fn classify(&self, curr_data: &LocationSample) -> ProcessResult {
        if curr_data.accuracy > self.accuracy_threshold {
            return ProcessResult::Ignore;
        }
        match &self.last_data {
            None => ProcessResult::NewSegment,
            Some(last_data) => {
                let time_diff_in_ms = curr_data.timestamp_ms.saturating_sub(last_data.timestamp_ms);
                if time_diff_in_ms < 0 {
                    // NOTE: a late update from a while ago would draw a line
                    // back in time, we just drop it.
                    ProcessResult::Ignore
                } else if time_diff_in_ms > self.segment_gap_ms {
                    ProcessResult::NewSegment
                } else {
                    ProcessResult::Append
                }
            }
        }
    }

    // `f` sees the previous accepted sample. The processor only moves forward
    // when `f` succeeds, so a failed write can be retried with the same input.
    pub fn preprocess<F, O>(&mut self, curr_data: LocationSample, f: F) -> Result<O>
    where
        F: FnOnce(&Option<LocationSample>, &LocationSample, ProcessResult) -> Result<O>,
    {
        let result = self.classify(&curr_data);
        let output = f(&self.last_data, &curr_data, result)?;
        if result != ProcessResult::Ignore {
            self.last_data = Some(curr_data);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn sample(timestamp_ms: i64) -> LocationSample {
        LocationSample {
            latitude: 31.2304,
            longitude: 121.4737,
            timestamp_ms,
            accuracy: 5.0,
            altitude: None,
            speed: None,
        }
    }

    #[test]
    fn int_conversion() {
        for result in ProcessResult::iter() {
            assert_eq!(
                result,
                ProcessResult::of_int(ProcessResult::to_int(&result)).unwrap()
            )
        }
        assert!(ProcessResult::of_int(7).is_err());
    }

    #[test]
    fn extreme_timestamps() {
        let mut gps_processor = GpsProcessor::new(&CoreConfig::default());
        gps_processor.resume_from(sample(-1_000_000));
        assert_eq!(gps_processor.classify(&sample(i64::MAX)), ProcessResult::NewSegment);
        gps_processor.resume_from(sample(i64::MAX));
        assert_eq!(gps_processor.classify(&sample(i64::MIN)), ProcessResult::Ignore);

        assert!(sample(1_695_150_531_000).validate().is_ok());
        assert!(matches!(
            sample(i64::MAX).validate(),
            Err(Error::InvalidCoordinate(_))
        ));
        assert!(sample(i64::MIN).validate().is_err());
    }
}
