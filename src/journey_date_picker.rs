use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate};

use crate::gps_processor::LocationSample;
use crate::utils;

// Picks the date a journey belongs to. We track the bounding box of each local
// day and use its diagonal to measure how "big" each day is. Then we pick the
// latest day after filtering out days that are less than half of the biggest
// day.
pub struct JourneyDatePicker {
    bbox_per_day: HashMap<NaiveDate, BoundingBox>,
}

impl Default for JourneyDatePicker {
    fn default() -> Self {
        Self::new()
    }
}

impl JourneyDatePicker {
    pub fn new() -> Self {
        JourneyDatePicker {
            bbox_per_day: HashMap::new(),
        }
    }

    /// Samples with an out of range timestamp are skipped.
    pub fn add_sample(&mut self, sample: &LocationSample) {
        let time = match DateTime::from_timestamp_millis(sample.timestamp_ms) {
            Some(time) => time,
            None => return,
        };
        let date = time.with_timezone(&Local).date_naive();
        self.bbox_per_day
            .entry(date)
            .and_modify(|x| x.update(sample))
            .or_insert_with(|| BoundingBox::new(sample));
    }

    pub fn pick_journey_date(&self) -> Option<NaiveDate> {
        let distance_per_date: Vec<(NaiveDate, f64)> = self
            .bbox_per_day
            .iter()
            .map(|(date, bbox)| (*date, bbox.diagonal_in_m()))
            .collect();
        let max_distance = distance_per_date
            .iter()
            .map(|(_, distance)| *distance)
            .fold(0., f64::max);

        // break ties by picking the latest date
        let journey_date = distance_per_date
            .iter()
            .filter(|(_, distance)| *distance >= max_distance / 2.)
            .map(|(date, _)| *date)
            .max();

        debug!("picked journey date: {journey_date:?}, distance_per_date = {distance_per_date:?}");
        journey_date
    }
}

struct BoundingBox {
    lat_min: f64,
    lat_max: f64,
    lng_min: f64,
    lng_max: f64,
}

impl BoundingBox {
    fn new(sample: &LocationSample) -> Self {
        BoundingBox {
            lat_min: sample.latitude,
            lat_max: sample.latitude,
            lng_min: sample.longitude,
            lng_max: sample.longitude,
        }
    }

    fn update(&mut self, sample: &LocationSample) {
        self.lat_min = self.lat_min.min(sample.latitude);
        self.lat_max = self.lat_max.max(sample.latitude);
        self.lng_min = self.lng_min.min(sample.longitude);
        self.lng_max = self.lng_max.max(sample.longitude);
    }

    fn diagonal_in_m(&self) -> f64 {
        utils::haversine_distance(self.lng_min, self.lat_min, self.lng_max, self.lat_max)
    }
}
