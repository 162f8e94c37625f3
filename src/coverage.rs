use crate::error::Result;
use crate::gps_processor::{LocationSample, ProcessResult};
use crate::journey_data::JourneyPoint;
use crate::tile_store::{TileHandle, TileKey, TileStore};
use crate::utils;

/// Writes coverage bits into a `TileStore`. Coordinates are slippy-map pixels
/// at the zoom where one pixel is one coverage bit.
pub struct CoverageWriter<'a> {
    tile_store: &'a TileStore,
    pixel_zoom: i16,
    offset: i16,
    // consecutive pixels almost always fall into the same tile
    last_tile: Option<TileHandle>,
    newly_covered: u64,
}

impl<'a> CoverageWriter<'a> {
    pub fn new(tile_store: &'a TileStore) -> Self {
        let offset = tile_store.bitmap_width_offset();
        Self {
            tile_store,
            pixel_zoom: tile_store.grid_zoom() + offset,
            offset,
            last_tile: None,
            newly_covered: 0,
        }
    }

    pub fn newly_covered(&self) -> u64 {
        self.newly_covered
    }

    fn world_width(&self) -> i64 {
        1 << self.pixel_zoom
    }

    // `x` may exceed the antimeridian, it is wrapped here.
    fn set_pixel(&mut self, x: i64, y: i64) -> Result<()> {
        let x = x.rem_euclid(self.world_width());
        let (grid_x, grid_y) = (x >> self.offset, y >> self.offset);
        let key = TileKey {
            x: grid_x as u32,
            y: grid_y as u32,
        };
        let cached = self
            .last_tile
            .as_ref()
            .filter(|tile| tile.read().unwrap().key() == key)
            .cloned();
        let tile = match cached {
            Some(tile) => tile,
            None => {
                let tile = self.tile_store.get_or_create_tile(grid_x, grid_y)?;
                self.last_tile = Some(tile.clone());
                tile
            }
        };
        let mask = (1_i64 << self.offset) - 1;
        if self
            .tile_store
            .mark_covered(&tile, (x & mask) as u32, (y & mask) as u32)?
        {
            self.newly_covered += 1;
        }
        Ok(())
    }

    pub fn add_point(&mut self, lng: f64, lat: f64) -> Result<()> {
        let (x, y) = utils::lng_lat_to_pixel(lng, lat, self.pixel_zoom);
        self.set_pixel(x, y)
    }

    pub fn add_line(
        &mut self,
        start_lng: f64,
        start_lat: f64,
        end_lng: f64,
        end_lat: f64,
    ) -> Result<()> {
        let (mut x0, y0) = utils::lng_lat_to_pixel(start_lng, start_lat, self.pixel_zoom);
        let (mut x1, y1) = utils::lng_lat_to_pixel(end_lng, end_lat, self.pixel_zoom);

        // take the short way around when crossing the antimeridian
        let x_half = self.world_width() / 2;
        if x1 - x0 > x_half {
            x0 += 2 * x_half;
        } else if x0 - x1 > x_half {
            x1 += 2 * x_half;
        }

        // Bresenham, both ends included
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);
        loop {
            self.set_pixel(x, y)?;
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
        Ok(())
    }

    /// Applies one preprocessed sample. `last` is the previous accepted sample.
    pub fn add_sample(
        &mut self,
        last: Option<&LocationSample>,
        curr: &LocationSample,
        process_result: ProcessResult,
    ) -> Result<()> {
        match (process_result, last) {
            (ProcessResult::Ignore, _) => Ok(()),
            (ProcessResult::Append, Some(last)) => {
                self.add_line(last.longitude, last.latitude, curr.longitude, curr.latitude)
            }
            (ProcessResult::Append, None) | (ProcessResult::NewSegment, _) => {
                self.add_point(curr.longitude, curr.latitude)
            }
        }
    }

    /// Replays a recorded journey, using the process results stored with it.
    pub fn add_journey_points<'p, I>(&mut self, points: I) -> Result<()>
    where
        I: IntoIterator<Item = &'p JourneyPoint>,
    {
        let mut last: Option<&LocationSample> = None;
        for point in points {
            self.add_sample(last, &point.sample, point.process_result)?;
            if point.process_result != ProcessResult::Ignore {
                last = Some(&point.sample);
            }
        }
        Ok(())
    }
}
