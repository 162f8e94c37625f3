use crate::config::CoreConfig;
use crate::coverage::CoverageWriter;
use crate::error::Result;
use crate::journey_data::JourneyPoint;
use crate::tile_store::{TileKey, TileStore};
use crate::utils::{self, EARTH_RADIUS};

// Area of one coverage bit, in m². The bit at the center of the tile stands in
// for every bit of it, tiles are small enough for the error to not matter.
fn bit_area_of_tile(key: TileKey, bitmap_width_offset: i16, pixel_zoom: i16) -> f64 {
    let half_width = 1_i64 << (bitmap_width_offset - 1);
    let x = ((key.x as i64) << bitmap_width_offset) + half_width;
    let y = ((key.y as i64) << bitmap_width_offset) + half_width;
    let (left, top) = utils::tile_x_y_to_lng_lat(x, y, pixel_zoom as i32);
    let (right, bottom) = utils::tile_x_y_to_lng_lat(x + 1, y + 1, pixel_zoom as i32);

    let (top, bottom) = (top.to_radians(), bottom.to_radians());
    let d_lng = (right - left).to_radians();
    let width_top = EARTH_RADIUS * d_lng * top.cos();
    let width_bottom = EARTH_RADIUS * d_lng * bottom.cos();
    let height = EARTH_RADIUS * (top - bottom).abs();
    (width_top + width_bottom) / 2.0 * height
}

/// Total covered area of the store in m².
pub fn compute_tile_store_area(tile_store: &TileStore) -> u64 {
    let offset = tile_store.bitmap_width_offset();
    let pixel_zoom = tile_store.grid_zoom() + offset;
    let area: f64 = tile_store
        .keys()
        .into_iter()
        .filter_map(|key| {
            let bits: u32 = tile_store
                .snapshot(&key)?
                .iter()
                .map(|byte| byte.count_ones())
                .sum();
            Some(bits as f64 * bit_area_of_tile(key, offset, pixel_zoom))
        })
        .sum();
    area.round() as u64
}

/// Area in m² covered by one journey on its own.
pub fn compute_journey_area(points: &[JourneyPoint], config: &CoreConfig) -> Result<u64> {
    let tile_store = TileStore::in_memory(config)?;
    CoverageWriter::new(&tile_store).add_journey_points(points)?;
    Ok(compute_tile_store_area(&tile_store))
}
