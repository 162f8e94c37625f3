use std::sync::{Arc, Mutex};
use tiny_skia::{BlendMode, Pixmap, PixmapPaint, Transform};

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::tile_renderer::TileRenderer;
use crate::tile_store::TileStore;
use crate::utils;

pub const MAX_RENDER_ZOOM: i32 = 22;

#[derive(Clone, Debug, PartialEq)]
pub struct RenderResult {
    // coordinates are in lat or lng
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    // in pixels, both are 0 when nothing is covered
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RenderResult {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A viewport snapped outward to view tiles. `right_idx` may go past the
/// antimeridian, in which case it is larger than `2^zoom - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderArea {
    pub zoom: i32,
    pub left_idx: i64,
    pub top_idx: i64,
    pub right_idx: i64,
    pub bottom_idx: i64,
}

impl RenderArea {
    pub fn from_viewport(zoom: f32, left: f64, top: f64, right: f64, bottom: f64) -> Result<Self> {
        if !zoom.is_finite() || [left, top, right, bottom].iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidCoordinate(format!(
                "non-finite viewport: zoom={zoom}, left={left}, top={top}, right={right}, bottom={bottom}"
            )));
        }
        let zoom = (zoom as i32).clamp(0, MAX_RENDER_ZOOM);
        let clamp_lng = |lng: f64| lng.clamp(-180.0, 180.0);
        let clamp_lat = |lat: f64| lat.clamp(-utils::MAX_LATITUDE, utils::MAX_LATITUDE);
        let (left_idx, top_idx) =
            utils::lng_lat_to_pixel(clamp_lng(left), clamp_lat(top), zoom as i16);
        let (mut right_idx, bottom_idx) =
            utils::lng_lat_to_pixel(clamp_lng(right), clamp_lat(bottom), zoom as i16);

        // NOTE: the map view reports a `right` that wrapped around when the
        // viewport crosses the antimeridian.
        if right_idx < left_idx {
            let n = 1_i64 << zoom;
            right_idx += n;
        }

        Ok(RenderArea {
            zoom,
            left_idx,
            top_idx: top_idx.min(bottom_idx),
            right_idx,
            bottom_idx: top_idx.max(bottom_idx),
        })
    }

    pub fn width_by_tile(&self) -> u32 {
        (self.right_idx - self.left_idx + 1) as u32
    }

    pub fn height_by_tile(&self) -> u32 {
        (self.bottom_idx - self.top_idx + 1) as u32
    }
}

pub struct MapRenderer {
    tile_renderer: TileRenderer,
    tile_store: Arc<TileStore>,
    max_render_tiles: u32,
    // last result, keyed by area and the tile store version it was drawn from
    current_render: Mutex<Option<(RenderArea, u64, RenderResult)>>,
}

impl MapRenderer {
    pub fn new(tile_store: Arc<TileStore>, config: &CoreConfig) -> Self {
        MapRenderer {
            tile_renderer: TileRenderer::new(config.tile_width_offset),
            tile_store,
            max_render_tiles: config.max_render_tiles,
            current_render: Mutex::new(None),
        }
    }

    fn render_area(&self, render_area: &RenderArea) -> Result<RenderResult> {
        let tile_size = self.tile_renderer.tile_width();
        let width_by_tile = render_area.width_by_tile();
        let height_by_tile = render_area.height_by_tile();
        let world_width = 1_i64 << render_area.zoom;

        let mut tiles = Vec::new();
        let mut any_covered = false;
        for x in 0..width_by_tile {
            for y in 0..height_by_tile {
                let view_x = (render_area.left_idx + x as i64).rem_euclid(world_width);
                let view_y = render_area.top_idx + y as i64;
                let (tile_pixmap, covered) = self.tile_renderer.render_pixmap(
                    &self.tile_store,
                    view_x,
                    view_y,
                    render_area.zoom as i16,
                )?;
                any_covered |= covered;
                tiles.push((x, y, tile_pixmap));
            }
        }

        let (overlay_left, overlay_top) =
            utils::tile_x_y_to_lng_lat(render_area.left_idx, render_area.top_idx, render_area.zoom);

        if !any_covered {
            return Ok(RenderResult {
                left: overlay_left,
                top: overlay_top,
                right: overlay_left,
                bottom: overlay_top,
                width: 0,
                height: 0,
                data: Vec::new(),
            });
        }

        let (width, height) = (tile_size * width_by_tile, tile_size * height_by_tile);
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| Error::InvalidCoordinate(format!("invalid overlay size {width}x{height}")))?;
        // tiles carry their own background, copy them as is
        let paint = PixmapPaint {
            blend_mode: BlendMode::Source,
            ..PixmapPaint::default()
        };
        for (x, y, tile_pixmap) in tiles {
            pixmap.draw_pixmap(
                (x * tile_size) as i32,
                (y * tile_size) as i32,
                tile_pixmap.as_ref(),
                &paint,
                Transform::identity(),
                None,
            );
        }

        let bytes = pixmap
            .encode_png()
            .map_err(|e| Error::Serialization(format!("failed to encode png: {e}")))?;

        let (overlay_right, overlay_bottom) = utils::tile_x_y_to_lng_lat(
            render_area.right_idx + 1,
            render_area.bottom_idx + 1,
            render_area.zoom,
        );

        Ok(RenderResult {
            left: overlay_left,
            top: overlay_top,
            right: overlay_right,
            bottom: overlay_bottom,
            width,
            height,
            data: bytes,
        })
    }

    pub fn render_map_overlay(
        &self,
        // map view area (coordinates are in lat or lng)
        zoom: f32,
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
    ) -> Result<RenderResult> {
        let render_area = RenderArea::from_viewport(zoom, left, top, right, bottom)?;
        if render_area.width_by_tile() > self.max_render_tiles
            || render_area.height_by_tile() > self.max_render_tiles
        {
            return Err(Error::InvalidCoordinate(format!(
                "viewport spans {}x{} tiles at zoom {}, at most {} per edge",
                render_area.width_by_tile(),
                render_area.height_by_tile(),
                render_area.zoom,
                self.max_render_tiles
            )));
        }

        // read before drawing, a concurrent update makes the next call redraw
        let version = self.tile_store.version();
        if let Some((area, cached_version, result)) = &*self.current_render.lock().unwrap() {
            if *area == render_area && *cached_version == version {
                return Ok(result.clone());
            }
        }

        let render_result = self.render_area(&render_area)?;
        *self.current_render.lock().unwrap() = Some((render_area, version, render_result.clone()));
        Ok(render_result)
    }

    pub fn reset(&self) {
        *self.current_render.lock().unwrap() = None;
    }
}
