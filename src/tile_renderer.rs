use tiny_skia::{Pixmap, PremultipliedColorU8};

use crate::error::{Error, Result};
use crate::tile_store::TileStore;

/// Renders one slippy-map view tile from the coverage in a `TileStore`.
///
/// A view tile at `zoom` is `2^tile_width_offset` pixels wide, so its pixels
/// live at zoom `zoom + tile_width_offset`. Coverage bits live at
/// `grid_zoom + bitmap_width_offset`. When the view is more zoomed in than the
/// bits, a bit becomes a square of pixels. When it is less zoomed in, several
/// bits fall into one pixel and the pixel is painted if any of them is set
/// (max-pooling), so thin tracks stay visible when zooming out.
pub struct TileRenderer {
    tile_width_offset: i16,
    bg_color_prgba: PremultipliedColorU8,
    fg_color_prgba: PremultipliedColorU8,
}

impl TileRenderer {
    pub fn new(tile_width_offset: i16) -> Self {
        let opacity = 0.5;
        let alpha = (opacity * 255.0) as u8;
        // black with any alpha is always a valid premultiplied color
        let bg_color_prgba = PremultipliedColorU8::from_rgba(0, 0, 0, alpha).unwrap();
        Self {
            tile_width_offset,
            bg_color_prgba,
            fg_color_prgba: PremultipliedColorU8::TRANSPARENT,
        }
    }

    pub fn bg_color(&self) -> PremultipliedColorU8 {
        self.bg_color_prgba
    }

    pub fn tile_width(&self) -> u32 {
        1 << self.tile_width_offset
    }

    /// Returns the pixmap and whether any covered bit landed in it. `view_x`
    /// must already be wrapped into `0..2^zoom`.
    pub fn render_pixmap(
        &self,
        tile_store: &TileStore,
        view_x: i64,
        view_y: i64,
        zoom: i16,
    ) -> Result<(Pixmap, bool)> {
        let width = self.tile_width();
        let mut pixmap = Pixmap::new(width, width)
            .ok_or_else(|| Error::InvalidConfig(format!("invalid tile width {width}")))?;
        let pixels = pixmap.pixels_mut();

        // draw background
        for p in pixels.iter_mut() {
            *p = self.bg_color_prgba;
        }

        let grid_zoom = tile_store.grid_zoom();
        let bitmap_width_offset = tile_store.bitmap_width_offset();
        let (grid_x_range, grid_y_range) = if zoom >= grid_zoom {
            // the view is inside a single grid tile
            let shift = zoom - grid_zoom;
            let (x, y) = ((view_x >> shift) as u32, (view_y >> shift) as u32);
            (x..x + 1, y..y + 1)
        } else {
            let shift = grid_zoom - zoom;
            (
                (view_x << shift) as u32..((view_x + 1) << shift) as u32,
                (view_y << shift) as u32..((view_y + 1) << shift) as u32,
            )
        };

        let view_pixel_zoom = zoom + self.tile_width_offset;
        let bit_zoom = grid_zoom + bitmap_width_offset;
        let (view_left, view_top) = (
            view_x << self.tile_width_offset,
            view_y << self.tile_width_offset,
        );
        let bytes_per_row = (1_usize << bitmap_width_offset) / 8;
        let mut any_covered = false;

        for key in tile_store.keys_in(grid_x_range, grid_y_range) {
            // a consistent copy, the tile may be written to while we draw
            let data = match tile_store.snapshot(&key) {
                Some(data) => data,
                None => continue,
            };
            let tile_left = (key.x as i64) << bitmap_width_offset;
            let tile_top = (key.y as i64) << bitmap_width_offset;
            for (i, byte) in data.iter().enumerate() {
                if *byte == 0 {
                    continue;
                }
                for bit in 0..8 {
                    if byte & (0x80 >> bit) == 0 {
                        continue;
                    }
                    let bit_x = tile_left + ((i % bytes_per_row) * 8 + bit) as i64;
                    let bit_y = tile_top + (i / bytes_per_row) as i64;
                    let (x, y, size) = if view_pixel_zoom >= bit_zoom {
                        let s = view_pixel_zoom - bit_zoom;
                        (bit_x << s, bit_y << s, 1_i64 << s)
                    } else {
                        let s = bit_zoom - view_pixel_zoom;
                        (bit_x >> s, bit_y >> s, 1)
                    };
                    if self.draw_rect(
                        pixels,
                        x - view_left,
                        y - view_top,
                        size,
                        size,
                    ) {
                        any_covered = true;
                    }
                }
            }
        }
        Ok((pixmap, any_covered))
    }

    fn draw_pixel(&self, pixels: &mut [PremultipliedColorU8], x: i64, y: i64) {
        // pixels are stored row by row without padding
        let index = x + (y << self.tile_width_offset);
        pixels[index as usize] = self.fg_color_prgba;
    }

    // Clipped to the tile, returns whether anything was drawn.
    fn draw_rect(
        &self,
        pixels: &mut [PremultipliedColorU8],
        x: i64,
        y: i64,
        w: i64,
        h: i64,
    ) -> bool {
        let width = self.tile_width() as i64;
        let (x0, y0) = (x.max(0), y.max(0));
        let (x1, y1) = ((x + w).min(width), (y + h).min(width));
        if x0 >= x1 || y0 >= y1 {
            return false;
        }
        for i in x0..x1 {
            for j in y0..y1 {
                self.draw_pixel(pixels, i, j);
            }
        }
        true
    }
}
