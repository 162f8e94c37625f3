use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "core_config.json";

/// Process-wide layout and tuning knobs, read from `core_config.json` in the
/// support dir. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Zoom of the slippy-map grid a coverage tile is aligned to.
    pub grid_zoom: i16,
    /// A tile holds a `2^n * 2^n` coverage bitmap.
    pub bitmap_width_offset: i16,
    /// A rendered view tile is `2^n` pixels wide.
    pub tile_width_offset: i16,
    pub zstd_compress_level: i32,
    /// Max number of view tiles per edge in a single render.
    pub max_render_tiles: u32,
    pub accuracy_threshold: f32,
    pub segment_gap_ms: i64,
    pub db_busy_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            grid_zoom: 16,
            bitmap_width_offset: 6,
            tile_width_offset: 7,
            // 3 is the zstd default
            zstd_compress_level: 3,
            max_render_tiles: 16,
            accuracy_threshold: 12.0,
            segment_gap_ms: 5 * 1000,
            db_busy_timeout_ms: 2000,
        }
    }
}

impl CoreConfig {
    pub fn bitmap_width(&self) -> u32 {
        1 << self.bitmap_width_offset
    }

    pub fn bitmap_size(&self) -> usize {
        let width = self.bitmap_width() as usize;
        width * width / 8
    }

    pub fn tile_width(&self) -> u32 {
        1 << self.tile_width_offset
    }

    /// Zoom level at which one slippy-map pixel is one coverage bit.
    pub fn pixel_zoom(&self) -> i16 {
        self.grid_zoom + self.bitmap_width_offset
    }

    pub fn validate(&self) -> Result<()> {
        if !(3..=8).contains(&self.bitmap_width_offset) {
            return Err(Error::InvalidConfig(format!(
                "bitmap_width_offset must be 3-8, got {}",
                self.bitmap_width_offset
            )));
        }
        if !(4..=10).contains(&self.tile_width_offset) {
            return Err(Error::InvalidConfig(format!(
                "tile_width_offset must be 4-10, got {}",
                self.tile_width_offset
            )));
        }
        if self.grid_zoom < 0 || self.pixel_zoom() > 30 {
            return Err(Error::InvalidConfig(format!(
                "grid_zoom {} with bitmap_width_offset {} is out of range",
                self.grid_zoom, self.bitmap_width_offset
            )));
        }
        if !(1..=22).contains(&self.zstd_compress_level) {
            return Err(Error::InvalidConfig(format!(
                "zstd_compress_level must be 1-22, got {}",
                self.zstd_compress_level
            )));
        }
        if self.max_render_tiles == 0 {
            return Err(Error::InvalidConfig(
                "max_render_tiles must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CoreConfig = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `core_config.json` from `support_dir`, falling back to defaults
    /// when the file does not exist.
    pub fn load_or_default(support_dir: &str) -> Result<Self> {
        let path = Path::new(support_dir).join(CONFIG_FILE_NAME);
        if path.exists() {
            info!("loading config from {}", path.display());
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoreConfig;

    #[test]
    fn default_layout() {
        let config = CoreConfig::default();
        assert_eq!(config.bitmap_width(), 64);
        assert_eq!(config.bitmap_size(), 512);
        assert_eq!(config.tile_width(), 128);
        assert_eq!(config.pixel_zoom(), 22);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: CoreConfig = serde_json::from_str(r#"{"bitmap_width_offset": 3}"#).unwrap();
        assert_eq!(config.bitmap_size(), 8);
        assert_eq!(config.grid_zoom, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_layout() {
        let config = CoreConfig {
            grid_zoom: 28,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
        let config = CoreConfig {
            tile_width_offset: 12,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
