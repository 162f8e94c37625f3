use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::cache_db::CacheDb;
use crate::config::CoreConfig;
use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub x: u32,
    pub y: u32,
}

/// A square coverage bitmap for one grid cell. Bit `(x, y)` is stored in byte
/// `x / 8 + y * width / 8`, most significant bit first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    key: TileKey,
    width_offset: i16,
    data: Box<[u8]>,
}

impl Tile {
    pub fn new(key: TileKey, width_offset: i16) -> Self {
        let width = 1_usize << width_offset;
        Self {
            key,
            width_offset,
            data: vec![0; width * width / 8].into_boxed_slice(),
        }
    }

    fn with_data(key: TileKey, width_offset: i16, data: Vec<u8>) -> Self {
        Self {
            key,
            width_offset,
            data: data.into_boxed_slice(),
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn width(&self) -> u32 {
        1 << self.width_offset
    }

    fn locate(&self, x: u32, y: u32) -> (usize, u8) {
        let bit_offset = 7 - (x % 8);
        let i = (x / 8) as usize;
        let j = y as usize;
        (i + j * (self.width() / 8) as usize, 1 << bit_offset)
    }

    pub fn is_visited(&self, x: u32, y: u32) -> bool {
        let (i, mask) = self.locate(x, y);
        self.data[i] & mask != 0
    }

    /// Returns whether the bit was not set before.
    fn set_point(&mut self, x: u32, y: u32) -> bool {
        let (i, mask) = self.locate(x, y);
        let newly_set = self.data[i] & mask == 0;
        self.data[i] |= mask;
        newly_set
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

pub type TileHandle = Arc<RwLock<Tile>>;

pub struct TileStore {
    grid_zoom: i16,
    bitmap_width_offset: i16,
    tiles: RwLock<HashMap<TileKey, TileHandle>>,
    dirty: Mutex<HashSet<TileKey>>,
    version: AtomicU64,
    cache_db: Mutex<CacheDb>,
}

impl TileStore {
    pub fn open(cache_dir: &str, config: &CoreConfig) -> Result<Self> {
        Self::with_cache_db(CacheDb::open(cache_dir, config)?, config)
    }

    /// A store backed by an in-memory cache, nothing reaches the disk.
    pub fn in_memory(config: &CoreConfig) -> Result<Self> {
        Self::with_cache_db(CacheDb::open_in_memory(config)?, config)
    }

    fn with_cache_db(cache_db: CacheDb, config: &CoreConfig) -> Result<Self> {
        let needs_rebuild = cache_db.needs_rebuild();
        let tiles: HashMap<TileKey, TileHandle> = cache_db
            .load_all_tiles()?
            .into_iter()
            .map(|(key, data)| {
                let tile = Tile::with_data(key, config.bitmap_width_offset, data);
                (key, Arc::new(RwLock::new(tile)))
            })
            .collect();
        info!(
            "tile store opened with {} tiles, needs_rebuild = {}",
            tiles.len(),
            needs_rebuild
        );
        Ok(TileStore {
            grid_zoom: config.grid_zoom,
            bitmap_width_offset: config.bitmap_width_offset,
            tiles: RwLock::new(tiles),
            dirty: Mutex::new(HashSet::new()),
            version: AtomicU64::new(0),
            cache_db: Mutex::new(cache_db),
        })
    }

    pub fn grid_zoom(&self) -> i16 {
        self.grid_zoom
    }

    pub fn bitmap_width_offset(&self) -> i16 {
        self.bitmap_width_offset
    }

    /// Whether coverage must be derived again from journeys, see
    /// `mark_rebuilt`.
    pub fn needs_rebuild(&self) -> bool {
        self.cache_db.lock().unwrap().needs_rebuild()
    }

    /// Called once every journey has been replayed and flushed.
    pub fn mark_rebuilt(&self) -> Result<()> {
        self.cache_db.lock().unwrap().mark_rebuilt()?;
        Ok(())
    }

    fn grid_width(&self) -> u64 {
        1 << self.grid_zoom
    }

    pub fn get_or_create_tile(&self, grid_x: i64, grid_y: i64) -> Result<TileHandle> {
        let grid_width = self.grid_width() as i64;
        if !(0..grid_width).contains(&grid_x) || !(0..grid_width).contains(&grid_y) {
            return Err(Error::InvalidCoordinate(format!(
                "grid coordinate ({grid_x}, {grid_y}) is outside of zoom {}",
                self.grid_zoom
            )));
        }
        let key = TileKey {
            x: grid_x as u32,
            y: grid_y as u32,
        };
        if let Some(tile) = self.tiles.read().unwrap().get(&key) {
            return Ok(tile.clone());
        }
        let mut tiles = self.tiles.write().unwrap();
        let tile = tiles
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(Tile::new(key, self.bitmap_width_offset))));
        Ok(tile.clone())
    }

    pub fn get_tile(&self, key: &TileKey) -> Option<TileHandle> {
        self.tiles.read().unwrap().get(key).cloned()
    }

    pub fn mark_covered(&self, tile: &TileHandle, local_x: u32, local_y: u32) -> Result<bool> {
        let width = 1_u32 << self.bitmap_width_offset;
        if local_x >= width || local_y >= width {
            return Err(Error::InvalidCoordinate(format!(
                "local coordinate ({local_x}, {local_y}) is outside of a {width} wide tile"
            )));
        }
        let mut tile = tile.write().unwrap();
        let newly_set = tile.set_point(local_x, local_y);
        if newly_set {
            self.dirty.lock().unwrap().insert(tile.key());
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        Ok(newly_set)
    }

    /// Copy of the bitmap of a tile, taken under its read lock.
    pub fn snapshot(&self, key: &TileKey) -> Option<Vec<u8>> {
        self.get_tile(key)
            .map(|tile| tile.read().unwrap().data().to_vec())
    }

    pub fn keys(&self) -> Vec<TileKey> {
        self.tiles.read().unwrap().keys().copied().sorted().collect()
    }

    pub fn keys_in(&self, x_range: Range<u32>, y_range: Range<u32>) -> Vec<TileKey> {
        self.tiles
            .read()
            .unwrap()
            .keys()
            .filter(|key| x_range.contains(&key.x) && y_range.contains(&key.y))
            .copied()
            .sorted()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tiles.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped every time a bit is newly set.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().unwrap().len()
    }

    pub fn flush(&self) -> Result<()> {
        let dirty: Vec<TileKey> = {
            let mut dirty = self.dirty.lock().unwrap();
            dirty.drain().sorted().collect()
        };
        if dirty.is_empty() {
            return Ok(());
        }
        let snapshots: Vec<(TileKey, Vec<u8>)> = dirty
            .iter()
            .filter_map(|key| self.snapshot(key).map(|data| (*key, data)))
            .collect();
        let result = self
            .cache_db
            .lock()
            .unwrap()
            .save_tiles(snapshots.iter().map(|(key, data)| (*key, data.as_slice())));
        match result {
            Ok(()) => {
                debug!("flushed {} tiles", snapshots.len());
                Ok(())
            }
            Err(e) => {
                warn!("failed to flush {} tiles: {:#}", dirty.len(), e);
                self.dirty.lock().unwrap().extend(dirty);
                Err(e.into())
            }
        }
    }

    /// Drops all coverage, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        let mut tiles = self.tiles.write().unwrap();
        self.cache_db.lock().unwrap().clear()?;
        tiles.clear();
        self.dirty.lock().unwrap().clear();
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
