use anyhow::Result;
use rusqlite::Connection;
use std::cmp::Ordering;
use std::path::Path;
use std::time::Duration;

use crate::config::CoreConfig;
use crate::journey_data;
use crate::tile_store::TileKey;
use crate::utils::db;

pub const TARGET_VERSION: i32 = 1;
pub const CACHE_DB_FILE_NAME: &str = "cache.db";

const LAYOUT_KEY: &str = "tile_layout";
// set together with a reset, cleared once coverage is derived again
const REBUILD_PENDING_KEY: &str = "rebuild_pending";

fn layout_of(config: &CoreConfig) -> String {
    format!("{}/{}", config.grid_zoom, config.bitmap_width_offset)
}

// The tile table is derived data, it is dropped whenever the version or the
// bitmap layout does not match and rebuilt from journeys. Returns whether a
// rebuild is needed, which stays true until `mark_rebuilt`.
fn open_db(conn: &mut Connection, config: &CoreConfig) -> Result<bool> {
    let tx = conn.transaction()?;
    let version = db::init_metadata_and_get_version(&tx)?;
    let layout = db::get_metadata(&tx, LAYOUT_KEY)?;
    let target_layout = layout_of(config);
    debug!(
        "current version = {}, target_version = {}, layout = {:?}, target_layout = {}",
        version, TARGET_VERSION, layout, target_layout
    );
    let reset = match version.cmp(&TARGET_VERSION) {
        Ordering::Greater => {
            bail!(
                "version too high: current version = {}, target_version = {}",
                version,
                TARGET_VERSION
            );
        }
        Ordering::Less => true,
        Ordering::Equal => layout.as_deref() != Some(target_layout.as_str()),
    };
    if reset {
        info!("resetting tile cache, layout = {:?}", layout);
        tx.execute("DROP TABLE IF EXISTS `tile`;", ())?;
        db::set_version_in_metadata(&tx, TARGET_VERSION)?;
        db::set_metadata(&tx, LAYOUT_KEY, &target_layout)?;
        db::set_metadata(&tx, REBUILD_PENDING_KEY, "true")?;
    }
    let rebuild_pending =
        db::get_metadata(&tx, REBUILD_PENDING_KEY)?.as_deref() == Some("true");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS `tile` (
            `x` INTEGER NOT NULL,
            `y` INTEGER NOT NULL,
            `data` BLOB NOT NULL,
            PRIMARY KEY(`x`, `y`)
        );",
        (),
    )?;
    tx.commit()?;
    Ok(rebuild_pending)
}

pub struct CacheDb {
    conn: Connection,
    bitmap_size: usize,
    zstd_compress_level: i32,
    needs_rebuild: bool,
}

impl CacheDb {
    pub fn open(cache_dir: &str, config: &CoreConfig) -> Result<CacheDb> {
        debug!("opening cache db in {}", cache_dir);
        let mut conn = Connection::open(Path::new(cache_dir).join(CACHE_DB_FILE_NAME))?;
        conn.busy_timeout(Duration::from_millis(config.db_busy_timeout_ms))?;
        Self::with_conn(conn, config)
    }

    /// A cache that lives only as long as the value, used for scratch
    /// coverage of a single journey.
    pub fn open_in_memory(config: &CoreConfig) -> Result<CacheDb> {
        Self::with_conn(Connection::open_in_memory()?, config)
    }

    fn with_conn(mut conn: Connection, config: &CoreConfig) -> Result<CacheDb> {
        let needs_rebuild = open_db(&mut conn, config)?;
        Ok(CacheDb {
            conn,
            bitmap_size: config.bitmap_size(),
            zstd_compress_level: config.zstd_compress_level,
            needs_rebuild,
        })
    }

    /// Whether the stored coverage is gone, or was being derived again when
    /// the last process stopped.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn mark_rebuilt(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        db::set_metadata(&tx, REBUILD_PENDING_KEY, "false")?;
        tx.commit()?;
        self.needs_rebuild = false;
        Ok(())
    }

    /// Loads every readable tile. Rows that fail to decode are skipped, the
    /// caller sees them as uncovered.
    pub fn load_all_tiles(&self) -> Result<Vec<(TileKey, Vec<u8>)>> {
        let mut query = self.conn.prepare("SELECT x, y, data FROM `tile`;")?;
        let mut rows = query.query(())?;
        let mut tiles = Vec::new();
        while let Some(row) = rows.next()? {
            let x: i64 = row.get(0)?;
            let y: i64 = row.get(1)?;
            let key = match (u32::try_from(x), u32::try_from(y)) {
                (Ok(x), Ok(y)) => TileKey { x, y },
                _ => {
                    warn!("skipping tile with invalid key ({}, {})", x, y);
                    continue;
                }
            };
            let blob = row.get_ref(2)?.as_blob()?;
            match journey_data::deserialize_tile_bitmap(blob, self.bitmap_size) {
                Ok(data) => tiles.push((key, data)),
                Err(e) => warn!("skipping corrupted tile {:?}: {}", key, e),
            }
        }
        Ok(tiles)
    }

    /// Writes all given tiles in one transaction.
    pub fn save_tiles<'a, I>(&mut self, tiles: I) -> Result<()>
    where
        I: IntoIterator<Item = (TileKey, &'a [u8])>,
    {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO `tile` (x, y, data) VALUES (?1, ?2, ?3);",
            )?;
            let mut buf = Vec::new();
            for (key, data) in tiles {
                buf.clear();
                journey_data::serialize_tile_bitmap(data, &mut buf, self.zstd_compress_level)?;
                stmt.execute((key.x, key.y, &buf))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM `tile`;", ())?;
        Ok(())
    }

    #[cfg(test)]
    fn raw_conn(&self) -> &Connection {
        &self.conn
    }
}
