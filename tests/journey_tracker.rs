pub mod test_utils;

use rand::rng;
use rand::seq::SliceRandom;
use tempdir::TempDir;
use trailmap_core::config::CoreConfig;
use trailmap_core::engine::Engine;
use trailmap_core::gps_processor::ProcessResult;
use trailmap_core::tile_store::TileKey;
use trailmap_core::utils;
use trailmap_core::Error;

fn open_engine(dirs: &test_utils::Dirs, config: CoreConfig) -> Engine {
    Engine::open(
        dirs.temp.clone(),
        dirs.doc.clone(),
        dirs.support.clone(),
        dirs.cache.clone(),
        config,
    )
    .unwrap()
}

fn covered_bits(engine: &Engine) -> u32 {
    let tile_store = engine.storage().tile_store();
    tile_store
        .keys()
        .iter()
        .map(|key| {
            tile_store
                .snapshot(key)
                .unwrap()
                .iter()
                .map(|b| b.count_ones())
                .sum::<u32>()
        })
        .sum()
}

#[test]
fn single_sample_covers_its_cell() {
    let temp_dir = TempDir::new("journey_tracker-single").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let engine = open_engine(&dirs, CoreConfig::default());

    assert!(!engine.has_ongoing_journey().unwrap());
    assert!(engine
        .on_location_update(test_utils::sample(37.0, -122.0, 1000))
        .unwrap());
    assert!(engine.has_ongoing_journey().unwrap());

    let (x, y) = utils::lng_lat_to_pixel(-122.0, 37.0, 22);
    let key = TileKey {
        x: (x >> 6) as u32,
        y: (y >> 6) as u32,
    };
    let tile = engine.storage().tile_store().get_tile(&key).unwrap();
    assert!(tile
        .read()
        .unwrap()
        .is_visited((x & 63) as u32, (y & 63) as u32));
    assert_eq!(covered_bits(&engine), 1);
}

#[test]
fn invalid_coordinates_are_rejected() {
    let temp_dir = TempDir::new("journey_tracker-invalid").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let engine = open_engine(&dirs, CoreConfig::default());

    for (lat, lng) in [(90.0, 0.0), (0.0, 180.5), (f64::NAN, 0.0), (0.0, f64::INFINITY)] {
        assert!(matches!(
            engine.on_location_update(test_utils::sample(lat, lng, 1000)),
            Err(Error::InvalidCoordinate(_))
        ));
    }
    assert!(!engine.has_ongoing_journey().unwrap());
    assert_eq!(engine.storage().tile_store().len(), 0);
}

#[test]
fn ignored_samples_are_kept_without_coverage() {
    let temp_dir = TempDir::new("journey_tracker-ignored").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let engine = open_engine(&dirs, CoreConfig::default());

    let mut inaccurate = test_utils::sample(37.0, -122.0, 1000);
    inaccurate.accuracy = 100.0;
    assert!(!engine.on_location_update(inaccurate).unwrap());
    assert_eq!(covered_bits(&engine), 0);
    assert!(engine.has_ongoing_journey().unwrap());

    let id = engine.finalize_ongoing_journey().unwrap().unwrap();
    let journey = engine.get_journey(&id).unwrap().unwrap();
    assert_eq!(journey.points.len(), 1);
    assert_eq!(journey.points[0].process_result, ProcessResult::Ignore);
}

#[test]
fn coverage_is_monotonic() {
    let temp_dir = TempDir::new("journey_tracker-monotonic").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let engine = open_engine(&dirs, CoreConfig::default());

    let mut previous = 0;
    for sample in test_utils::shanghai_walk(200, 1_695_150_531_000) {
        engine.on_location_update(sample).unwrap();
        let covered = covered_bits(&engine);
        assert!(covered >= previous);
        previous = covered;
    }
    // consecutive samples are joined into one connected line
    assert!(previous > 100);

    engine.finalize_ongoing_journey().unwrap();
    assert_eq!(covered_bits(&engine), previous);
}

#[test]
fn batch_is_sorted() {
    let track = test_utils::shanghai_walk(300, 1_695_150_531_000);

    let temp_dir = TempDir::new("journey_tracker-batch-ordered").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let ordered = open_engine(&dirs, CoreConfig::default());
    for sample in track.clone() {
        ordered.on_location_update(sample).unwrap();
    }

    let temp_dir = TempDir::new("journey_tracker-batch-shuffled").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let shuffled = open_engine(&dirs, CoreConfig::default());
    let mut batch = track;
    batch.shuffle(&mut rng());
    shuffled.on_location_updates(batch).unwrap();

    let tiles = |engine: &Engine| {
        let tile_store = engine.storage().tile_store();
        tile_store
            .keys()
            .into_iter()
            .map(|key| (key, tile_store.snapshot(&key).unwrap()))
            .collect::<Vec<_>>()
    };
    assert_eq!(tiles(&ordered), tiles(&shuffled));
}

#[test]
fn finalize() {
    let temp_dir = TempDir::new("journey_tracker-finalize").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let engine = open_engine(&dirs, CoreConfig::default());

    // nothing to seal
    assert_eq!(engine.finalize_ongoing_journey().unwrap(), None);
    assert!(engine.list_all_journeys().unwrap().is_empty());

    let first = test_utils::shanghai_walk(10, 1_000_000);
    engine.on_location_updates(first.clone()).unwrap();
    let first_id = engine.finalize_ongoing_journey().unwrap().unwrap();
    assert!(!engine.has_ongoing_journey().unwrap());

    let second = test_utils::shanghai_walk(5, 2_000_000);
    engine.on_location_updates(second).unwrap();
    let second_id = engine.finalize_ongoing_journey().unwrap().unwrap();
    assert_ne!(first_id, second_id);

    // newest first
    let journeys = engine.list_all_journeys().unwrap();
    assert_eq!(
        journeys.iter().map(|h| h.id.clone()).collect::<Vec<_>>(),
        vec![second_id, first_id.clone()]
    );
    assert_eq!(journeys[1].sample_count, 10);
    assert_eq!(journeys[1].start.timestamp_millis(), 1_000_000);
    assert_eq!(journeys[1].end.timestamp_millis(), 1_009_000);
    assert_eq!(journeys[1].revision.len(), 8);
    assert_eq!(
        journeys[1].journey_date,
        journeys[1].start.with_timezone(&chrono::Local).date_naive()
    );

    let journey = engine.get_journey(&first_id).unwrap().unwrap();
    assert_eq!(journey.samples().cloned().collect::<Vec<_>>(), first);
    assert_eq!(journey.points[0].process_result, ProcessResult::NewSegment);
    assert!(journey.points[1..]
        .iter()
        .all(|p| p.process_result == ProcessResult::Append));

    assert!(engine.get_journey("missing").unwrap().is_none());
}

#[test]
fn restart_keeps_ongoing_journey() {
    let temp_dir = TempDir::new("journey_tracker-restart").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let track = test_utils::shanghai_walk(20, 1_695_150_531_000);
    {
        let engine = open_engine(&dirs, CoreConfig::default());
        engine.on_location_updates(track[..10].to_vec()).unwrap();
    }
    let engine = open_engine(&dirs, CoreConfig::default());
    assert!(engine.has_ongoing_journey().unwrap());
    engine.on_location_updates(track[10..].to_vec()).unwrap();
    let id = engine.finalize_ongoing_journey().unwrap().unwrap();
    let journey = engine.get_journey(&id).unwrap().unwrap();
    assert_eq!(journey.points.len(), 20);
    // the line continues across the restart
    assert_eq!(journey.points[10].process_result, ProcessResult::Append);
}

#[test]
fn layout_change_rebuilds_coverage() {
    let temp_dir = TempDir::new("journey_tracker-rebuild").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let track = test_utils::shanghai_walk(50, 1_695_150_531_000);

    let expected = {
        let engine = open_engine(&dirs, CoreConfig::default());
        engine.on_location_updates(track[..30].to_vec()).unwrap();
        engine.finalize_ongoing_journey().unwrap().unwrap();
        engine.on_location_updates(track[30..].to_vec()).unwrap();
        covered_bits(&engine)
    };

    // same bit resolution, different tile layout
    let config = CoreConfig {
        grid_zoom: 17,
        bitmap_width_offset: 5,
        ..CoreConfig::default()
    };
    let engine = open_engine(&dirs, config);
    assert!(!engine.storage().tile_store().needs_rebuild());
    let rebuilt = covered_bits(&engine);
    assert_eq!(rebuilt, expected);
    let tile_store = engine.storage().tile_store();
    let key = tile_store.keys()[0];
    assert_eq!(tile_store.snapshot(&key).unwrap().len(), 128);
}

#[test]
fn auto_finalize() {
    let temp_dir = TempDir::new("journey_tracker-auto_finalize").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let engine = open_engine(&dirs, CoreConfig::default());

    let start = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    engine
        .on_location_updates(test_utils::shanghai_walk(10, start.timestamp_millis()))
        .unwrap();
    assert_eq!(
        engine
            .try_auto_finalize_journey(start + chrono::Duration::minutes(1))
            .unwrap(),
        None
    );
    assert!(engine
        .try_auto_finalize_journey(start + chrono::Duration::hours(8))
        .unwrap()
        .is_some());
    assert!(!engine.has_ongoing_journey().unwrap());
}

#[test]
fn out_of_range_timestamp_is_rejected() {
    let temp_dir = TempDir::new("journey_tracker-timestamp").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let engine = open_engine(&dirs, CoreConfig::default());

    engine
        .on_location_update(test_utils::sample(37.0, -122.0, -1_000_000))
        .unwrap();
    for timestamp_ms in [i64::MAX, i64::MIN] {
        assert!(matches!(
            engine.on_location_update(test_utils::sample(37.0, -122.0, timestamp_ms)),
            Err(Error::InvalidCoordinate(_))
        ));
    }
    // the tracker is still usable and the journey can be sealed
    engine
        .on_location_update(test_utils::sample(37.0, -122.0, 2000))
        .unwrap();
    let id = engine.finalize_ongoing_journey().unwrap().unwrap();
    let journey = engine.get_journey(&id).unwrap().unwrap();
    assert_eq!(journey.points.len(), 2);
    assert!(!engine.has_ongoing_journey().unwrap());
}

#[test]
fn unreadable_journey_is_skipped_on_rebuild() {
    let temp_dir = TempDir::new("journey_tracker-rebuild_corrupted").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let broken = test_utils::shanghai_walk(30, 1_695_150_531_000);
    let kept: Vec<_> = test_utils::shanghai_walk(30, 1_695_160_531_000)
        .into_iter()
        .map(|mut sample| {
            sample.latitude -= 0.01;
            sample
        })
        .collect();

    let expected = {
        let temp_dir = TempDir::new("journey_tracker-rebuild_corrupted-expected").unwrap();
        let engine = open_engine(&test_utils::dirs(&temp_dir), CoreConfig::default());
        engine.on_location_updates(kept.clone()).unwrap();
        covered_bits(&engine)
    };

    let broken_id = {
        let engine = open_engine(&dirs, CoreConfig::default());
        engine.on_location_updates(broken).unwrap();
        let broken_id = engine.finalize_ongoing_journey().unwrap().unwrap();
        engine.on_location_updates(kept).unwrap();
        engine.finalize_ongoing_journey().unwrap().unwrap();
        assert!(covered_bits(&engine) > expected);
        broken_id
    };
    let conn = rusqlite::Connection::open(std::path::Path::new(&dirs.support).join("main.db"))
        .unwrap();
    conn.execute(
        "UPDATE journey SET data = ?1 WHERE id = ?2;",
        (&b"J0garbage"[..], &broken_id),
    )
    .unwrap();
    drop(conn);

    let config = CoreConfig {
        grid_zoom: 17,
        bitmap_width_offset: 5,
        ..CoreConfig::default()
    };
    let engine = open_engine(&dirs, config.clone());
    assert!(!engine.storage().tile_store().needs_rebuild());
    assert_eq!(covered_bits(&engine), expected);
    assert!(matches!(
        engine.get_journey(&broken_id),
        Err(Error::Serialization(_))
    ));
    drop(engine);

    let engine = open_engine(&dirs, config);
    assert!(!engine.storage().tile_store().needs_rebuild());
    assert_eq!(covered_bits(&engine), expected);
}

#[test]
fn concurrent_updates_and_finalize() {
    let temp_dir = TempDir::new("journey_tracker-concurrent").unwrap();
    let dirs = test_utils::dirs(&temp_dir);
    let engine = open_engine(&dirs, CoreConfig::default());

    let threads = 4;
    let per_thread = 50;
    std::thread::scope(|scope| {
        for t in 0..threads {
            let engine = &engine;
            scope.spawn(move || {
                let start = 1_695_150_531_000 + t as i64 * 10_000_000;
                for sample in test_utils::shanghai_walk(per_thread, start) {
                    engine.on_location_update(sample).unwrap();
                }
            });
        }
        for _ in 0..20 {
            engine.finalize_ongoing_journey().unwrap();
            std::thread::yield_now();
        }
    });
    engine.finalize_ongoing_journey().unwrap();

    assert!(!engine.has_ongoing_journey().unwrap());
    let sample_count: u64 = engine
        .list_all_journeys()
        .unwrap()
        .iter()
        .map(|header| header.sample_count)
        .sum();
    assert_eq!(sample_count, (threads * per_thread) as u64);
}
