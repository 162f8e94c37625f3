#![allow(dead_code)]

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempdir::TempDir;
use trailmap_core::gps_processor::LocationSample;

pub struct Dirs {
    pub temp: String,
    pub doc: String,
    pub support: String,
    pub cache: String,
}

/// The four storage roots inside `temp_dir`, created if missing.
pub fn dirs(temp_dir: &TempDir) -> Dirs {
    let sub_folder = |sub| {
        let path = temp_dir.path().join(sub);
        fs::create_dir_all(&path).unwrap();
        path.into_os_string().into_string().unwrap()
    };
    Dirs {
        temp: sub_folder("temp/"),
        doc: sub_folder("doc/"),
        support: sub_folder("support/"),
        cache: sub_folder("cache/"),
    }
}

pub fn sample(latitude: f64, longitude: f64, timestamp_ms: i64) -> LocationSample {
    LocationSample {
        latitude,
        longitude,
        timestamp_ms,
        accuracy: 5.0,
        altitude: Some(10.0),
        speed: Some(1.2),
    }
}

/// A track starting at the Bund in Shanghai, one sample per second, heading
/// north-east by ~15 m per sample.
pub fn shanghai_walk(n: usize, start_timestamp_ms: i64) -> Vec<LocationSample> {
    (0..n)
        .map(|i| {
            sample(
                31.2304 + i as f64 * 0.0001,
                121.4737 + i as f64 * 0.0001,
                start_timestamp_ms + i as i64 * 1000,
            )
        })
        .collect()
}

pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn verify_image(name: &str, image: &[u8]) {
    let hash_table_path = "tests/image_hashes.lock";
    let mut hash_table: BTreeMap<String, String> = if Path::new(hash_table_path).exists() {
        let hash_table_content =
            fs::read_to_string(hash_table_path).expect("Failed to read hash table file");
        serde_json::from_str(&hash_table_content).unwrap_or_else(|_| BTreeMap::new())
    } else {
        BTreeMap::new()
    };

    let current_hash = sha256(image);

    if let Some(stored_hash) = hash_table.get(name) {
        assert_eq!(
            &current_hash, stored_hash,
            "Image hash mismatch for {name}. Expected: {stored_hash}, Got: {current_hash}. If you have updated the image, please delete the image_hashes.lock file and re-run the tests."
        );
        println!("Verified image hash for: {name}");
    } else {
        hash_table.insert(name.to_string(), current_hash);
        let hash_table_content =
            serde_json::to_string_pretty(&hash_table).expect("Failed to serialize hash table");
        fs::write(hash_table_path, hash_table_content).expect("Failed to write hash table file");
        println!("Added new hash entry for: {name}");
    }

    fs::create_dir_all("tests/for_inspection").expect("Failed to create inspection dir");
    let output_path = format!("tests/for_inspection/{name}.png");
    fs::write(&output_path, image).expect("Failed to write to file");
    println!("Saved image file: {output_path}");
}
