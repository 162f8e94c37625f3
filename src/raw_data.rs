use anyhow::Result;
use chrono::Utc;
use itertools::Itertools;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::gps_processor::{LocationSample, ProcessResult};

pub const RAW_DATA_DIR_NAME: &str = "raw_data";
pub const CSV_HEADER: &str = "timestamp_ms,latitude,longitude,accuracy,altitude,speed,process_result";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawDataFile {
    pub name: String,
    pub path: String,
}

pub fn raw_data_dir(support_dir: &str) -> PathBuf {
    Path::new(support_dir).join(RAW_DATA_DIR_NAME)
}

/// `gps-<unix_sec>-<seq>.csv` -> `(unix_sec, seq)`
pub fn parse_file_name(name: &str) -> Option<(i64, u32)> {
    let stem = name.strip_prefix("gps-")?.strip_suffix(".csv")?;
    let (sec, seq) = stem.split_once('-')?;
    Some((sec.parse().ok()?, seq.parse().ok()?))
}

/* Optional, off by default: a verbatim copy of every GPS sample with the
   full timestamp. It is meant for advanced users or debugging. Data goes into
   a simple csv file that is created on the first sample and closed when a
   journey is finalized or the recorder is dropped.
*/
pub struct RawDataRecorder {
    dir: PathBuf,
    file: Option<BufWriter<File>>,
}

impl RawDataRecorder {
    pub fn init(support_dir: &str) -> Result<RawDataRecorder> {
        let dir = raw_data_dir(support_dir);
        std::fs::create_dir_all(&dir)?;
        Ok(RawDataRecorder { dir, file: None })
    }

    fn create_file(&self) -> Result<BufWriter<File>> {
        let timestamp_sec = Utc::now().timestamp();
        let mut i = 0;
        let filename = loop {
            let filename = self.dir.join(format!("gps-{timestamp_sec}-{i}.csv"));
            if std::fs::metadata(&filename).is_err() {
                break filename;
            }
            i += 1;
        };
        debug!("[raw_data] new file {}", filename.display());
        let mut file = BufWriter::new(File::create(filename)?);
        writeln!(file, "{CSV_HEADER}")?;
        Ok(file)
    }

    pub fn record(&mut self, sample: &LocationSample, process_result: ProcessResult) -> Result<()> {
        let file = match self.file.take() {
            Some(file) => file,
            None => self.create_file()?,
        };
        let file = self.file.insert(file);
        writeln!(
            file,
            "{},{},{},{},{},{},{}",
            sample.timestamp_ms,
            sample.latitude,
            sample.longitude,
            sample.accuracy,
            sample.altitude.map(|x| x.to_string()).unwrap_or_default(),
            sample.speed.map(|x| x.to_string()).unwrap_or_default(),
            process_result.to_int()
        )?;
        // a crash should lose at most the sample being written
        file.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(ref mut file) = self.file {
            file.flush()?;
        }
        Ok(())
    }

    /// Closes the current file, the next sample opens a new one.
    pub fn rotate(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

pub fn list_all_raw_data(support_dir: &str) -> Result<Vec<RawDataFile>> {
    let dir = raw_data_dir(support_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut result = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        let key = match parse_file_name(&name) {
            Some(key) => key,
            None => continue,
        };
        let path = entry.path();
        if let Err(e) = File::open(&path) {
            warn!("[raw_data] skipping unreadable file {}: {}", name, e);
            continue;
        }
        if let Some(path) = path.to_str() {
            result.push((
                key,
                RawDataFile {
                    name,
                    path: path.to_owned(),
                },
            ));
        }
    }
    Ok(result
        .into_iter()
        .sorted_by_key(|(key, _)| *key)
        .map(|(_, file)| file)
        .collect())
}

pub fn delete_raw_data_file(support_dir: &str, name: &str) -> Result<()> {
    if name.contains('/') || name.contains('\\') || !name.ends_with(".csv") {
        bail!("invalid raw data file name: {}", name);
    }
    let path = raw_data_dir(support_dir).join(name);
    std::fs::remove_file(&path)?;
    info!("[raw_data] deleted {}", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_file_name;

    #[test]
    fn file_name() {
        assert_eq!(parse_file_name("gps-1700000000-2.csv"), Some((1700000000, 2)));
        assert_eq!(parse_file_name("gps-1700000000.csv"), None);
        assert_eq!(parse_file_name("gps-a-0.csv"), None);
        assert_eq!(parse_file_name("other.csv"), None);
    }
}
