use std::{
    path::Path,
    sync::{mpsc, LazyLock, Mutex},
};

use anyhow::Result;
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    {ContentLimit, FileRotate},
};
use log::Log;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

/// Host-side listeners that want a copy of every log line.
static LOG_LISTENERS: LazyLock<Mutex<Vec<mpsc::Sender<String>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

pub struct MainLogger {
    write_logger: Box<WriteLogger<FileRotate<AppendTimestamp>>>,
}

impl MainLogger {
    fn new(write_logger: Box<WriteLogger<FileRotate<AppendTimestamp>>>) -> Self {
        Self { write_logger }
    }
}

impl Log for MainLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.write_logger.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.write_logger.log(record);

        let mut listeners = LOG_LISTENERS.lock().unwrap();
        if listeners.is_empty() {
            return;
        }
        let message = format!(
            "{}:{} -- {}",
            record.level(),
            record.target(),
            record.args()
        );
        // receivers that went away are dropped
        listeners.retain(|tx| tx.send(message.clone()).is_ok());
    }

    fn flush(&self) {
        self.write_logger.flush()
    }
}

/// Rolling log files under `cache_dir/logs/`. Fails if a logger is already
/// installed in this process.
pub fn init(cache_dir: &str) -> Result<()> {
    let path = Path::new(cache_dir).join("logs/main.log");
    let log = FileRotate::new(
        path,
        AppendTimestamp::default(FileLimit::MaxFiles(3)),
        ContentLimit::Lines(1000),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let write_logger = WriteLogger::new(LevelFilter::Info, config, log);
    let main_logger = MainLogger::new(write_logger);
    log::set_boxed_logger(Box::new(main_logger))?;
    log::set_max_level(LevelFilter::Info);
    Ok(())
}

/// Every log line written after this call is also sent to the returned
/// receiver, formatted as `LEVEL:target -- message`.
pub fn subscribe() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    LOG_LISTENERS.lock().unwrap().push(tx);
    rx
}
