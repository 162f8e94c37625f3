use thiserror::Error;

/// Every failure that crosses the public surface of the core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("core is not initialized")]
    NotInitialized,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("service worker stopped")]
    ServiceStopped,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

// The db layers work with `anyhow`, errors raised from this crate keep their
// kind when they travel through it.
impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<Error>() {
            Ok(error) => error,
            Err(e) => Error::Storage(format!("{e:#}")),
        }
    }
}
