#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

pub mod api;
pub mod cache_db;
pub mod config;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod gps_processor;
pub mod journey_area_utils;
pub mod journey_data;
pub mod journey_date_picker;
pub mod journey_tracker;
pub mod logs;
pub mod main_db;
pub mod map_renderer;
pub mod raw_data;
pub mod service;
pub mod storage;
pub mod tile_renderer;
pub mod tile_store;
pub mod utils;

pub use error::{Error, Result};
