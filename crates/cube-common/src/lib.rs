//! Common types and utilities shared across the datacube crates.

pub mod bbox;
pub mod crs;
pub mod document;
pub mod error;
pub mod time;

pub use bbox::BoundingBox;
pub use crs::{Crs, CrsCode};
pub use document::{DocPath, Document};
pub use error::{GeoError, GeoResult};
pub use time::{parse_datetime, solar_day, solar_offset, TimeRange};
