pub mod config;
pub mod error;
pub mod geo;
pub mod types;

pub use config::Config;
pub use error::ParseEnumError;
pub use geo::{haversine_meters, GeoPoint, NOWHERE};
pub use types::*;
