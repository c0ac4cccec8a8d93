//! `WeatherLoad` - current weather observations into a warehouse table
//!
//! This library reads a list of cities, fetches the current conditions for
//! each one from the Weatherstack API, flattens every response into a
//! single row and appends it to a warehouse table.

pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod telemetry;
pub mod warehouse;
pub mod weather;

// Re-export core types for public API
pub use crate::config::{AppConfig, Credentials, FailurePolicy, LogFormat, LoggingConfig, WeatherConfig};
pub use error::LoadError;
pub use loader::Loader;
pub use models::{NormalizedRow, RawWeatherResponse};
pub use normalize::normalize;
pub use pipeline::{CityOutcome, Pipeline, RunReport, Stage};
pub use warehouse::{MemoryWarehouse, PostgresWarehouse, Warehouse};
pub use weather::{WeatherSource, WeatherstackClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, LoadError>;
