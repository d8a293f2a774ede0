//! # PolyRadar Common Library
//!
//! Shared code for the PolyRadar analysis service including:
//! - Database schema, models and queries
//! - Event types (RadarEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - Polymarket event URL parsing

pub mod config;
pub mod db;
pub mod error;
pub mod event_url;
pub mod events;
pub mod time;

pub use error::{Error, Result};
