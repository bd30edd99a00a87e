//! Core utilities shared by every layer of the renderer.
//!
//! - Error type and result alias
//! - Logging bootstrap
//! - Engine clock and frame-rate counter
//! - TOML configuration

mod clock;
mod config;
mod error;
mod logging;

pub use clock::{EngineClock, FpsCounter};
pub use config::{
    AssetConfig, Config, DEFAULT_CONFIG_PATH, LoggingConfig, PresentModePreference,
    RendererConfig, WindowConfig,
};
pub use error::{Error, Result};
pub use logging::init_logging;
