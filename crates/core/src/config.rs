//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an absent file or a partial file is fine.
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [renderer]
//! offscreen_width = 160
//! offscreen_height = 90
//! frames_in_flight = 2
//! present_mode = "fastest"
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "lowres.toml";

/// Upper bound on frames in flight.
const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub assets: AssetConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Vulkan engine".to_string(),
        }
    }
}

/// Present mode policy for the swapchain.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    /// Prefer a low-latency non-blocking mode, fall back to FIFO.
    #[default]
    Fastest,
    /// Always FIFO.
    Fifo,
}

impl PresentModePreference {
    #[inline]
    pub fn is_fastest(self) -> bool {
        self == PresentModePreference::Fastest
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Width of the low-resolution offscreen target.
    pub offscreen_width: u32,
    /// Height of the low-resolution offscreen target.
    pub offscreen_height: u32,
    /// Number of frame slots (1..=3).
    pub frames_in_flight: u32,
    pub present_mode: PresentModePreference,
    /// Enables the Khronos validation layer when available.
    pub validation: bool,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            offscreen_width: 160,
            offscreen_height: 90,
            frames_in_flight: 2,
            present_mode: PresentModePreference::Fastest,
            validation: cfg!(debug_assertions),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AssetConfig {
    /// Directory holding `offscreen.{vert,frag}.spv` and `final.{vert,frag}.spv`.
    pub shader_dir: PathBuf,
    /// Texture sampled by the offscreen pass.
    pub texture: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders/spv"),
            texture: PathBuf::from("assets/texture.jpg"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,renderer=debug".to_string(),
        }
    }
}

impl Config {
    /// Parses a config from TOML text and validates it.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::ConfigParse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml_str(&text, path)?;
                info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        let r = &self.renderer;
        if r.offscreen_width == 0 || r.offscreen_height == 0 {
            return Err(Error::Config(format!(
                "offscreen size must be non-zero, got {}x{}",
                r.offscreen_width, r.offscreen_height
            )));
        }

        if r.frames_in_flight == 0 || r.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, r.frames_in_flight
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Config> {
        Config::from_toml_str(text, Path::new("test.toml"))
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.renderer.offscreen_width, 160);
        assert_eq!(config.renderer.offscreen_height, 90);
        assert_eq!(config.renderer.frames_in_flight, 2);
    }

    #[test]
    fn test_partial_sections() {
        let config = parse(
            r#"
            [renderer]
            frames_in_flight = 3
            present_mode = "fifo"

            [window]
            title = "demo"
            "#,
        )
        .unwrap();

        assert_eq!(config.renderer.frames_in_flight, 3);
        assert_eq!(config.renderer.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.renderer.offscreen_width, 160);
        assert_eq!(config.window.title, "demo");
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let err = parse("[renderer]\nframes_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_too_many_frames_in_flight() {
        let err = parse("[renderer]\nframes_in_flight = 4\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_zero_offscreen_size() {
        let err = parse("[renderer]\noffscreen_width = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml_reports_path() {
        let err = parse("[renderer\n").unwrap_err();
        match err {
            Error::ConfigParse { path, .. } => assert_eq!(path, PathBuf::from("test.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(parse("[renderer]\nmsaa = 4\n").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config =
            Config::load_or_default(Path::new("definitely/not/a/real/lowres.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
