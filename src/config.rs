use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConverterError, Result};
use crate::request::Hardware;

// Default values for job tuning
fn default_grace_period_ms() -> u64 {
    5000
}

fn default_event_buffer() -> usize {
    64
}

fn default_line_buffer() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_fallback_modes() -> Vec<Hardware> {
    vec![Hardware::Nvidia, Hardware::Intel, Hardware::Amd]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub media: MediaConfig,
    pub gif: GifConfig,
    pub job: JobConfig,
    pub fallback: FallbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary, used to learn the input duration
    pub probe_path: String,
    /// Overwrite an existing output file (`-y`) instead of refusing (`-n`)
    pub overwrite: bool,
    /// Directory for intermediate artifacts such as GIF palettes.
    /// Defaults to the output file's directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GifConfig {
    /// Sampling frame rate for palette generation and the final GIF
    pub fps: u32,
    /// Output width in pixels; height keeps the aspect ratio
    pub width: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// How long an interrupted encoder may take to exit before it is killed
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Capacity of the event channel handed to the caller
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Capacity of the channel carrying raw encoder output lines
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,
    /// Delete a half-written output file after failure or cancellation
    #[serde(default = "default_true")]
    pub remove_partial_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Retry failed hardware encodes on the CPU
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hardware modes eligible for the CPU retry
    #[serde(default = "default_fallback_modes")]
    pub modes: Vec<Hardware>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            probe_path: "ffprobe".to_string(),
            overwrite: false,
            scratch_dir: None,
        }
    }
}

impl Default for GifConfig {
    fn default() -> Self {
        Self { fps: 30, width: 800 }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            event_buffer: default_event_buffer(),
            line_buffer: default_line_buffer(),
            remove_partial_output: true,
        }
    }
}

impl JobConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            modes: default_fallback_modes(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConverterError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| ConverterError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConverterError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConverterError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
