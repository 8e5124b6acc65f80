use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::audio::analyser::AnalyserSettings;
use crate::audio::{GraphSettings, BROADCAST_RATE, DEFAULT_RAMP_SECONDS};
use crate::cli::Args;
use crate::color::ColorScheme;
use crate::decibel::db_to_linear;
use crate::viewer::ViewerSettings;

/// Input gain range offered by the capture controls, in dB.
pub const GAIN_MIN_DB: f32 = -80.0;
pub const GAIN_MAX_DB: f32 = 12.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub analyser: AnalyserSettings,
    pub relay: RelayConfig,
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub block_size: usize,
    /// Samples between two published summaries.
    pub broadcast_rate: usize,
    pub gain_db: f32,
    pub ramp_seconds: f32,
    /// Sine frequency to use instead of the microphone.
    pub tone: Option<f32>,
    pub tone_amplitude: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48_000,
            block_size: 128,
            broadcast_rate: BROADCAST_RATE,
            gain_db: 0.0,
            ramp_seconds: DEFAULT_RAMP_SECONDS,
            tone: None,
            tone_amplitude: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Socket path override.
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    pub fps: u32,
    /// Raster size of the level bars, in pixels.
    pub meter_width: u32,
    pub meter_height: u32,
    pub marker_width: u32,
    pub color_scheme: ColorScheme,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            meter_width: 30,
            meter_height: 400,
            marker_width: 30,
            color_scheme: ColorScheme::Classic,
        }
    }
}

impl ViewerConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn settings(&self) -> ViewerSettings {
        ViewerSettings {
            frame_interval: self.frame_interval(),
            meter_width: self.meter_width,
            meter_height: self.meter_height,
            marker_width: self.marker_width,
            color_scheme: self.color_scheme,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config at {}", path.display()))?;
        Ok(config)
    }

    /// Get the default XDG config path (~/.config/levelcast/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("levelcast").join("config.toml"))
    }

    /// Load config from the default XDG path if it exists.
    /// Returns None if the file is missing or cannot be parsed.
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return None;
        }
        match Self::load(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("{:#}. Using defaults.", e);
                None
            }
        }
    }

    /// Initialize default config file at XDG path, returns the path
    pub fn init_default_config() -> Result<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::generate_config_template())?;

        Ok(path)
    }

    /// Generate a commented TOML config template
    pub fn generate_config_template() -> String {
        r#"# levelcast configuration
# This file is auto-generated. Edit as needed.

[audio]
# Capture device (omit for the default source)
# device = "alsa_input.usb-mic.mono-fallback"
sample_rate = 48000
# Samples per capture block
block_size = 128
# Samples between two published level summaries
broadcast_rate = 512
# Initial input gain in dB (-80 to 12)
gain_db = 0.0
# Gain change ramp time in seconds
ramp_seconds = 0.03
# Sine test tone instead of the microphone
# tone = 440.0
tone_amplitude = 0.5

[analyser]
# RMS window length in samples
window = 1025

[analyser.instant]
attack_ms = 0.0
release_ms = 500.0
hold_ms = 0.0

[analyser.rms]
attack_ms = 3.0
release_ms = 500.0
hold_ms = 0.0

[analyser.peak_hold]
attack_ms = 0.0
release_ms = 500.0
hold_ms = 1000.0

[relay]
# Socket path (default: $XDG_RUNTIME_DIR/levelcast.sock or /tmp/levelcast.sock)
# socket = "/tmp/levelcast.sock"

[viewer]
# Refresh rate in frames per second
fps = 60
# Meter raster size in pixels
meter_width = 30
meter_height = 400
marker_width = 30
# Color scheme: "classic", "ocean", "monochrome"
color_scheme = "classic"
"#
        .to_string()
    }

    /// Merge CLI arguments into config (CLI takes priority)
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(ref device) = args.device {
            self.audio.device = Some(device.clone());
        }
        if let Some(rate) = args.sample_rate {
            self.audio.sample_rate = rate;
        }
        if let Some(size) = args.block_size {
            self.audio.block_size = size;
        }
        if let Some(tone) = args.tone {
            self.audio.tone = Some(tone);
        }
        if let Some(gain) = args.gain {
            self.audio.gain_db = gain;
        }
        if let Some(ref socket) = args.socket {
            self.relay.socket = Some(socket.clone());
        }
        if let Some(fps) = args.fps {
            self.viewer.fps = fps;
        }
        if let Some(scheme) = args.colors {
            self.viewer.color_scheme = scheme;
        }
    }

    pub fn gain_db(&self) -> f32 {
        self.audio.gain_db.clamp(GAIN_MIN_DB, GAIN_MAX_DB)
    }

    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            block_size: self.audio.block_size,
            broadcast_rate: self.audio.broadcast_rate,
            initial_gain: db_to_linear(self.gain_db()),
            analyser: self.analyser.clone(),
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.relay.socket.clone().unwrap_or_else(crate::ipc::socket_path)
    }
}
