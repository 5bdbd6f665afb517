/// Detector configuration
///
/// Every tunable of the clap pipeline lives here. Configuration is loaded from
/// an optional JSON file, overridden from `CLAP_*` environment variables and
/// validated once, before any audio is processed.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Width of one signed 16-bit little-endian sample in bytes
pub const SAMPLE_WIDTH_BYTES: usize = 2;

/// Default capture sample rate (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default interleaved channel count
pub const DEFAULT_CHANNELS: u16 = 2;

/// Default analysis block duration (seconds)
pub const DEFAULT_BLOCK_DURATION_SECS: f64 = 0.1;

/// Band magnitude threshold on normalized samples.
///
/// Equivalent to a threshold of 60,000,000 on raw 16-bit sample magnitudes.
pub const DEFAULT_CLAP_MAGNITUDE_THRESHOLD: f64 = 60_000_000.0 / 32768.0;

/// Longest accepted value for any duration setting (one day)
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Largest analysis block, in frames
pub const MAX_FRAMES_PER_BLOCK: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidOverride { name: String, value: String },
}

/// Configuration for the clap detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved channels per frame
    pub channels: u16,

    /// Duration of one analysis block in seconds
    pub block_duration: f64,

    /// RMS threshold at startup (normalized, 0.0 - 1.0)
    pub initial_threshold: f64,

    /// Lower clamp for the adaptive threshold
    pub min_threshold: f64,

    /// Upper clamp for the adaptive threshold
    pub max_threshold: f64,

    /// Lower edge of the clap band (Hz)
    pub clap_band_low_hz: f64,

    /// Upper edge of the clap band (Hz, exclusive)
    pub clap_band_high_hz: f64,

    /// Summed band magnitude a block must exceed to match a clap
    pub clap_magnitude_threshold: f64,

    /// Sustained noise (seconds) after which the threshold is raised
    pub oversensitive_seconds: f64,

    /// Sustained silence (seconds) after which the threshold is lowered
    pub undersensitive_seconds: f64,

    /// Multiplier applied when the detector is oversensitive
    pub threshold_raise_factor: f64,

    /// Multiplier applied when the detector is undersensitive
    pub threshold_lower_factor: f64,

    /// Noise runs longer than this (seconds) are not taps
    pub max_tap_seconds: f64,

    /// Number of rapid claps that completes a sequence
    pub clap_count_goal: u32,

    /// Maximum gap between two claps of one sequence (seconds)
    pub rapid_clap_interval_seconds: f64,

    /// How long to wait for one block from the capture source
    pub capture_timeout_ms: u64,

    /// Pause between a capture error and the next attempt
    pub capture_retry_delay_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            block_duration: DEFAULT_BLOCK_DURATION_SECS,
            initial_threshold: 0.005,
            min_threshold: 1e-6,
            max_threshold: 1.0,
            clap_band_low_hz: 1750.0,
            clap_band_high_hz: 2350.0,
            clap_magnitude_threshold: DEFAULT_CLAP_MAGNITUDE_THRESHOLD,
            oversensitive_seconds: 15.0,
            undersensitive_seconds: 120.0,
            threshold_raise_factor: 2.0,
            threshold_lower_factor: 0.5,
            max_tap_seconds: 0.4,
            clap_count_goal: 4,
            rapid_clap_interval_seconds: 3.0,
            capture_timeout_ms: 1000,
            capture_retry_delay_ms: 100,
        }
    }
}

impl DetectorConfig {
    /// Load configuration: JSON file (if any), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;

        info!(
            "Configuration loaded: {} Hz, {} channels, {:.3}s blocks, band {:.0}-{:.0} Hz",
            config.sample_rate,
            config.channels,
            config.block_duration,
            config.clap_band_low_hz,
            config.clap_band_high_hz
        );

        Ok(config)
    }

    /// Read a JSON config file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        debug!("Read config file {}", path.display());
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply `CLAP_*` overrides from the given lookup (usually the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_field(&lookup, "CLAP_SAMPLE_RATE", &mut self.sample_rate)?;
        override_field(&lookup, "CLAP_CHANNELS", &mut self.channels)?;
        override_field(&lookup, "CLAP_BLOCK_DURATION", &mut self.block_duration)?;
        override_field(&lookup, "CLAP_INITIAL_THRESHOLD", &mut self.initial_threshold)?;
        override_field(&lookup, "CLAP_BAND_LOW_HZ", &mut self.clap_band_low_hz)?;
        override_field(&lookup, "CLAP_BAND_HIGH_HZ", &mut self.clap_band_high_hz)?;
        override_field(
            &lookup,
            "CLAP_MAGNITUDE_THRESHOLD",
            &mut self.clap_magnitude_threshold,
        )?;
        override_field(
            &lookup,
            "CLAP_OVERSENSITIVE_SECONDS",
            &mut self.oversensitive_seconds,
        )?;
        override_field(
            &lookup,
            "CLAP_UNDERSENSITIVE_SECONDS",
            &mut self.undersensitive_seconds,
        )?;
        override_field(&lookup, "CLAP_MAX_TAP_SECONDS", &mut self.max_tap_seconds)?;
        override_field(&lookup, "CLAP_COUNT_GOAL", &mut self.clap_count_goal)?;
        override_field(
            &lookup,
            "CLAP_RAPID_INTERVAL_SECONDS",
            &mut self.rapid_clap_interval_seconds,
        )?;
        override_field(&lookup, "CLAP_CAPTURE_TIMEOUT_MS", &mut self.capture_timeout_ms)?;
        override_field(
            &lookup,
            "CLAP_CAPTURE_RETRY_DELAY_MS",
            &mut self.capture_retry_delay_ms,
        )?;

        Ok(())
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate must be greater than 0"));
        }

        if self.channels == 0 {
            return Err(invalid("channels must be greater than 0"));
        }

        if !valid_duration(self.block_duration) {
            return Err(invalid(format!(
                "block_duration must be a positive number of seconds, at most {}",
                MAX_DURATION_SECS
            )));
        }

        if self.frames_per_block() == 0 {
            return Err(invalid("block_duration is too short to hold a single frame"));
        }

        if self.frames_per_block() > MAX_FRAMES_PER_BLOCK {
            return Err(invalid(format!(
                "block of {} frames exceeds the limit of {} frames",
                self.frames_per_block(),
                MAX_FRAMES_PER_BLOCK
            )));
        }

        if !(self.min_threshold.is_finite() && self.min_threshold > 0.0) {
            return Err(invalid("min_threshold must be greater than 0"));
        }

        if !(self.max_threshold.is_finite() && self.max_threshold >= self.min_threshold) {
            return Err(invalid("max_threshold must be at least min_threshold"));
        }

        if !(self.initial_threshold > 0.0
            && self.initial_threshold >= self.min_threshold
            && self.initial_threshold <= self.max_threshold)
        {
            return Err(invalid(
                "initial_threshold must be positive and within [min_threshold, max_threshold]",
            ));
        }

        if !(self.clap_band_low_hz.is_finite() && self.clap_band_low_hz >= 0.0) {
            return Err(invalid("clap_band_low_hz must not be negative"));
        }

        if !(self.clap_band_high_hz.is_finite() && self.clap_band_low_hz < self.clap_band_high_hz)
        {
            return Err(invalid("clap_band_low_hz must be below clap_band_high_hz"));
        }

        if self.clap_band_high_hz > self.sample_rate as f64 / 2.0 {
            return Err(invalid(format!(
                "clap_band_high_hz must not exceed the Nyquist frequency ({} Hz)",
                self.sample_rate as f64 / 2.0
            )));
        }

        if !(self.clap_magnitude_threshold.is_finite() && self.clap_magnitude_threshold >= 0.0) {
            return Err(invalid("clap_magnitude_threshold must not be negative"));
        }

        for (name, seconds) in [
            ("oversensitive_seconds", self.oversensitive_seconds),
            ("undersensitive_seconds", self.undersensitive_seconds),
            ("max_tap_seconds", self.max_tap_seconds),
            ("rapid_clap_interval_seconds", self.rapid_clap_interval_seconds),
        ] {
            if !valid_duration(seconds) {
                return Err(invalid(format!(
                    "{} must be a positive number of seconds, at most {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }

        if !(self.threshold_raise_factor.is_finite() && self.threshold_raise_factor > 1.0) {
            return Err(invalid("threshold_raise_factor must be greater than 1.0"));
        }

        if !(self.threshold_lower_factor > 0.0 && self.threshold_lower_factor < 1.0) {
            return Err(invalid("threshold_lower_factor must be between 0.0 and 1.0"));
        }

        if self.clap_count_goal == 0 {
            return Err(invalid("clap_count_goal must be greater than 0"));
        }

        Ok(())
    }

    /// Frames (one sample per channel) in one analysis block
    pub fn frames_per_block(&self) -> usize {
        (self.sample_rate as f64 * self.block_duration).round() as usize
    }

    /// Interleaved samples in one analysis block
    pub fn samples_per_block(&self) -> usize {
        self.frames_per_block() * self.channels as usize
    }

    /// Size of one raw block in bytes
    pub fn block_bytes(&self) -> usize {
        self.samples_per_block() * SAMPLE_WIDTH_BYTES
    }

    /// Consecutive noisy blocks that trigger a threshold raise
    pub fn oversensitive_blocks(&self) -> u32 {
        self.blocks_for(self.oversensitive_seconds)
    }

    /// Consecutive quiet blocks that trigger a threshold drop
    pub fn undersensitive_blocks(&self) -> u32 {
        self.blocks_for(self.undersensitive_seconds)
    }

    /// Longest noisy run still accepted as a tap
    pub fn max_tap_blocks(&self) -> u32 {
        self.blocks_for(self.max_tap_seconds)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_duration)
    }

    pub fn rapid_clap_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rapid_clap_interval_seconds)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn capture_retry_delay(&self) -> Duration {
        Duration::from_millis(self.capture_retry_delay_ms)
    }

    fn blocks_for(&self, seconds: f64) -> u32 {
        let blocks = (seconds / self.block_duration).round();
        if blocks >= u32::MAX as f64 {
            u32::MAX
        } else {
            (blocks as u32).max(1)
        }
    }
}

fn valid_duration(seconds: f64) -> bool {
    seconds.is_finite() && seconds > 0.0 && seconds <= MAX_DURATION_SECS
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfig(message.into())
}

fn override_field<T, F>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidOverride {
                name: name.to_string(),
                value: value.clone(),
            })?;
        debug!("Config override {}={}", name, value.trim());
    }

    Ok(())
}
