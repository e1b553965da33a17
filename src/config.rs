//! Run-time configuration of a tracking session.
//!
//! A [`TrackingConfig`] is read from a [ron] file. Every level carries
//! `#[serde(default)]`, so a file only needs to name what it changes:
//!
//! ```text
//! (
//!     predictor: OneEuro,
//!     eskf: (sigma_meas: 0.08),
//!     render: (block_size: 256),
//! )
//! ```

use crate::eskf::EskfOptions;
use crate::quat_predictor::QuatPredictorOptions;
use crate::render::RenderConfig;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which filter turns measurements into the published prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictorKind {
    /// Error-state Kalman filter with constant-velocity look-ahead.
    #[default]
    Eskf,
    /// Per-component 1€ smoothing with constant-velocity look-ahead.
    OneEuro,
}

/// Motion and timing of the synthetic head tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Nominal frame rate.
    pub rate_hz: f64,
    /// Random variation of each frame interval, as a fraction of the period.
    pub jitter: f64,
    /// Uniform angular noise added to every axis, in degrees.
    pub noise_deg: f64,
    pub yaw_amplitude_deg: f64,
    pub pitch_amplitude_deg: f64,
    /// Period of the head motion in seconds.
    pub period_s: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30.0,
            jitter: 0.2,
            noise_deg: 0.5,
            yaw_amplitude_deg: 40.0,
            pitch_amplitude_deg: 10.0,
            period_s: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub predictor: PredictorKind,
    pub eskf: EskfOptions,
    pub one_euro: QuatPredictorOptions,
    /// Frames further apart than this (seconds) are corrected without a
    /// preceding predict step.
    pub max_frame_gap_s: f64,
    /// How long consumers wait for a new publish before treating the
    /// tracker as stale.
    pub stale_after_ms: u64,
    pub render: RenderConfig,
    pub synthetic: SyntheticConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            predictor: PredictorKind::default(),
            eskf: EskfOptions::default(),
            one_euro: QuatPredictorOptions::default(),
            max_frame_gap_s: 1.0,
            stale_after_ms: 250,
            render: RenderConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::Error),

    /// The file is not valid RON for a [`TrackingConfig`].
    Ron(ron::de::SpannedError),

    /// The configuration could not be written out.
    RonSer(ron::Error),

    /// The configuration parsed but holds a value that cannot be used.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::Io(error) => Cow::from(format!("io error: {}", error)),
            ConfigError::Ron(error) => Cow::from(format!("ron error: {}", error)),
            ConfigError::RonSer(error) => Cow::from(format!("ron error: {}", error)),
            ConfigError::Invalid(what) => Cow::from(format!("invalid configuration: {}", what)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::Io(error)
    }
}

impl From<ron::de::SpannedError> for ConfigError {
    fn from(error: ron::de::SpannedError) -> Self {
        ConfigError::Ron(error)
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must not be negative, got {value}")))
    }
}

impl TrackingConfig {
    /// Reads and validates the configuration at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    /// Parses and validates a configuration.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: TrackingConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(ConfigError::RonSer)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("eskf.sigma_gyro", self.eskf.sigma_gyro)?;
        positive("eskf.sigma_accel", self.eskf.sigma_accel)?;
        positive("eskf.sigma_meas", self.eskf.sigma_meas)?;
        non_negative("eskf.prediction_horizon", self.eskf.prediction_horizon)?;

        positive("one_euro.min_cutoff", self.one_euro.min_cutoff)?;
        non_negative("one_euro.beta", self.one_euro.beta)?;
        positive("one_euro.d_cutoff", self.one_euro.d_cutoff)?;
        non_negative("one_euro.prediction_horizon", self.one_euro.prediction_horizon)?;

        positive("max_frame_gap_s", self.max_frame_gap_s)?;
        if self.stale_after_ms == 0 {
            return Err(ConfigError::Invalid("stale_after_ms must not be 0".to_owned()));
        }

        if self.render.sample_rate == 0 {
            return Err(ConfigError::Invalid("render.sample_rate must not be 0".to_owned()));
        }
        if self.render.block_size == 0 {
            return Err(ConfigError::Invalid("render.block_size must not be 0".to_owned()));
        }

        positive("synthetic.rate_hz", self.synthetic.rate_hz)?;
        positive("synthetic.period_s", self.synthetic.period_s)?;
        if !(0.0..1.0).contains(&self.synthetic.jitter) {
            return Err(ConfigError::Invalid(format!(
                "synthetic.jitter must be in [0, 1), got {}",
                self.synthetic.jitter
            )));
        }
        non_negative("synthetic.noise_deg", self.synthetic.noise_deg)?;

        Ok(())
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}
