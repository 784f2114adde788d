use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{PracticeError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub estimator: EstimatorConfig,
    pub sampling: SamplingConfig,
    pub playback: PlaybackConfig,
    pub view: ViewConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections and fields keep their
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(PracticeError::InvalidInput("sample rate must be positive"));
        }
        if self.audio.block_size < 4 {
            return Err(PracticeError::InvalidInput(
                "block size must hold at least four samples",
            ));
        }
        if !(self.audio.input_gain.is_finite() && self.audio.input_gain > 0.0) {
            return Err(PracticeError::InvalidInput("input gain must be positive"));
        }
        if self.estimator.min_frequency <= 0.0
            || self.estimator.max_frequency <= self.estimator.min_frequency
        {
            return Err(PracticeError::InvalidInput(
                "estimator frequency range is empty",
            ));
        }
        if self.sampling.interval_ms == 0 {
            return Err(PracticeError::InvalidInput(
                "sampling interval must be positive",
            ));
        }
        if self.playback.seek_step_ms <= 0.0 {
            return Err(PracticeError::InvalidInput("seek step must be positive"));
        }
        if !(0.0..=1.0).contains(&self.view.position_ratio) {
            return Err(PracticeError::InvalidInput(
                "position ratio must lie within [0, 1]",
            ));
        }
        if self.view.window_bars <= 0.0
            || self.view.default_bar_ms <= 0.0
            || self.view.width <= 0.0
            || self.view.pixels_per_semitone <= 0.0
            || self.view.max_octaves <= 0
        {
            return Err(PracticeError::InvalidInput(
                "view dimensions must be positive",
            ));
        }
        if self.session.event_capacity == 0 {
            return Err(PracticeError::InvalidInput(
                "event capacity must be positive",
            ));
        }
        Ok(())
    }
}

/// Capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per analysed block. 1024 at 44.1 kHz is roughly 23 ms.
    pub block_size: usize,
    /// Linear gain applied to each block before estimation so quiet voices
    /// still register.
    pub input_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 1024,
            input_gain: 3.0,
        }
    }
}

/// Tuning knobs for the YIN estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub threshold: f32,
    pub probability_threshold: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// Blocks quieter than this RMS are treated as silence.
    pub silence_rms: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            probability_threshold: 0.05,
            min_frequency: 60.0,
            max_frequency: 1500.0,
            silence_rms: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { interval_ms: 25 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub seek_step_ms: f64,
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            seek_step_ms: 10_000.0,
            volume: 1.0,
        }
    }
}

/// Layout constants for the scrolling score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub window_bars: f64,
    /// Bar length used when the melody carries no tempo.
    pub default_bar_ms: f64,
    /// Fraction of the window left of the position cursor.
    pub position_ratio: f64,
    pub max_octaves: i32,
    pub octave_margin_above: i32,
    pub top_offset_semitones: i32,
    pub bottom_offset_semitones: i32,
    pub pixels_per_semitone: f64,
    pub padding: f64,
    pub width: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            window_bars: 1.0,
            default_bar_ms: 2000.0,
            position_ratio: 1.0 / 3.0,
            max_octaves: 4,
            octave_margin_above: 2,
            top_offset_semitones: -12,
            bottom_offset_semitones: 24,
            pixels_per_semitone: 20.0,
            padding: 8.0,
            width: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reopen the microphone and restart sampling when resuming a stopped
    /// take. When false, resume only restarts audio playback.
    pub resume_restarts_detection: bool,
    /// Events buffered per subscriber. A subscriber whose queue is full is
    /// disconnected.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resume_restarts_detection: true,
            event_capacity: 1024,
        }
    }
}
