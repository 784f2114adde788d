use serde::{Deserialize, Serialize};

use crate::{analysis::Semitone, config::ViewConfig, MelodyData};

/// Where the score window is centred.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ViewAnchor {
    /// Follow the playback position.
    #[default]
    Live,
    /// User-panned position, independent of playback.
    Panned(f64),
}

impl ViewAnchor {
    pub fn center(self, live_ms: f64) -> f64 {
        match self {
            ViewAnchor::Live => live_ms,
            ViewAnchor::Panned(ms) => ms,
        }
    }
}

/// Visible time window and pixel transform for one frame of the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreView {
    pub center_ms: f64,
    pub start_ms: f64,
    pub end_ms: f64,
    pub bar_ms: f64,
    pub min_pitch: Semitone,
    pub max_pitch: Semitone,
    pub width: f64,
    pub height: f64,
    pub padding: f64,
    pub pixels_per_semitone: f64,
}

impl ScoreView {
    pub fn window_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }

    /// Horizontal pixel for a time; linear across the window.
    pub fn x(&self, time_ms: f64) -> f64 {
        let window = self.window_ms();
        if window > 0.0 {
            (time_ms - self.start_ms) / window * self.width
        } else {
            0.0
        }
    }

    /// Vertical pixel for a pitch; higher pitches sit nearer the top.
    pub fn y(&self, pitch: Semitone) -> f64 {
        self.height - self.padding - f64::from(pitch - self.min_pitch) * self.pixels_per_semitone
    }

    pub fn pitch_rows(&self) -> impl Iterator<Item = Semitone> {
        self.min_pitch..=self.max_pitch
    }

    pub fn contains_pitch(&self, pitch: Semitone) -> bool {
        (self.min_pitch..=self.max_pitch).contains(&pitch)
    }

    /// Bar starts inside the window. Empty when the bar length is not
    /// positive.
    pub fn bar_times(&self) -> Vec<f64> {
        if !(self.bar_ms.is_finite() && self.bar_ms > 0.0) {
            return Vec::new();
        }
        let first = (self.start_ms / self.bar_ms).ceil() as i64;
        let last = (self.end_ms / self.bar_ms).floor() as i64;
        (first..=last).map(|bar| bar as f64 * self.bar_ms).collect()
    }
}

/// Pure function from (center, melody) to a [`ScoreView`].
#[derive(Debug, Clone, Default)]
pub struct ViewMapper {
    config: ViewConfig,
}

impl ViewMapper {
    pub fn new(config: ViewConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// One bar: `60000 * 4 / bpm`, or the configured default without tempo.
    pub fn bar_ms(&self, bpm: Option<f64>) -> f64 {
        match bpm {
            Some(bpm) if bpm.is_finite() && bpm > 0.0 => 60_000.0 * 4.0 / bpm,
            _ => self.config.default_bar_ms,
        }
    }

    pub fn window_ms(&self, bpm: Option<f64>) -> f64 {
        self.config.window_bars * self.bar_ms(bpm)
    }

    /// Places `center_ms` at the configured ratio from the left edge and
    /// keeps the window inside `[0, total_ms]`.
    pub fn window_bounds(&self, center_ms: f64, total_ms: f64, window_ms: f64) -> (f64, f64) {
        let center = if center_ms.is_finite() { center_ms } else { 0.0 };
        let start = (center - window_ms * self.config.position_ratio)
            .min(total_ms - window_ms)
            .max(0.0);
        let end = total_ms.min(start + window_ms);
        (start, end)
    }

    /// Display range for a melody spanning `low..=high`.
    ///
    /// The span is first fitted to exactly `max_octaves` octaves, around the
    /// midpoint when the melody is wider and padded (extra row on top)
    /// otherwise. The configured margins then shift the edges.
    pub fn pitch_range(&self, low: Semitone, high: Semitone) -> (Semitone, Semitone) {
        let cap = self.config.max_octaves * 12;
        let span = high - low + 1;
        let (mut min, mut max) = if span > cap {
            let center = round_half_up(f64::from(low + high) / 2.0);
            let min = center - cap / 2;
            (min, min + cap - 1)
        } else {
            let pad = (cap - span).div_euclid(2);
            (low - pad, high + (cap - span - pad))
        };
        max += self.config.octave_margin_above * 12 + self.config.top_offset_semitones;
        min += self.config.bottom_offset_semitones;
        if max < min {
            max = min;
        }
        (min, max)
    }

    /// `None` when there is nothing to draw: no notes or no duration.
    pub fn map(&self, center_ms: f64, melody: &MelodyData) -> Option<ScoreView> {
        let total = melody.total_duration_ms;
        if !(total.is_finite() && total > 0.0) {
            return None;
        }
        let (low, high) = melody.pitch_bounds()?;

        let bar_ms = self.bar_ms(melody.bpm);
        let window = self.config.window_bars * bar_ms;
        let (start_ms, end_ms) = self.window_bounds(center_ms, total, window);
        let (min_pitch, max_pitch) = self.pitch_range(low, high);
        let rows = f64::from(max_pitch - min_pitch + 1);

        Some(ScoreView {
            center_ms,
            start_ms,
            end_ms,
            bar_ms,
            min_pitch,
            max_pitch,
            width: self.config.width,
            height: rows * self.config.pixels_per_semitone + 2.0 * self.config.padding,
            padding: self.config.padding,
            pixels_per_semitone: self.config.pixels_per_semitone,
        })
    }

    /// Center position after dragging the score by `delta_px` from a drag
    /// that began at `anchor_ms`. Dragging right moves back in time.
    pub fn drag(
        &self,
        anchor_ms: f64,
        delta_px: f64,
        width_px: f64,
        bpm: Option<f64>,
        total_ms: f64,
    ) -> f64 {
        if width_px.is_nan() || width_px <= 0.0 {
            return anchor_ms.clamp(0.0, total_ms.max(0.0));
        }
        let ms_per_px = self.window_ms(bpm) / width_px;
        (anchor_ms - delta_px * ms_per_px).clamp(0.0, total_ms.max(0.0))
    }
}

fn round_half_up(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}
