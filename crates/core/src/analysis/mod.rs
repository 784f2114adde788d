use std::{fmt, sync::Arc};

use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{EstimatorConfig, PracticeError, Result};

/// Integer pitch in MIDI numbering (69 = A4).
pub type Semitone = i32;

/// Reserved stream value meaning no pitch was detected.
pub const NO_PITCH: Semitone = 0;

const REFERENCE_HZ: f64 = 440.0;
const REFERENCE_SEMITONE: f64 = 69.0;

/// Continuous semitone value for a frequency, `12 * log2(f / 440) + 69`.
/// Non-positive or non-finite frequencies yield `None`.
pub fn frequency_to_semitone(frequency: f32) -> Option<f64> {
    let frequency = f64::from(frequency);
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    Some(12.0 * (frequency / REFERENCE_HZ).log2() + REFERENCE_SEMITONE)
}

/// Rounds an optional estimate to the discrete semitone used by the pitch
/// stream, mapping an absent estimate to [`NO_PITCH`].
pub fn semitone_for(frequency: Option<f32>) -> Semitone {
    frequency
        .and_then(frequency_to_semitone)
        .map(round_half_up)
        .unwrap_or(NO_PITCH)
}

/// Inverse of [`frequency_to_semitone`].
pub fn semitone_to_frequency(semitone: Semitone) -> f32 {
    (REFERENCE_HZ * 2f64.powf((f64::from(semitone) - REFERENCE_SEMITONE) / 12.0)) as f32
}

fn round_half_up(value: f64) -> Semitone {
    (value + 0.5).floor() as Semitone
}

/// Monophonic YIN pitch estimator working on fixed-size blocks.
///
/// The cross-correlation part of the YIN difference function is computed with
/// a real FFT whose plans and buffers are reused as long as the block size
/// stays the same. Quiet, unpitched or ambiguous blocks produce `None`; that
/// is the common case and never an error.
pub struct PitchEstimator {
    sample_rate: u32,
    config: EstimatorConfig,
    planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
    energy: Vec<f32>,
    difference: Vec<f32>,
    cmndf: Vec<f32>,
}

impl PitchEstimator {
    pub fn new(sample_rate: u32, config: EstimatorConfig) -> Self {
        Self {
            sample_rate,
            config,
            planner: RealFftPlanner::new(),
            fft: None,
            energy: Vec::new(),
            difference: Vec::new(),
            cmndf: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Estimates the fundamental frequency of `block` in Hz. Internal
    /// failures are logged and reported as no estimate.
    pub fn estimate(&mut self, block: &[f32]) -> Option<f32> {
        match self.try_estimate(block) {
            Ok(frequency) => frequency,
            Err(err) => {
                tracing::debug!(%err, "pitch estimation failed");
                None
            }
        }
    }

    /// Same as [`estimate`](Self::estimate) but surfaces internal failures.
    pub fn try_estimate(&mut self, block: &[f32]) -> Result<Option<f32>> {
        if block.len() < 4 {
            return Err(PracticeError::InvalidInput(
                "pitch estimation requires at least four samples",
            ));
        }
        if self.sample_rate == 0 {
            return Err(PracticeError::InvalidInput("sample rate must be positive"));
        }
        if compute_rms(block) < self.config.silence_rms {
            return Ok(None);
        }

        let half = block.len() / 2;
        let sample_rate = self.sample_rate as f32;
        let min_tau = ((sample_rate / self.config.max_frequency).floor() as usize).max(2);
        let max_tau = ((sample_rate / self.config.min_frequency).ceil() as usize).min(half - 1);
        if min_tau >= max_tau {
            return Ok(None);
        }

        self.compute_difference(block, half)?;
        self.normalise_difference(half);

        let Some(tau) = self.absolute_threshold(min_tau, max_tau) else {
            return Ok(None);
        };
        let probability = 1.0 - self.cmndf[tau];
        if probability < self.config.probability_threshold {
            return Ok(None);
        }

        let refined = self.parabolic_interpolation(tau);
        if refined <= 0.0 {
            return Ok(None);
        }
        let frequency = sample_rate / refined;
        if frequency < self.config.min_frequency || frequency > self.config.max_frequency {
            return Ok(None);
        }

        Ok(Some(frequency))
    }

    /// `d(tau) = sum (x[j] - x[j + tau])^2` over the first half of the block,
    /// expanded into two energy terms and one cross-correlation term.
    fn compute_difference(&mut self, block: &[f32], half: usize) -> Result<()> {
        let len = block.len();

        self.energy.clear();
        self.energy.reserve(len + 1);
        let mut running = 0.0f32;
        self.energy.push(running);
        for sample in block {
            running += sample * sample;
            self.energy.push(running);
        }

        let fft = prepare_fft(&mut self.planner, &mut self.fft, len);
        fft.correlate(block, half)?;

        let scale = 1.0 / len as f32;
        let head_energy = self.energy[half];
        self.difference.clear();
        self.difference.extend((0..half).map(|tau| {
            let shifted_energy = self.energy[tau + half] - self.energy[tau];
            let cross = fft.correlation[tau] * scale;
            (head_energy + shifted_energy - 2.0 * cross).max(0.0)
        }));
        Ok(())
    }

    /// Cumulative mean normalised difference.
    fn normalise_difference(&mut self, half: usize) {
        self.cmndf.clear();
        self.cmndf.resize(half, 1.0);
        let mut running_sum = 0.0f32;
        for tau in 1..half {
            running_sum += self.difference[tau];
            self.cmndf[tau] = if running_sum > 0.0 {
                self.difference[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }
    }

    /// First dip below the threshold, followed down to its local minimum.
    fn absolute_threshold(&self, min_tau: usize, max_tau: usize) -> Option<usize> {
        let mut tau = min_tau;
        while tau < max_tau {
            if self.cmndf[tau] < self.config.threshold {
                while tau + 1 < max_tau && self.cmndf[tau + 1] < self.cmndf[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }
        None
    }

    fn parabolic_interpolation(&self, tau: usize) -> f32 {
        if tau == 0 || tau + 1 >= self.cmndf.len() {
            return tau as f32;
        }

        let s0 = self.cmndf[tau - 1];
        let s1 = self.cmndf[tau];
        let s2 = self.cmndf[tau + 1];
        let adjustment = (s0 - s2) / (2.0 * (s0 - 2.0 * s1 + s2));

        if adjustment.is_finite() && adjustment.abs() < 1.0 {
            tau as f32 + adjustment
        } else {
            tau as f32
        }
    }
}

fn prepare_fft<'a>(
    planner: &mut RealFftPlanner<f32>,
    slot: &'a mut Option<FftResources>,
    size: usize,
) -> &'a mut FftResources {
    if slot.as_ref().map_or(false, |fft| fft.size != size) {
        *slot = None;
    }
    slot.get_or_insert_with(|| FftResources::new(planner, size))
}

struct FftResources {
    size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    forward_scratch: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
    input: Vec<f32>,
    head: Vec<f32>,
    spectrum: Vec<Complex32>,
    head_spectrum: Vec<Complex32>,
    correlation: Vec<f32>,
}

impl FftResources {
    fn new(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            size,
            forward_scratch: forward.make_scratch_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            input: forward.make_input_vec(),
            head: forward.make_input_vec(),
            spectrum: forward.make_output_vec(),
            head_spectrum: forward.make_output_vec(),
            correlation: inverse.make_output_vec(),
            forward,
            inverse,
        }
    }

    /// Fills `correlation[tau]` with `size * sum_j x[j] * x[j + tau]` for the
    /// first `head_len` samples. Lags below `size - head_len` never wrap.
    fn correlate(&mut self, block: &[f32], head_len: usize) -> Result<()> {
        self.input.copy_from_slice(block);
        self.forward.process_with_scratch(
            &mut self.input,
            &mut self.spectrum,
            &mut self.forward_scratch,
        )?;

        self.head.fill(0.0);
        self.head[..head_len].copy_from_slice(&block[..head_len]);
        self.forward.process_with_scratch(
            &mut self.head,
            &mut self.head_spectrum,
            &mut self.forward_scratch,
        )?;

        for (head, full) in self.head_spectrum.iter_mut().zip(&self.spectrum) {
            *head = head.conj() * *full;
        }
        if let Some(first) = self.head_spectrum.first_mut() {
            first.im = 0.0;
        }
        if self.size % 2 == 0 {
            if let Some(last) = self.head_spectrum.last_mut() {
                last.im = 0.0;
            }
        }

        self.inverse.process_with_scratch(
            &mut self.head_spectrum,
            &mut self.correlation,
            &mut self.inverse_scratch,
        )?;
        Ok(())
    }
}

impl fmt::Debug for PitchEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitchEstimator")
            .field("sample_rate", &self.sample_rate)
            .field("config", &self.config)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

pub(crate) fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}
