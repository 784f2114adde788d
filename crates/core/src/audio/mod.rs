use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc, Mutex, MutexGuard,
};

use crate::{
    analysis::{semitone_for, Semitone, NO_PITCH},
    AudioConfig, EstimatorConfig, PitchEstimator, PracticeError, Recording, Result,
    TakeRecorder,
};

#[cfg(feature = "cpal")]
mod cpal_input;

#[cfg(feature = "cpal")]
pub use cpal_input::CpalInput;

/// Single-slot holder for the most recent estimate. The capture side
/// overwrites it, the sampling clock reads it; there is never a backlog.
#[derive(Debug, Clone, Default)]
pub struct LatestPitch {
    slot: Arc<AtomicI32>,
}

impl LatestPitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, semitone: Semitone) {
        self.slot.store(semitone, Ordering::Release);
    }

    pub fn load(&self) -> Semitone {
        self.slot.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.store(NO_PITCH);
    }
}

/// What the session asks of a capture device when opening it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A microphone-like source of raw samples.
///
/// Devices deliver audio by calling [`CaptureHandle::push_samples`] (or
/// [`CaptureHandle::push_interleaved`]) from whatever context they run in.
pub trait InputDevice {
    /// Acquires the device and starts delivering samples into `sink`. Denied
    /// or missing devices report [`PracticeError::DeviceDenied`] or
    /// [`PracticeError::DeviceUnavailable`].
    fn open(&mut self, request: &CaptureRequest, sink: CaptureHandle) -> Result<()>;

    /// Releases the device. Returns once no further samples will be
    /// delivered. Closing a closed device is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Turns raw captured audio into the latest-estimate slot.
///
/// Incoming chunks of any size are cut into fixed-size blocks, amplified by
/// the configured input gain and run through the [`PitchEstimator`]. While a
/// take is being recorded the raw chunks are also kept by the
/// [`TakeRecorder`].
#[derive(Debug)]
pub struct CaptureEngine {
    config: AudioConfig,
    shared: Arc<Mutex<CaptureState>>,
    latest: LatestPitch,
}

impl CaptureEngine {
    pub fn new(config: AudioConfig, estimator: EstimatorConfig) -> Self {
        let state = CaptureState {
            estimator: PitchEstimator::new(config.sample_rate, estimator),
            pending: Vec::with_capacity(config.block_size),
            block_size: config.block_size.max(4),
            gain: config.input_gain,
            recorder: TakeRecorder::new(),
            blocks_analysed: 0,
            fault: None,
        };
        Self {
            config,
            shared: Arc::new(Mutex::new(state)),
            latest: LatestPitch::new(),
        }
    }

    pub fn latest(&self) -> &LatestPitch {
        &self.latest
    }

    /// Returns a cloneable handle that devices push samples through.
    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            shared: self.shared.clone(),
            latest: self.latest.clone(),
        }
    }

    pub fn request(&self) -> CaptureRequest {
        CaptureRequest {
            sample_rate: self.config.sample_rate,
            channels: 1,
        }
    }

    /// Prepares for a new capture interval: drops any half-filled block,
    /// clears the latest estimate and, when `record` is set, starts a fresh
    /// take recording.
    pub fn begin_take(&self, record: bool) -> Result<()> {
        let mut state = self.lock()?;
        state.pending.clear();
        state.fault = None;
        self.latest.clear();
        if record {
            let sample_rate = state.estimator.sample_rate();
            state.recorder.start(sample_rate);
        }
        Ok(())
    }

    /// Ends the capture interval and hands back everything recorded since
    /// [`begin_take`](Self::begin_take), if a recording was running.
    pub fn finish_take(&self) -> Result<Option<Recording>> {
        let mut state = self.lock()?;
        state.pending.clear();
        state.fault = None;
        self.latest.clear();
        Ok(state.recorder.stop())
    }

    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        self.handle().push_samples(samples)
    }

    /// Takes the failure a device reported since the last call, if any.
    pub fn take_fault(&self) -> Result<Option<String>> {
        Ok(self.lock()?.fault.take())
    }

    pub fn sample_rate(&self) -> Result<u32> {
        Ok(self.lock()?.estimator.sample_rate())
    }

    pub fn blocks_analysed(&self) -> Result<u64> {
        Ok(self.lock()?.blocks_analysed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CaptureState>> {
        lock_state(&self.shared)
    }
}

/// Shared, thread-safe entry point into a [`CaptureEngine`].
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Mutex<CaptureState>>,
    latest: LatestPitch,
}

impl CaptureHandle {
    /// Tells the engine the rate the device actually runs at.
    pub fn configure(&self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(PracticeError::InvalidInput("sample rate must be positive"));
        }
        let mut state = lock_state(&self.shared)?;
        state.estimator.set_sample_rate(sample_rate);
        state.recorder.set_sample_rate(sample_rate);
        state.pending.clear();
        Ok(())
    }

    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut state = lock_state(&self.shared)?;
        state.ingest(samples, 1, &self.latest);
        Ok(())
    }

    /// Records that the device failed mid-take, e.g. because access was
    /// revoked. The owner picks it up with [`CaptureEngine::take_fault`].
    pub fn report_fault(&self, reason: impl Into<String>) -> Result<()> {
        let mut state = lock_state(&self.shared)?;
        state.fault.get_or_insert_with(|| reason.into());
        Ok(())
    }

    /// Accepts interleaved frames and keeps only the first channel.
    pub fn push_interleaved(&self, data: &[f32], channels: usize) -> Result<()> {
        if channels <= 1 {
            return self.push_samples(data);
        }
        let mut state = lock_state(&self.shared)?;
        state.ingest(data, channels, &self.latest);
        Ok(())
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle").finish()
    }
}

#[derive(Debug)]
struct CaptureState {
    estimator: PitchEstimator,
    pending: Vec<f32>,
    block_size: usize,
    gain: f32,
    recorder: TakeRecorder,
    blocks_analysed: u64,
    fault: Option<String>,
}

impl CaptureState {
    /// Records and analyses the first channel of interleaved `data`.
    fn ingest(&mut self, data: &[f32], channels: usize, latest: &LatestPitch) {
        let channels = channels.max(1);
        if channels == 1 {
            self.recorder.write(data);
        }
        for &sample in data.iter().step_by(channels) {
            if channels > 1 {
                self.recorder.write_sample(sample);
            }
            self.pending.push(sample);
            if self.pending.len() >= self.block_size {
                self.analyse_pending(latest);
            }
        }
    }

    fn analyse_pending(&mut self, latest: &LatestPitch) {
        let gain = self.gain;
        for sample in &mut self.pending {
            *sample *= gain;
        }
        let frequency = self.estimator.estimate(&self.pending);
        latest.store(semitone_for(frequency));
        self.pending.clear();
        self.blocks_analysed += 1;
    }
}

fn lock_state(shared: &Mutex<CaptureState>) -> Result<MutexGuard<'_, CaptureState>> {
    shared
        .lock()
        .map_err(|_| PracticeError::msg("capture pipeline has been poisoned"))
}

/// Devices hold one capture at a time; a second `open` fails instead of
/// silently keeping the old sink.
pub(crate) fn refuse_reopen(is_open: bool, device: &str) -> Result<()> {
    if is_open {
        return Err(PracticeError::DeviceUnavailable(format!(
            "{device} is already open"
        )));
    }
    Ok(())
}

/// Input device that replays an in-memory take on demand.
///
/// Nothing is delivered by itself; callers advance it with
/// [`pump`](Self::pump), which makes offline scoring and tests deterministic.
#[derive(Debug)]
pub struct ReplayInput {
    samples: Vec<f32>,
    sample_rate: u32,
    cursor: usize,
    sink: Option<CaptureHandle>,
    opened: u32,
}

impl ReplayInput {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            cursor: 0,
            sink: None,
            opened: 0,
        }
    }

    /// Delivers up to `count` further samples to the open sink and returns
    /// how many were delivered. A closed device delivers nothing.
    pub fn pump(&mut self, count: usize) -> Result<usize> {
        let Some(sink) = self.sink.as_ref() else {
            return Ok(0);
        };
        let end = (self.cursor + count).min(self.samples.len());
        let chunk = &self.samples[self.cursor..end];
        sink.push_samples(chunk)?;
        let delivered = chunk.len();
        self.cursor = end;
        Ok(delivered)
    }

    /// Delivers the samples that cover `millis` of audio.
    pub fn pump_millis(&mut self, millis: f64) -> Result<usize> {
        let count = (millis * f64::from(self.sample_rate) / 1000.0).round() as usize;
        self.pump(count)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.samples.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// How many times the device has been opened.
    pub fn open_count(&self) -> u32 {
        self.opened
    }
}

impl InputDevice for ReplayInput {
    fn open(&mut self, _request: &CaptureRequest, sink: CaptureHandle) -> Result<()> {
        refuse_reopen(self.is_open(), "replay device")?;
        sink.configure(self.sample_rate)?;
        self.sink = Some(sink);
        self.opened += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.sink = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.sink.is_some()
    }
}
