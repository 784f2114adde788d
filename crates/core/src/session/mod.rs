//! Practice session orchestration.
//!
//! [`SessionController`] owns the capture device, the sampling clock, the
//! pitch stream and the playback bridge for one song. It is driven
//! cooperatively: the owner calls [`SessionController::tick`] on its refresh
//! cadence and every time-dependent effect (sampling, position publishing,
//! end-of-track, device faults) happens inside that call. Presentation code
//! reads [`SessionSnapshot`]s or subscribes to [`SessionEvent`]s.

use std::{fmt, sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::{
    analysis::{Semitone, NO_PITCH},
    audio::{CaptureEngine, InputDevice},
    config::AppConfig,
    mapping::{ScoreView, ViewAnchor, ViewMapper},
    melody::{is_match, LyricLines, MelodyData, MelodyProvider, TakeSummary},
    playback::{PlaybackBridge, Source, Transport},
    render::ScoreFrame,
    timeline::{Clock, PitchStream, SamplingClock},
    PracticeError, Recording, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No take has run since the melody was loaded.
    Idle,
    /// Device open, clocks running, audio playing.
    Practicing,
    /// Device released and clocks halted; the position is kept.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Practicing => f.write_str("practicing"),
            SessionState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Notifications published to subscribers, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Position(f64),
    PitchSampled { index: usize, semitone: Semitone },
    GuideToggled { active: Source, position_ms: f64 },
    ViewPanned(f64),
    MelodyLoaded { song_id: String },
    LoadFailed(String),
    DeviceFailed(String),
}

/// What a single [`SessionController::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickReport {
    pub appended: usize,
    pub position_ms: Option<f64>,
    pub ended: bool,
    pub device_lost: bool,
}

/// Read-only view of the session for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub song_id: Option<String>,
    pub load_error: Option<String>,
    pub position_ms: f64,
    pub view_position_ms: f64,
    pub total_duration_ms: f64,
    pub active_source: Source,
    pub volume: Option<f32>,
    pub detecting: bool,
    pub samples: usize,
    pub latest_pitch: Semitone,
    pub target_pitch: Option<Semitone>,
    pub matched: bool,
    pub previous_lyric: Option<String>,
    pub current_lyric: Option<String>,
    pub next_lyric: Option<String>,
}

pub struct SessionController<D, T> {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    device: D,
    capture: CaptureEngine,
    sampler: SamplingClock,
    stream: PitchStream,
    bridge: PlaybackBridge<T>,
    mapper: ViewMapper,
    melody: Option<MelodyData>,
    load_error: Option<String>,
    state: SessionState,
    position_ms: f64,
    anchor: ViewAnchor,
    detecting: bool,
    last_recording: Option<Recording>,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl<D: InputDevice, T: Transport> SessionController<D, T> {
    /// Builds an idle session. Fails when `config` does not validate.
    pub fn new(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        device: D,
        mut bridge: PlaybackBridge<T>,
    ) -> Result<Self> {
        config.validate()?;
        bridge.set_volume(config.playback.volume);
        let interval_ms = config.sampling.interval_ms;
        Ok(Self {
            capture: CaptureEngine::new(config.audio.clone(), config.estimator.clone()),
            sampler: SamplingClock::new(Duration::from_millis(interval_ms)),
            stream: PitchStream::new(interval_ms),
            mapper: ViewMapper::new(config.view.clone()),
            config,
            clock,
            device,
            bridge,
            melody: None,
            load_error: None,
            state: SessionState::Idle,
            position_ms: 0.0,
            anchor: ViewAnchor::Live,
            detecting: false,
            last_recording: None,
            subscribers: Vec::new(),
        })
    }

    /// Registers a new event subscriber. Each subscriber buffers up to
    /// `session.event_capacity` events and must keep draining them: one that
    /// falls behind is disconnected, as are dropped receivers.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.config.session.event_capacity);
        self.subscribers.push(tx);
        rx
    }

    /// Loads song data, replacing any previous melody wholesale. A running
    /// take is stopped first. On failure the session keeps no melody and
    /// cannot practice until a later load succeeds.
    pub fn load_melody(&mut self, provider: &dyn MelodyProvider) -> Result<()> {
        self.stop();
        match provider.load() {
            Ok(data) => {
                self.install_melody(data);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "melody load failed");
                self.melody = None;
                self.load_error = Some(err.to_string());
                self.reset_position();
                self.set_state(SessionState::Idle);
                self.emit(SessionEvent::LoadFailed(err.to_string()));
                Err(err)
            }
        }
    }

    pub fn set_melody(&mut self, data: MelodyData) -> Result<()> {
        self.load_melody(&data)
    }

    /// Starts a fresh take from the beginning of the song.
    pub fn start(&mut self) -> Result<()> {
        let total_ms = self.require_melody()?;
        if self.state == SessionState::Practicing {
            return Err(self.invalid("start"));
        }

        self.open_detection()?;
        self.stream.clear();
        self.reset_position();
        self.bridge.seek_to(0.0, total_ms);
        self.sampler.start(self.clock.now());
        self.bridge.play_active();
        self.set_state(SessionState::Practicing);
        self.emit(SessionEvent::Position(0.0));

        tracing::info!(song = %self.song_id(), source = %self.bridge.active(), "practice started");
        Ok(())
    }

    /// Ends the take. Safe to call at any time; only a practicing session
    /// changes. Returns the raw take recording when one was captured.
    pub fn stop(&mut self) -> Option<Recording> {
        if self.state != SessionState::Practicing {
            return None;
        }

        if self.detecting {
            self.sample_pitch(self.clock.now());
        }
        self.sampler.stop();
        self.bridge.pause_all();
        if let Some(position_ms) = self.bridge.active_position() {
            self.position_ms = position_ms;
        }
        let recording = self.close_detection();
        self.set_state(SessionState::Stopped);

        tracing::info!(
            position_ms = self.position_ms,
            samples = self.stream.len(),
            recorded = recording.is_some(),
            "practice stopped"
        );
        if let Some(recording) = &recording {
            self.last_recording = Some(recording.clone());
        }
        recording
    }

    /// Continues from the retained position.
    ///
    /// With `resume_restarts_detection` the microphone is reopened and the
    /// stream is cut or padded to the resume position: samples before it are
    /// kept, samples at or after it are replaced by the new singing and gaps
    /// hold the no-pitch sentinel. Index `i` keeps meaning `i * interval`.
    /// Otherwise only audio resumes. Refused at either end of the track.
    pub fn resume(&mut self) -> Result<()> {
        let total_ms = self.require_melody()?;
        if self.state == SessionState::Practicing {
            return Err(self.invalid("resume"));
        }
        if self.position_ms <= 0.0 {
            return Err(self.invalid("resume from the beginning"));
        }
        if self.position_ms >= total_ms {
            return Err(self.invalid("resume at the end of the track"));
        }

        if self.config.session.resume_restarts_detection {
            self.open_detection()?;
            let resume_index = self.stream.index_at(self.position_ms);
            if resume_index < self.stream.len() {
                tracing::debug!(
                    discarded = self.stream.len() - resume_index,
                    "replacing samples after the resume position"
                );
            }
            self.stream.align_to(resume_index, NO_PITCH);
            self.sampler.start(self.clock.now());
        }
        self.bridge.seek_to(self.position_ms, total_ms);
        self.anchor = ViewAnchor::Live;
        self.bridge.play_active();
        self.set_state(SessionState::Practicing);

        tracing::info!(position_ms = self.position_ms, detecting = self.detecting, "practice resumed");
        Ok(())
    }

    /// Switches between accompaniment and guide vocal at the current
    /// position. Returns the published position, or `None` while the audio
    /// sources are not attached.
    pub fn toggle_guide_vocal(&mut self) -> Option<f64> {
        let position_ms = self.bridge.toggle_guide_vocal()?;
        self.position_ms = position_ms;
        let active = self.bridge.active();
        self.emit(SessionEvent::GuideToggled { active, position_ms });
        self.emit(SessionEvent::Position(position_ms));
        Some(position_ms)
    }

    /// Moves playback to `target_ms`, clamped to the track. The practicing
    /// state is unchanged.
    pub fn seek_to(&mut self, target_ms: f64) -> Result<f64> {
        let total_ms = self.require_melody()?;
        let clamped = if target_ms.is_finite() {
            target_ms.clamp(0.0, total_ms)
        } else {
            0.0
        };
        self.bridge.seek_to(clamped, total_ms);
        self.position_ms = clamped;
        self.anchor = ViewAnchor::Live;
        self.emit(SessionEvent::Position(clamped));
        tracing::debug!(position_ms = clamped, "seek");
        Ok(clamped)
    }

    pub fn seek_backward(&mut self) -> Result<f64> {
        self.seek_to(self.position_ms - self.config.playback.seek_step_ms)
    }

    pub fn seek_forward(&mut self) -> Result<f64> {
        self.seek_to(self.position_ms + self.config.playback.seek_step_ms)
    }

    /// Centers the score on `center_ms` without touching playback. Only
    /// allowed while not practicing.
    pub fn pan_view(&mut self, center_ms: f64) -> Result<f64> {
        let total_ms = self.require_melody()?;
        if self.state == SessionState::Practicing {
            return Err(self.invalid("pan the view"));
        }
        let clamped = if center_ms.is_finite() {
            center_ms.clamp(0.0, total_ms)
        } else {
            0.0
        };
        self.anchor = ViewAnchor::Panned(clamped);
        self.emit(SessionEvent::ViewPanned(clamped));
        Ok(clamped)
    }

    /// Pans by a pointer drag of `delta_px` across a score `width_px` wide,
    /// starting from the view position `anchor_ms` held when the drag began.
    pub fn drag_view(&mut self, anchor_ms: f64, delta_px: f64, width_px: f64) -> Result<f64> {
        let total_ms = self.require_melody()?;
        let bpm = self.melody.as_ref().and_then(|melody| melody.bpm);
        let center = self.mapper.drag(anchor_ms, delta_px, width_px, bpm, total_ms);
        self.pan_view(center)
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.bridge.set_volume(volume)
    }

    /// Runs every time-dependent step that has fallen due: pitch sampling,
    /// position publishing, device-fault and end-of-track handling.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if self.state != SessionState::Practicing {
            return report;
        }

        match self.capture.take_fault() {
            Ok(Some(reason)) => {
                tracing::warn!(%reason, "microphone lost during take");
                self.emit(SessionEvent::DeviceFailed(reason));
                self.stop();
                report.device_lost = true;
                return report;
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(%err, "could not check capture faults"),
        }

        if self.detecting {
            report.appended = self.sample_pitch(self.clock.now());
        }

        if let Some(position_ms) = self.bridge.refresh() {
            self.position_ms = position_ms;
            report.position_ms = Some(position_ms);
            self.emit(SessionEvent::Position(position_ms));
        }

        if self.bridge.poll_ended() {
            if let Some(position_ms) = self.bridge.active_position() {
                self.position_ms = position_ms;
                report.position_ms = Some(position_ms);
                self.emit(SessionEvent::Position(position_ms));
            }
            tracing::info!(song = %self.song_id(), "reached end of track");
            self.stop();
            report.ended = true;
        }
        report
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_practicing(&self) -> bool {
        self.state == SessionState::Practicing
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting
    }

    pub fn position_ms(&self) -> f64 {
        self.position_ms
    }

    /// Center of the score window: the panned position when one is set,
    /// otherwise the playback position.
    pub fn view_position_ms(&self) -> f64 {
        self.anchor.center(self.position_ms)
    }

    pub fn melody(&self) -> Option<&MelodyData> {
        self.melody.as_ref()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn stream(&self) -> &PitchStream {
        &self.stream
    }

    pub fn active_source(&self) -> Source {
        self.bridge.active()
    }

    pub fn volume(&self) -> Option<f32> {
        self.bridge.volume()
    }

    pub fn last_recording(&self) -> Option<&Recording> {
        self.last_recording.as_ref()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn bridge(&self) -> &PlaybackBridge<T> {
        &self.bridge
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }

    pub fn target_pitch(&self) -> Option<Semitone> {
        self.melody
            .as_ref()
            .and_then(|melody| melody.target_at(self.position_ms))
    }

    pub fn lyric_lines(&self) -> LyricLines<'_> {
        self.melody
            .as_ref()
            .map(|melody| melody.lyric_lines_at(self.position_ms))
            .unwrap_or_default()
    }

    pub fn view(&self) -> Option<ScoreView> {
        let melody = self.melody.as_ref()?;
        self.mapper.map(self.view_position_ms(), melody)
    }

    /// Score primitives for the current view, with the cursor on the view
    /// position.
    pub fn frame(&self) -> Option<ScoreFrame> {
        let melody = self.melody.as_ref()?;
        let view = self.view()?;
        Some(ScoreFrame::build(view, melody, &self.stream, self.view_position_ms()))
    }

    pub fn summary(&self) -> Option<TakeSummary> {
        let melody = self.melody.as_ref()?;
        Some(TakeSummary::from_stream(&self.stream, melody))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let lyrics = self.lyric_lines();
        let latest_pitch = self.stream.last().unwrap_or(NO_PITCH);
        let target_pitch = self.target_pitch();
        SessionSnapshot {
            state: self.state,
            song_id: self.melody.as_ref().map(|melody| melody.song_id.clone()),
            load_error: self.load_error.clone(),
            position_ms: self.position_ms,
            view_position_ms: self.view_position_ms(),
            total_duration_ms: self
                .melody
                .as_ref()
                .map_or(0.0, |melody| melody.total_duration_ms),
            active_source: self.bridge.active(),
            volume: self.bridge.volume(),
            detecting: self.detecting,
            samples: self.stream.len(),
            latest_pitch,
            target_pitch,
            matched: is_match(latest_pitch, target_pitch),
            previous_lyric: lyrics.previous.map(|entry| entry.text.clone()),
            current_lyric: lyrics.current.map(|entry| entry.text.clone()),
            next_lyric: lyrics.next.map(|entry| entry.text.clone()),
        }
    }

    fn install_melody(&mut self, data: MelodyData) {
        tracing::info!(
            song = %data.song_id,
            notes = data.notes.len(),
            lyrics = data.lyrics.len(),
            "melody ready"
        );
        let song_id = data.song_id.clone();
        let total_ms = data.total_duration_ms;
        self.melody = Some(data);
        self.load_error = None;
        self.stream.clear();
        self.reset_position();
        self.bridge.seek_to(0.0, total_ms);
        self.set_state(SessionState::Idle);
        self.emit(SessionEvent::MelodyLoaded { song_id });
    }

    fn open_detection(&mut self) -> Result<()> {
        self.capture.begin_take(true)?;
        let request = self.capture.request();
        if let Err(err) = self.device.open(&request, self.capture.handle()) {
            if let Err(cleanup) = self.capture.finish_take() {
                tracing::debug!(%cleanup, "discarding partial take failed");
            }
            tracing::warn!(%err, "could not open microphone");
            self.emit(SessionEvent::DeviceFailed(err.to_string()));
            return Err(err);
        }
        self.detecting = true;
        Ok(())
    }

    /// Releases the device before collecting the recording so every
    /// delivered chunk is in it.
    fn close_detection(&mut self) -> Option<Recording> {
        if !std::mem::replace(&mut self.detecting, false) {
            return None;
        }
        if let Err(err) = self.device.close() {
            tracing::warn!(%err, "closing microphone failed");
        }
        match self.capture.finish_take() {
            Ok(recording) => recording,
            Err(err) => {
                tracing::warn!(%err, "take recording lost");
                None
            }
        }
    }

    fn sample_pitch(&mut self, now: Duration) -> usize {
        let before = self.stream.len();
        let appended = self
            .sampler
            .advance(now, self.capture.latest(), &mut self.stream);
        if !self.subscribers.is_empty() {
            for index in before..self.stream.len() {
                let semitone = self.stream.as_slice()[index];
                self.emit(SessionEvent::PitchSampled { index, semitone });
            }
        }
        appended
    }

    fn reset_position(&mut self) {
        self.position_ms = 0.0;
        self.anchor = ViewAnchor::Live;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "session state");
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("disconnecting event subscriber that stopped reading");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    fn require_melody(&self) -> Result<f64> {
        self.melody
            .as_ref()
            .map(|melody| melody.total_duration_ms)
            .ok_or(PracticeError::NotLoaded)
    }

    fn invalid(&self, action: &'static str) -> PracticeError {
        PracticeError::InvalidState {
            action,
            state: self.state,
        }
    }

    fn song_id(&self) -> &str {
        self.melody.as_ref().map_or("", |melody| melody.song_id.as_str())
    }
}

impl<D, T> fmt::Debug for SessionController<D, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("position_ms", &self.position_ms)
            .field("anchor", &self.anchor)
            .field("detecting", &self.detecting)
            .field("samples", &self.stream.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
