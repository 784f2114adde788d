use std::{f32::consts::PI, sync::Arc, time::Duration};

use pitch_practice_core::{
    AppConfig, CaptureHandle, CaptureRequest, ClockedTransport, InputDevice, ManualClock,
    MelodyData, MelodyNote, PlaybackBridge, PracticeError, ReplayInput, Result, SessionController,
    SessionEvent, SessionState, Source, Transport, NO_PITCH,
};

const SAMPLE_RATE: u32 = 44_100;

/// Device that grants access a fixed number of times and then refuses it,
/// like a permission prompt the user later denies. It never delivers audio.
#[derive(Debug, Default)]
struct GatedInput {
    grants: u32,
    attempts: u32,
    open: bool,
}

impl GatedInput {
    fn denying() -> Self {
        Self::default()
    }

    fn granting(grants: u32) -> Self {
        Self {
            grants,
            ..Self::default()
        }
    }
}

impl InputDevice for GatedInput {
    fn open(&mut self, _request: &CaptureRequest, _sink: CaptureHandle) -> Result<()> {
        self.attempts += 1;
        if self.grants == 0 {
            return Err(PracticeError::DeviceDenied("permission refused".to_string()));
        }
        self.grants -= 1;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn sine(frequency: f32, seconds: f32) -> Vec<f32> {
    let len = (seconds * SAMPLE_RATE as f32) as usize;
    (0..len)
        .map(|i| 0.2 * (2.0 * PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

fn melody(total_ms: f64) -> MelodyData {
    MelodyData::new(
        "demo",
        total_ms,
        vec![
            MelodyNote::new(0.0, 1_000.0, 69),
            MelodyNote::new(1_000.0, 2_000.0, 72),
        ],
    )
}

fn build_session_with<D: InputDevice>(
    config: AppConfig,
    device: D,
    duration_secs: f64,
) -> (Arc<ManualClock>, SessionController<D, ClockedTransport>) {
    let clock = Arc::new(ManualClock::new());
    let bridge = PlaybackBridge::with_sources(
        ClockedTransport::new(clock.clone(), duration_secs),
        ClockedTransport::new(clock.clone(), duration_secs),
    );
    let mut session = SessionController::new(config, clock.clone(), device, bridge).unwrap();
    session.set_melody(melody(duration_secs * 1000.0)).unwrap();
    (clock, session)
}

fn build_session(
    duration_secs: f64,
) -> (Arc<ManualClock>, SessionController<ReplayInput, ClockedTransport>) {
    let device = ReplayInput::new(sine(440.0, duration_secs as f32), SAMPLE_RATE);
    build_session_with(AppConfig::default(), device, duration_secs)
}

/// Advances time in 10 ms steps, feeding the matching audio and ticking the
/// session after each step.
fn run_for(
    clock: &ManualClock,
    session: &mut SessionController<ReplayInput, ClockedTransport>,
    millis: u64,
) {
    for _ in 0..millis / 10 {
        clock.advance(Duration::from_millis(10));
        session.device_mut().pump_millis(10.0).unwrap();
        session.tick();
    }
}

fn position(session: &SessionController<ReplayInput, ClockedTransport>, source: Source) -> f64 {
    session.bridge().transport(source).unwrap().position_secs()
}

#[test]
fn sung_pitch_reaches_the_stream() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();

    run_for(&clock, &mut session, 500);

    let stream = session.stream().as_slice();
    assert_eq!(stream.len(), 20);
    assert!(stream.iter().filter(|&&s| s == 69).count() >= 19);
    assert_eq!(session.stream().last(), Some(69));
    assert_eq!(session.position_ms(), 500.0);
    assert!(session.snapshot().matched);

    let recording = session.stop().expect("take was recorded");
    assert_eq!(recording.samples().len(), 22_050);
    assert_eq!(session.last_recording(), Some(&recording));
}

#[test]
fn stream_length_follows_elapsed_intervals() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();

    for step in [7, 16, 16, 33, 16, 1, 120, 16] {
        clock.advance(Duration::from_millis(step));
        session.tick();
    }

    assert_eq!(session.stream().len(), 225 / 25);
}

#[test]
fn toggle_guide_vocal_keeps_position() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();
    clock.advance(Duration::from_secs(5));
    session.tick();

    assert_eq!(session.toggle_guide_vocal(), Some(5_000.0));

    assert_eq!(session.active_source(), Source::GuideVocal);
    assert_eq!(position(&session, Source::Accompaniment), 5.0);
    assert_eq!(position(&session, Source::GuideVocal), 5.0);
    let playing = [Source::Accompaniment, Source::GuideVocal]
        .into_iter()
        .filter(|&source| session.bridge().transport(source).unwrap().is_playing())
        .count();
    assert_eq!(playing, 1);
    assert_eq!(session.position_ms(), 5_000.0);

    clock.advance(Duration::from_secs(1));
    session.tick();
    assert_eq!(session.position_ms(), 6_000.0);
    assert!(session.is_practicing());
}

#[test]
fn stop_then_start_resets_take() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();
    run_for(&clock, &mut session, 1_000);
    session.stop();
    assert_eq!(session.position_ms(), 1_000.0);

    session.start().unwrap();

    assert!(session.stream().is_empty());
    assert_eq!(session.position_ms(), 0.0);
    assert_eq!(session.device().open_count(), 2);
}

#[test]
fn stop_then_resume_keeps_position_and_samples() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();
    run_for(&clock, &mut session, 1_000);
    session.stop();
    let before = session.stream().as_slice().to_vec();
    assert_eq!(before.len(), 40);

    clock.advance(Duration::from_secs(5));
    session.tick();
    assert_eq!(session.stream().len(), 40);

    session.resume().unwrap();
    assert_eq!(session.state(), SessionState::Practicing);
    assert_eq!(session.position_ms(), 1_000.0);
    assert!(session.is_detecting());

    run_for(&clock, &mut session, 100);
    assert_eq!(session.position_ms(), 1_100.0);
    assert_eq!(session.stream().len(), 44);
    assert_eq!(&session.stream().as_slice()[..40], before.as_slice());
}

#[test]
fn resume_without_detection_only_restarts_audio() {
    let mut config = AppConfig::default();
    config.session.resume_restarts_detection = false;
    let device = ReplayInput::new(sine(440.0, 5.0), SAMPLE_RATE);
    let (clock, mut session) = build_session_with(config, device, 30.0);

    session.start().unwrap();
    run_for(&clock, &mut session, 500);
    session.stop();
    session.resume().unwrap();
    run_for(&clock, &mut session, 500);

    assert!(!session.is_detecting());
    assert!(!session.device().is_open());
    assert_eq!(session.stream().len(), 20);
    assert_eq!(session.position_ms(), 1_000.0);
    assert_eq!(session.device().open_count(), 1);
}

#[test]
fn resume_needs_a_position() {
    let (_clock, mut session) = build_session(30.0);
    let err = session.resume().unwrap_err();
    assert!(matches!(err, PracticeError::InvalidState { state: SessionState::Idle, .. }));

    session.seek_to(3_000.0).unwrap();
    session.resume().unwrap();
    assert_eq!(session.stream().len(), 120);
    assert!(session.stream().as_slice().iter().all(|&s| s == NO_PITCH));
}

#[test]
fn resume_after_backward_seek_replaces_later_samples() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();
    run_for(&clock, &mut session, 10_000);
    session.stop();
    let before = session.stream().as_slice().to_vec();
    assert_eq!(before.len(), 400);

    session.seek_to(2_000.0).unwrap();
    session.resume().unwrap();
    run_for(&clock, &mut session, 1_000);

    let stream = session.stream();
    assert_eq!(session.position_ms(), 3_000.0);
    assert_eq!(stream.len(), 120);
    assert_eq!(&stream.as_slice()[..80], &before[..80]);
    assert_eq!(stream.time_of(stream.len() - 1), 2_975.0);
}

#[test]
fn resume_after_end_of_track_is_refused() {
    let (clock, mut session) = build_session(2.0);
    session.start().unwrap();
    clock.advance(Duration::from_millis(2_500));
    assert!(session.tick().ended);
    let len = session.stream().len();

    let err = session.resume().unwrap_err();

    assert!(matches!(err, PracticeError::InvalidState { state: SessionState::Stopped, .. }));
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!session.bridge().is_playing());
    assert!(!session.device().is_open());
    assert_eq!(session.stream().len(), len);

    session.start().unwrap();
    assert_eq!(session.position_ms(), 0.0);
    assert!(session.stream().is_empty());
}

#[test]
fn start_while_practicing_is_rejected() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();
    run_for(&clock, &mut session, 200);

    let err = session.start().unwrap_err();

    assert!(matches!(err, PracticeError::InvalidState { state: SessionState::Practicing, .. }));
    assert!(session.is_practicing());
    assert_eq!(session.stream().len(), 8);
    assert_eq!(session.position_ms(), 200.0);
    assert_eq!(session.device().open_count(), 1);
}

#[test]
fn seeks_while_practicing_keep_playing() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();
    run_for(&clock, &mut session, 1_000);

    assert_eq!(session.seek_forward().unwrap(), 11_000.0);
    assert_eq!(session.state(), SessionState::Practicing);
    assert!(session.bridge().is_playing());
    run_for(&clock, &mut session, 500);
    assert_eq!(session.position_ms(), 11_500.0);

    assert_eq!(session.seek_to(2_000.0).unwrap(), 2_000.0);
    assert_eq!(session.state(), SessionState::Practicing);
    assert!(session.bridge().transport(Source::Accompaniment).unwrap().is_playing());
    assert_eq!(position(&session, Source::Accompaniment), 2.0);
    assert_eq!(position(&session, Source::GuideVocal), 2.0);
    assert!(session.is_detecting());
}

#[test]
fn denied_microphone_on_resume_keeps_session_stopped() {
    let (clock, mut session) = build_session_with(AppConfig::default(), GatedInput::granting(1), 30.0);
    session.start().unwrap();
    clock.advance(Duration::from_secs(1));
    session.tick();
    session.stop();
    let events = session.subscribe();

    let err = session.resume().unwrap_err();

    assert!(err.is_device_error());
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!session.bridge().is_playing());
    assert!(!session.is_detecting());
    assert!(!session.device().is_open());
    assert_eq!(session.device().attempts, 2);
    assert_eq!(session.position_ms(), 1_000.0);
    let received: Vec<SessionEvent> = events.try_iter().collect();
    assert!(matches!(received.as_slice(), [SessionEvent::DeviceFailed(_)]));
}

#[test]
fn stop_is_idempotent() {
    let (clock, mut session) = build_session(30.0);
    assert!(session.stop().is_none());
    assert_eq!(session.state(), SessionState::Idle);

    session.start().unwrap();
    run_for(&clock, &mut session, 200);
    assert!(session.stop().is_some());
    let len = session.stream().len();
    let position = session.position_ms();

    assert!(session.stop().is_none());
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.position_ms(), position);

    clock.advance(Duration::from_secs(2));
    let report = session.tick();
    assert_eq!(report.appended, 0);
    assert_eq!(report.position_ms, None);
    assert_eq!(session.stream().len(), len);
    assert!(!session.device().is_open());
}

#[test]
fn denied_microphone_keeps_session_idle() {
    let (_clock, mut session) = build_session_with(AppConfig::default(), GatedInput::denying(), 30.0);
    let events = session.subscribe();

    let err = session.start().unwrap_err();

    assert!(err.is_device_error());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.bridge().is_playing());
    assert_eq!(session.device().attempts, 1);
    let received: Vec<SessionEvent> = events.try_iter().collect();
    assert!(matches!(received.as_slice(), [SessionEvent::DeviceFailed(_)]));
}

#[test]
fn revoked_microphone_stops_the_take() {
    let (clock, mut session) = build_session(30.0);
    session.start().unwrap();
    run_for(&clock, &mut session, 100);

    session.capture().handle().report_fault("device unplugged").unwrap();
    let report = session.tick();

    assert!(report.device_lost);
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!session.device().is_open());
    assert!(!session.bridge().is_playing());
}

#[test]
fn end_of_track_stops_everything() {
    let (clock, mut session) = build_session(2.0);
    session.start().unwrap();
    clock.advance(Duration::from_millis(2_500));

    let report = session.tick();

    assert!(report.ended);
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.position_ms(), 2_000.0);
    assert!(!session.bridge().is_playing());
    assert!(!session.device().is_open());

    let len = session.stream().len();
    clock.advance(Duration::from_secs(1));
    session.tick();
    assert_eq!(session.stream().len(), len);
}

#[test]
fn seeks_clamp_and_keep_state() {
    let (_clock, mut session) = build_session(30.0);
    assert_eq!(session.seek_forward().unwrap(), 10_000.0);
    assert_eq!(session.seek_forward().unwrap(), 20_000.0);
    assert_eq!(session.seek_forward().unwrap(), 30_000.0);
    assert_eq!(session.seek_backward().unwrap(), 20_000.0);
    assert_eq!(session.seek_to(-50.0).unwrap(), 0.0);
    assert_eq!(session.seek_backward().unwrap(), 0.0);
    assert_eq!(position(&session, Source::GuideVocal), 0.0);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn lyrics_follow_playback_position() {
    let (clock, mut session) = build_session(30.0);
    let lyrics = vec![
        pitch_practice_core::LyricEntry::new(0.0, "A"),
        pitch_practice_core::LyricEntry::new(1_000.0, "B"),
        pitch_practice_core::LyricEntry::new(2_000.0, "C"),
    ];
    session.set_melody(melody(30_000.0).with_lyrics(lyrics)).unwrap();
    session.start().unwrap();
    run_for(&clock, &mut session, 1_500);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.previous_lyric.as_deref(), Some("A"));
    assert_eq!(snapshot.current_lyric.as_deref(), Some("B"));
    assert_eq!(snapshot.next_lyric.as_deref(), Some("C"));
    assert_eq!(snapshot.target_pitch, Some(72));
}
