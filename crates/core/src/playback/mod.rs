use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Clock, Result};

/// The two interchangeable audio renditions of a song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Backing track without the lead vocal.
    Accompaniment,
    /// Full mix including the guide vocal.
    GuideVocal,
}

impl Source {
    pub fn other(self) -> Self {
        match self {
            Source::Accompaniment => Source::GuideVocal,
            Source::GuideVocal => Source::Accompaniment,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Accompaniment => f.write_str("accompaniment"),
            Source::GuideVocal => f.write_str("guide vocal"),
        }
    }
}

/// Media element capability. Positions are in seconds, volume in `[0, 1]`.
pub trait Transport {
    /// Starts or resumes playback. May be refused by the backend.
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn is_playing(&self) -> bool;
    fn position_secs(&self) -> f64;
    fn set_position_secs(&mut self, secs: f64);
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    /// Reports the end-of-media notification once, then resets it.
    fn take_ended(&mut self) -> bool;
}

/// Media stand-in whose position advances with a shared [`Clock`].
///
/// Playback stops at `duration` and raises a single ended notification.
/// Calling `play` at the end restarts from zero.
#[derive(Debug)]
pub struct ClockedTransport {
    clock: Arc<dyn Clock>,
    duration_secs: f64,
    anchor_secs: f64,
    playing_since: Option<Duration>,
    volume: f32,
}

impl ClockedTransport {
    pub fn new(clock: Arc<dyn Clock>, duration_secs: f64) -> Self {
        Self {
            clock,
            duration_secs: duration_secs.max(0.0),
            anchor_secs: 0.0,
            playing_since: None,
            volume: 1.0,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn running_position(&self) -> f64 {
        match self.playing_since {
            Some(since) => {
                let elapsed = self.clock.now().saturating_sub(since).as_secs_f64();
                (self.anchor_secs + elapsed).min(self.duration_secs)
            }
            None => self.anchor_secs,
        }
    }
}

impl Transport for ClockedTransport {
    fn play(&mut self) -> Result<()> {
        if self.playing_since.is_some() {
            return Ok(());
        }
        if self.anchor_secs >= self.duration_secs {
            self.anchor_secs = 0.0;
        }
        self.playing_since = Some(self.clock.now());
        Ok(())
    }

    fn pause(&mut self) {
        self.anchor_secs = self.running_position();
        self.playing_since = None;
    }

    fn is_playing(&self) -> bool {
        self.playing_since.is_some() && self.running_position() < self.duration_secs
    }

    fn position_secs(&self) -> f64 {
        self.running_position()
    }

    fn set_position_secs(&mut self, secs: f64) {
        self.anchor_secs = secs.clamp(0.0, self.duration_secs);
        if self.playing_since.is_some() {
            self.playing_since = Some(self.clock.now());
        }
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn take_ended(&mut self) -> bool {
        if self.playing_since.is_some() && self.running_position() >= self.duration_secs {
            self.anchor_secs = self.duration_secs;
            self.playing_since = None;
            return true;
        }
        false
    }
}

/// Reconciles the two independently clocked sources into one position.
///
/// Only the active source is ever audible. Missing transports (not attached
/// yet) turn every operation into a no-op.
#[derive(Debug)]
pub struct PlaybackBridge<T> {
    accompaniment: Option<T>,
    guide_vocal: Option<T>,
    active: Source,
}

impl<T> Default for PlaybackBridge<T> {
    fn default() -> Self {
        Self {
            accompaniment: None,
            guide_vocal: None,
            active: Source::Accompaniment,
        }
    }
}

impl<T: Transport> PlaybackBridge<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(accompaniment: T, guide_vocal: T) -> Self {
        Self {
            accompaniment: Some(accompaniment),
            guide_vocal: Some(guide_vocal),
            active: Source::Accompaniment,
        }
    }

    pub fn attach(&mut self, source: Source, transport: T) {
        *self.slot_mut(source) = Some(transport);
    }

    pub fn detach(&mut self, source: Source) -> Option<T> {
        self.slot_mut(source).take()
    }

    pub fn transport(&self, source: Source) -> Option<&T> {
        match source {
            Source::Accompaniment => self.accompaniment.as_ref(),
            Source::GuideVocal => self.guide_vocal.as_ref(),
        }
    }

    pub fn transport_mut(&mut self, source: Source) -> Option<&mut T> {
        self.slot_mut(source).as_mut()
    }

    pub fn active(&self) -> Source {
        self.active
    }

    pub fn is_ready(&self) -> bool {
        self.accompaniment.is_some() && self.guide_vocal.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.transports().any(|transport| transport.is_playing())
    }

    /// Position of whichever source is playing, preferring the active one,
    /// in milliseconds. `None` when nothing plays.
    pub fn refresh(&self) -> Option<f64> {
        [self.active, self.active.other()]
            .into_iter()
            .filter_map(|source| self.transport(source))
            .find(|transport| transport.is_playing())
            .map(|transport| transport.position_secs() * 1000.0)
    }

    /// Position of the active source in milliseconds, playing or not.
    pub fn active_position(&self) -> Option<f64> {
        self.transport(self.active)
            .map(|transport| transport.position_secs() * 1000.0)
    }

    pub fn play_active(&mut self) {
        let active = self.active;
        if let Some(transport) = self.transport_mut(active) {
            if let Err(err) = transport.play() {
                tracing::warn!(%err, source = %active, "playback refused");
            }
        }
    }

    pub fn pause_all(&mut self) {
        for source in [Source::Accompaniment, Source::GuideVocal] {
            if let Some(transport) = self.transport_mut(source) {
                transport.pause();
            }
        }
    }

    /// Switches the audible source without a position jump and returns the
    /// shared position in milliseconds.
    pub fn toggle_guide_vocal(&mut self) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        let was_playing = self.is_playing();
        let snapshot = self.transport(self.active)?.position_secs();

        self.pause_all();
        self.set_positions(snapshot);
        self.active = self.active.other();
        if was_playing {
            self.play_active();
        }

        tracing::debug!(active = %self.active, position_secs = snapshot, "switched source");
        Some(snapshot * 1000.0)
    }

    /// Moves both sources to `target_ms` clamped to `[0, total_ms]` and
    /// returns the clamped position.
    pub fn seek_to(&mut self, target_ms: f64, total_ms: f64) -> Option<f64> {
        if !self.is_ready() || total_ms <= 0.0 {
            return None;
        }
        let clamped = if target_ms.is_finite() {
            target_ms.clamp(0.0, total_ms)
        } else {
            0.0
        };
        self.set_positions(clamped / 1000.0);
        Some(clamped)
    }

    /// Applies one volume to both sources and returns the clamped value.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        for source in [Source::Accompaniment, Source::GuideVocal] {
            if let Some(transport) = self.transport_mut(source) {
                transport.set_volume(volume);
            }
        }
        volume
    }

    pub fn volume(&self) -> Option<f32> {
        self.transport(self.active).map(|transport| transport.volume())
    }

    /// True when either source reached its end since the last poll.
    pub fn poll_ended(&mut self) -> bool {
        let mut ended = false;
        for source in [Source::Accompaniment, Source::GuideVocal] {
            if let Some(transport) = self.transport_mut(source) {
                ended |= transport.take_ended();
            }
        }
        ended
    }

    fn set_positions(&mut self, secs: f64) {
        for source in [Source::Accompaniment, Source::GuideVocal] {
            if let Some(transport) = self.transport_mut(source) {
                transport.set_position_secs(secs);
            }
        }
    }

    fn transports(&self) -> impl Iterator<Item = &T> {
        self.accompaniment.iter().chain(self.guide_vocal.iter())
    }

    fn slot_mut(&mut self, source: Source) -> &mut Option<T> {
        match source {
            Source::Accompaniment => &mut self.accompaniment,
            Source::GuideVocal => &mut self.guide_vocal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    fn build_bridge(duration_secs: f64) -> (Arc<ManualClock>, PlaybackBridge<ClockedTransport>) {
        let clock = Arc::new(ManualClock::new());
        let bridge = PlaybackBridge::with_sources(
            ClockedTransport::new(clock.clone(), duration_secs),
            ClockedTransport::new(clock.clone(), duration_secs),
        );
        (clock, bridge)
    }

    fn position(bridge: &PlaybackBridge<ClockedTransport>, source: Source) -> f64 {
        bridge.transport(source).unwrap().position_secs()
    }

    #[test]
    fn refresh_reports_playing_source_only() {
        let (clock, mut bridge) = build_bridge(60.0);
        assert_eq!(bridge.refresh(), None);

        bridge.play_active();
        clock.advance(Duration::from_millis(1_500));
        assert_eq!(bridge.refresh(), Some(1_500.0));

        bridge.pause_all();
        clock.advance(Duration::from_secs(1));
        assert_eq!(bridge.refresh(), None);
    }

    #[test]
    fn toggle_while_playing_keeps_position() {
        let (clock, mut bridge) = build_bridge(60.0);
        bridge.play_active();
        clock.advance(Duration::from_secs(5));

        let published = bridge.toggle_guide_vocal().unwrap();

        assert_eq!(published, 5_000.0);
        assert_eq!(bridge.active(), Source::GuideVocal);
        assert_eq!(position(&bridge, Source::Accompaniment), 5.0);
        assert_eq!(position(&bridge, Source::GuideVocal), 5.0);
        assert!(bridge.transport(Source::GuideVocal).unwrap().is_playing());
        assert!(!bridge.transport(Source::Accompaniment).unwrap().is_playing());

        clock.advance(Duration::from_secs(1));
        assert_eq!(bridge.refresh(), Some(6_000.0));
    }

    #[test]
    fn toggle_while_paused_stays_paused() {
        let (_clock, mut bridge) = build_bridge(60.0);
        bridge.seek_to(12_000.0, 60_000.0);

        assert_eq!(bridge.toggle_guide_vocal(), Some(12_000.0));
        assert!(!bridge.is_playing());
        assert_eq!(bridge.active(), Source::GuideVocal);
    }

    #[test]
    fn seek_clamps_to_track() {
        let (_clock, mut bridge) = build_bridge(30.0);
        assert_eq!(bridge.seek_to(-500.0, 30_000.0), Some(0.0));
        assert_eq!(bridge.seek_to(45_000.0, 30_000.0), Some(30_000.0));
        assert_eq!(position(&bridge, Source::GuideVocal), 30.0);
        assert_eq!(bridge.seek_to(1_000.0, 0.0), None);
    }

    #[test]
    fn missing_transports_are_no_ops() {
        let mut bridge: PlaybackBridge<ClockedTransport> = PlaybackBridge::new();
        bridge.play_active();
        bridge.pause_all();
        assert_eq!(bridge.toggle_guide_vocal(), None);
        assert_eq!(bridge.seek_to(1_000.0, 10_000.0), None);
        assert!(!bridge.poll_ended());
        assert_eq!(bridge.active(), Source::Accompaniment);
    }

    #[test]
    fn end_of_media_is_reported_once() {
        let (clock, mut bridge) = build_bridge(2.0);
        bridge.play_active();
        clock.advance(Duration::from_secs(3));

        assert!(bridge.poll_ended());
        assert!(!bridge.poll_ended());
        assert!(!bridge.is_playing());
        assert_eq!(position(&bridge, Source::Accompaniment), 2.0);
    }

    #[test]
    fn volume_is_clamped_and_shared() {
        let (_clock, mut bridge) = build_bridge(10.0);
        assert_eq!(bridge.set_volume(1.7), 1.0);
        assert_eq!(bridge.set_volume(-0.2), 0.0);
        assert_eq!(bridge.set_volume(0.4), 0.4);
        assert_eq!(bridge.transport(Source::GuideVocal).unwrap().volume(), 0.4);
        assert_eq!(bridge.volume(), Some(0.4));
    }
}
