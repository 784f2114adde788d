use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{analysis::Semitone, audio::LatestPitch};

/// Monotonic time source shared by transports and the session driver.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Used for offline replay and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, delta: Duration) {
        self.micros
            .fetch_add(delta.as_micros() as u64, Ordering::AcqRel);
    }

    pub fn set(&self, at: Duration) {
        self.micros.store(at.as_micros() as u64, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Acquire))
    }
}

/// Append-only sequence of per-interval semitones for the current take.
/// Index `i` corresponds to `i * interval_ms` from the start of the take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchStream {
    interval_ms: u64,
    samples: Vec<Semitone>,
}

impl PitchStream {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            samples: Vec::new(),
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn push(&mut self, semitone: Semitone) {
        self.samples.push(semitone);
    }

    /// Replaces the contents with an empty stream for a new take.
    pub fn clear(&mut self) {
        self.samples = Vec::new();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[Semitone] {
        &self.samples
    }

    pub fn get(&self, index: usize) -> Option<Semitone> {
        self.samples.get(index).copied()
    }

    pub fn last(&self) -> Option<Semitone> {
        self.samples.last().copied()
    }

    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 * self.interval_ms as f64
    }

    /// Index of the sample covering `time_ms`, whether or not it exists yet.
    pub fn index_at(&self, time_ms: f64) -> usize {
        if time_ms <= 0.0 {
            return 0;
        }
        (time_ms / self.interval_ms as f64).floor() as usize
    }

    /// Samples whose timestamps fall inside `[start_ms, end_ms]`, as
    /// `(index, time_ms, semitone)`.
    pub fn within(
        &self,
        start_ms: f64,
        end_ms: f64,
    ) -> impl Iterator<Item = (usize, f64, Semitone)> + '_ {
        let interval = self.interval_ms as f64;
        let first = (start_ms.max(0.0) / interval).ceil() as usize;
        let last = if end_ms < 0.0 {
            None
        } else {
            Some((end_ms / interval).floor() as usize)
        };
        let upper = match last {
            Some(last) if !self.samples.is_empty() => (last + 1).min(self.samples.len()),
            _ => 0,
        };
        (first..upper.max(first))
            .map(move |index| (index, index as f64 * interval, self.samples[index]))
    }

    /// Makes the stream exactly `len` samples long. Samples at or past `len`
    /// are dropped and missing ones are filled with `fill`, so the next push
    /// lands at index `len`.
    pub(crate) fn align_to(&mut self, len: usize, fill: Semitone) {
        self.samples.resize(len, fill);
    }
}

/// Fixed-cadence sampler that turns the latest estimate into stream
/// appends.
///
/// The clock is cooperative: the owner calls [`advance`](Self::advance) with
/// the current time and every tick that has fallen due since start is
/// emitted in order. Ticks fire at `k * interval` for `k >= 1`, so running
/// for `D` yields `floor(D / interval)` samples. A due tick always reads the
/// slot, so ticks without a fresh estimate repeat the previous value.
#[derive(Debug, Clone)]
pub struct SamplingClock {
    interval: Duration,
    started_at: Option<Duration>,
    emitted: u64,
}

impl SamplingClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            started_at: None,
            emitted: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(&mut self, now: Duration) {
        self.started_at = Some(now);
        self.emitted = 0;
    }

    /// After this returns, `advance` appends nothing until the next `start`.
    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn due_ticks(&self, now: Duration) -> u64 {
        let Some(started_at) = self.started_at else {
            return 0;
        };
        let elapsed = now.saturating_sub(started_at);
        let total = (elapsed.as_nanos() / self.interval.as_nanos()) as u64;
        total.saturating_sub(self.emitted)
    }

    /// Emits all due ticks into `stream` and returns how many were appended.
    pub fn advance(
        &mut self,
        now: Duration,
        latest: &LatestPitch,
        stream: &mut PitchStream,
    ) -> usize {
        let due = self.due_ticks(now);
        for _ in 0..due {
            stream.push(latest.load());
        }
        self.emitted += due;
        due as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::NO_PITCH;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn stream_length_tracks_elapsed_intervals() {
        let latest = LatestPitch::new();
        let mut stream = PitchStream::new(25);
        let mut clock = SamplingClock::new(ms(25));
        clock.start(ms(1_000));

        for step in 1..=40 {
            clock.advance(ms(1_000 + step * 16), &latest, &mut stream);
        }

        assert_eq!(stream.len(), (40 * 16) / 25);
    }

    #[test]
    fn ticks_read_latest_value_in_order() {
        let latest = LatestPitch::new();
        let mut stream = PitchStream::new(25);
        let mut clock = SamplingClock::new(ms(25));
        clock.start(ms(0));

        latest.store(60);
        clock.advance(ms(30), &latest, &mut stream);
        latest.store(62);
        clock.advance(ms(55), &latest, &mut stream);
        clock.advance(ms(80), &latest, &mut stream);
        latest.clear();
        clock.advance(ms(100), &latest, &mut stream);

        assert_eq!(stream.as_slice(), &[60, 62, 62, NO_PITCH]);
    }

    #[test]
    fn stop_halts_appends() {
        let latest = LatestPitch::new();
        let mut stream = PitchStream::new(25);
        let mut clock = SamplingClock::new(ms(25));
        clock.start(ms(0));
        clock.advance(ms(50), &latest, &mut stream);
        clock.stop();

        assert_eq!(clock.advance(ms(10_000), &latest, &mut stream), 0);
        assert_eq!(stream.len(), 2);
        assert!(!clock.is_running());
    }

    #[test]
    fn window_query_maps_indices_to_time() {
        let mut stream = PitchStream::new(25);
        for semitone in [60, 61, 62, 63, 64] {
            stream.push(semitone);
        }

        let hits: Vec<_> = stream.within(30.0, 200.0).collect();
        assert_eq!(hits, vec![(2, 50.0, 62), (3, 75.0, 63), (4, 100.0, 64)]);
        assert_eq!(stream.within(-50.0, -1.0).count(), 0);
        assert_eq!(stream.index_at(74.9), 2);
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(ms(40));
        clock.advance(ms(2));
        assert_eq!(clock.now(), ms(42));
        clock.set(ms(5));
        assert_eq!(clock.now(), ms(5));
    }
}
