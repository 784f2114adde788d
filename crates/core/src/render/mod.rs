use serde::Serialize;

use crate::{
    analysis::{Semitone, NO_PITCH},
    melody::{is_match, target_pitch_at},
    MelodyData, PitchStream, ScoreView,
};

const NOTE_BAR_HEIGHT: f64 = 12.0;
const SUNG_BAR_HEIGHT: f64 = 8.0;
const MIN_BAR_WIDTH: f64 = 2.0;

/// Horizontal semitone row. C rows are drawn heavier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridLine {
    pub pitch: Semitone,
    pub y: f64,
    pub is_c: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarLine {
    pub time_ms: f64,
    pub x: f64,
}

/// Rectangle for one melody note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteBar {
    pub pitch: Semitone,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Rectangle for one sampled pitch of the take.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SungBar {
    pub index: usize,
    pub pitch: Semitone,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub matched: bool,
}

/// Display primitives for one refresh of the scrolling score. Presentation
/// layers draw these as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreFrame {
    pub view: ScoreView,
    pub grid: Vec<GridLine>,
    pub bar_lines: Vec<BarLine>,
    pub notes: Vec<NoteBar>,
    pub sung: Vec<SungBar>,
    pub cursor_x: f64,
}

impl ScoreFrame {
    pub fn build(
        view: ScoreView,
        melody: &MelodyData,
        stream: &PitchStream,
        cursor_ms: f64,
    ) -> Self {
        let grid = view
            .pitch_rows()
            .map(|pitch| GridLine {
                pitch,
                y: view.y(pitch),
                is_c: pitch.rem_euclid(12) == 0,
            })
            .collect();

        let bar_lines = view
            .bar_times()
            .into_iter()
            .map(|time_ms| BarLine {
                time_ms,
                x: view.x(time_ms),
            })
            .filter(|line| (0.0..=view.width).contains(&line.x))
            .collect();

        let notes = melody
            .notes
            .iter()
            .filter(|note| note.end_ms > view.start_ms && note.start_ms < view.end_ms)
            .map(|note| {
                let x = view.x(note.start_ms);
                NoteBar {
                    pitch: note.pitch,
                    x,
                    y: view.y(note.pitch) - NOTE_BAR_HEIGHT / 2.0,
                    width: (view.x(note.end_ms) - x).max(MIN_BAR_WIDTH),
                    height: NOTE_BAR_HEIGHT,
                }
            })
            .collect();

        let interval = stream.interval_ms() as f64;
        let sung = stream
            .within(view.start_ms, view.end_ms)
            .filter(|&(_, _, pitch)| pitch != NO_PITCH && view.contains_pitch(pitch))
            .filter_map(|(index, time_ms, pitch)| {
                let x = view.x(time_ms);
                let width = (view.x(time_ms + interval) - x).max(MIN_BAR_WIDTH);
                if x + width < 0.0 || x > view.width {
                    return None;
                }
                Some(SungBar {
                    index,
                    pitch,
                    x,
                    y: view.y(pitch) - SUNG_BAR_HEIGHT / 2.0,
                    width,
                    height: SUNG_BAR_HEIGHT,
                    matched: is_match(pitch, target_pitch_at(&melody.notes, time_ms)),
                })
            })
            .collect();

        Self {
            cursor_x: view.x(cursor_ms),
            view,
            grid,
            bar_lines,
            notes,
            sung,
        }
    }

    pub fn matched_count(&self) -> usize {
        self.sung.iter().filter(|bar| bar.matched).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ViewConfig, MelodyNote, ViewMapper};

    fn unshifted_mapper() -> ViewMapper {
        ViewMapper::new(ViewConfig {
            octave_margin_above: 0,
            top_offset_semitones: 0,
            bottom_offset_semitones: 0,
            ..ViewConfig::default()
        })
    }

    fn build_melody() -> MelodyData {
        MelodyData::new(
            "song",
            8_000.0,
            vec![
                MelodyNote::new(0.0, 500.0, 60),
                MelodyNote::new(500.0, 1_000.0, 62),
                MelodyNote::new(5_000.0, 6_000.0, 67),
            ],
        )
    }

    fn build_stream(pitches: &[Semitone]) -> PitchStream {
        let mut stream = PitchStream::new(25);
        for &pitch in pitches {
            stream.push(pitch);
        }
        stream
    }

    #[test]
    fn frame_contains_visible_primitives() {
        let melody = build_melody();
        let view = ViewMapper::default().map(0.0, &melody).unwrap();
        let frame = ScoreFrame::build(view.clone(), &melody, &build_stream(&[]), 0.0);

        assert_eq!(frame.grid.len(), (view.max_pitch - view.min_pitch + 1) as usize);
        assert!(frame.grid.iter().any(|line| line.is_c && line.pitch == 72));
        assert_eq!(frame.notes.len(), 2);
        assert_eq!(frame.notes[0].height, 12.0);
        assert_eq!(frame.cursor_x, 0.0);
        let bars: Vec<f64> = frame.bar_lines.iter().map(|bar| bar.time_ms).collect();
        assert_eq!(bars, vec![0.0, 2_000.0]);
    }

    #[test]
    fn sung_bars_skip_silence_and_off_range_pitches() {
        let melody = build_melody();
        let view = unshifted_mapper().map(0.0, &melody).unwrap();
        let stream = build_stream(&[60, 0, 64, 5]);

        let frame = ScoreFrame::build(view, &melody, &stream, 0.0);

        let sung: Vec<_> = frame.sung.iter().map(|bar| (bar.index, bar.matched)).collect();
        assert_eq!(sung, vec![(0, true), (2, false)]);
        assert_eq!(frame.matched_count(), 1);
        assert!(frame.sung.iter().all(|bar| bar.width >= 2.0 && bar.height == 8.0));
    }
}
