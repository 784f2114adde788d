use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{Semitone, NO_PITCH},
    PitchStream, PracticeError, Result,
};

/// One note of the target melody, active over `[start_ms, end_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MelodyNote {
    pub start_ms: f64,
    pub end_ms: f64,
    pub pitch: Semitone,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "noteName")]
    pub name: Option<String>,
}

impl MelodyNote {
    pub fn new(start_ms: f64, end_ms: f64, pitch: Semitone) -> Self {
        Self {
            start_ms,
            end_ms,
            pitch,
            frequency: None,
            name: None,
        }
    }

    pub fn contains(&self, time_ms: f64) -> bool {
        time_ms >= self.start_ms && time_ms < self.end_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricEntry {
    pub time_ms: f64,
    pub text: String,
}

impl LyricEntry {
    pub fn new(time_ms: f64, text: impl Into<String>) -> Self {
        Self {
            time_ms,
            text: text.into(),
        }
    }
}

/// Everything the engine knows about one song. Built once per load and
/// replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MelodyData {
    pub song_id: String,
    pub total_duration_ms: f64,
    #[serde(default)]
    pub notes: Vec<MelodyNote>,
    #[serde(default)]
    pub lyrics: Vec<LyricEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
}

impl MelodyData {
    pub fn new(song_id: impl Into<String>, total_duration_ms: f64, notes: Vec<MelodyNote>) -> Self {
        Self {
            song_id: song_id.into(),
            total_duration_ms,
            notes,
            lyrics: Vec::new(),
            bpm: None,
            key: None,
            track_name: None,
        }
    }

    pub fn with_lyrics(mut self, lyrics: Vec<LyricEntry>) -> Self {
        self.lyrics = lyrics;
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = Some(bpm);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let data: MelodyData = serde_json::from_str(json)
            .map_err(|e| PracticeError::DataLoad(format!("melody JSON: {e}")))?;
        data.normalised()
    }

    /// Validates the data and puts notes and lyrics in time order.
    pub fn normalised(mut self) -> Result<Self> {
        if !self.total_duration_ms.is_finite() || self.total_duration_ms < 0.0 {
            return Err(PracticeError::DataLoad(format!(
                "song `{}` has an invalid duration",
                self.song_id
            )));
        }
        if let Some(note) = self
            .notes
            .iter()
            .find(|note| !(note.start_ms.is_finite() && note.end_ms.is_finite()) || note.start_ms >= note.end_ms)
        {
            return Err(PracticeError::DataLoad(format!(
                "note at {}ms does not end after it starts",
                note.start_ms
            )));
        }
        self.notes.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));
        self.lyrics.retain(|entry| !entry.text.trim().is_empty());
        self.lyrics.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
        if self.bpm.is_some_and(|bpm| !(bpm.is_finite() && bpm > 0.0)) {
            self.bpm = None;
        }
        Ok(self)
    }

    /// `(lowest, highest)` melody pitch, or `None` without notes.
    pub fn pitch_bounds(&self) -> Option<(Semitone, Semitone)> {
        let low = self.notes.iter().map(|note| note.pitch).min()?;
        let high = self.notes.iter().map(|note| note.pitch).max()?;
        Some((low, high))
    }

    pub fn target_at(&self, time_ms: f64) -> Option<Semitone> {
        target_pitch_at(&self.notes, time_ms)
    }

    pub fn lyric_lines_at(&self, time_ms: f64) -> LyricLines<'_> {
        lyric_lines_at(&self.lyrics, time_ms)
    }
}

/// Pitch of the first note in sequence order covering `time_ms`.
pub fn target_pitch_at(notes: &[MelodyNote], time_ms: f64) -> Option<Semitone> {
    notes
        .iter()
        .find(|note| note.contains(time_ms))
        .map(|note| note.pitch)
}

/// A sung semitone matches when it lies within one semitone of an existing
/// target. Silence never matches.
pub fn is_match(sung: Semitone, target: Option<Semitone>) -> bool {
    match target {
        Some(target) => sung != NO_PITCH && (sung - target).abs() <= 1,
        None => false,
    }
}

/// The three lyric lines shown around a position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LyricLines<'a> {
    pub previous: Option<&'a LyricEntry>,
    pub current: Option<&'a LyricEntry>,
    pub next: Option<&'a LyricEntry>,
}

/// Resolves the current line as the last entry starting at or before
/// `time_ms`. Before the first entry only `next` is set.
pub fn lyric_lines_at(lyrics: &[LyricEntry], time_ms: f64) -> LyricLines<'_> {
    let started = lyrics.partition_point(|entry| entry.time_ms <= time_ms);
    match started.checked_sub(1) {
        Some(index) => LyricLines {
            previous: index.checked_sub(1).and_then(|i| lyrics.get(i)),
            current: lyrics.get(index),
            next: lyrics.get(index + 1),
        },
        None => LyricLines {
            previous: None,
            current: None,
            next: lyrics.first(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct RawLyric {
    time: f64,
    lyric: String,
}

/// Parses the `[{ "time": seconds, "lyric": text }]` lyrics format. Blank
/// lines are dropped and entries are returned in time order.
pub fn parse_lyrics_json(json: &str) -> Result<Vec<LyricEntry>> {
    let raw: Vec<RawLyric> = serde_json::from_str(json)
        .map_err(|e| PracticeError::DataLoad(format!("lyrics JSON: {e}")))?;
    let mut entries: Vec<LyricEntry> = raw
        .into_iter()
        .filter(|entry| !entry.lyric.trim().is_empty())
        .map(|entry| LyricEntry::new(entry.time * 1000.0, entry.lyric))
        .collect();
    entries.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
    Ok(entries)
}

/// Source of [`MelodyData`]. Failures must be descriptive; the session will
/// not start practicing without a successful load.
pub trait MelodyProvider {
    fn load(&self) -> Result<MelodyData>;
}

/// Melody JSON on disk with an optional separate lyrics file.
#[derive(Debug, Clone)]
pub struct JsonMelodyFile {
    melody: PathBuf,
    lyrics: Option<PathBuf>,
}

impl JsonMelodyFile {
    pub fn new(melody: impl Into<PathBuf>) -> Self {
        Self {
            melody: melody.into(),
            lyrics: None,
        }
    }

    pub fn with_lyrics(mut self, lyrics: impl Into<PathBuf>) -> Self {
        self.lyrics = Some(lyrics.into());
        self
    }
}

impl MelodyProvider for JsonMelodyFile {
    fn load(&self) -> Result<MelodyData> {
        let mut data = MelodyData::from_json_str(&read_song_file(&self.melody)?)?;
        if let Some(lyrics) = &self.lyrics {
            data.lyrics = parse_lyrics_json(&read_song_file(lyrics)?)?;
        }
        tracing::debug!(
            song = %data.song_id,
            notes = data.notes.len(),
            lyrics = data.lyrics.len(),
            "melody loaded"
        );
        Ok(data)
    }
}

impl MelodyProvider for MelodyData {
    fn load(&self) -> Result<MelodyData> {
        self.clone().normalised()
    }
}

fn read_song_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PracticeError::DataLoad(format!("{}: {e}", path.display())))
}

/// Tick counts for a take, judged with [`is_match`] only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TakeSummary {
    pub ticks: usize,
    pub voiced: usize,
    pub targeted: usize,
    pub matched: usize,
}

impl TakeSummary {
    pub fn from_stream(stream: &PitchStream, melody: &MelodyData) -> Self {
        let mut summary = TakeSummary {
            ticks: stream.len(),
            ..Default::default()
        };
        for (index, &sung) in stream.as_slice().iter().enumerate() {
            let target = melody.target_at(stream.time_of(index));
            if sung != NO_PITCH {
                summary.voiced += 1;
            }
            if target.is_some() {
                summary.targeted += 1;
            }
            if is_match(sung, target) {
                summary.matched += 1;
            }
        }
        summary
    }

    /// Matched share of the ticks that had a target.
    pub fn match_ratio(&self) -> f64 {
        if self.targeted == 0 {
            0.0
        } else {
            self.matched as f64 / self.targeted as f64
        }
    }
}
