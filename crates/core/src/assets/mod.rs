use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{JsonMelodyFile, PracticeError, Result};

/// Files that make up one practicable song. Relative paths resolve against
/// the catalog's base directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongAssets {
    pub song_id: String,
    pub title: String,
    pub melody: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accompaniment: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_vocal: Option<PathBuf>,
}

impl SongAssets {
    pub fn new(song_id: impl Into<String>, title: impl Into<String>, melody: impl Into<PathBuf>) -> Self {
        Self {
            song_id: song_id.into(),
            title: title.into(),
            melody: melody.into(),
            lyrics: None,
            accompaniment: None,
            guide_vocal: None,
        }
    }

    pub fn with_lyrics(mut self, lyrics: impl Into<PathBuf>) -> Self {
        self.lyrics = Some(lyrics.into());
        self
    }
}

/// Registry of songs by id.
#[derive(Debug, Default)]
pub struct SongCatalog {
    base_dir: PathBuf,
    songs: BTreeMap<String, SongAssets>,
}

impl SongCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a JSON array of [`SongAssets`]. Paths inside resolve relative to
    /// the catalog file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PracticeError::DataLoad(format!("{}: {e}", path.display())))?;
        let songs: Vec<SongAssets> = serde_json::from_str(&contents)
            .map_err(|e| PracticeError::DataLoad(format!("song catalog: {e}")))?;

        let mut catalog = Self {
            base_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            songs: BTreeMap::new(),
        };
        for song in songs {
            catalog.register(song);
        }
        tracing::debug!(songs = catalog.songs.len(), "song catalog loaded");
        Ok(catalog)
    }

    pub fn register(&mut self, song: SongAssets) {
        self.songs.insert(song.song_id.clone(), song);
    }

    pub fn song(&self, song_id: &str) -> Result<&SongAssets> {
        self.songs
            .get(song_id)
            .ok_or_else(|| PracticeError::DataLoad(format!("unknown song `{song_id}`")))
    }

    pub fn songs(&self) -> impl Iterator<Item = &SongAssets> {
        self.songs.values()
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.base_dir.join(relative)
    }

    /// Melody provider for a registered song.
    pub fn melody_source(&self, song_id: &str) -> Result<JsonMelodyFile> {
        let song = self.song(song_id)?;
        let mut source = JsonMelodyFile::new(self.resolve(&song.melody));
        if let Some(lyrics) = &song.lyrics {
            source = source.with_lyrics(self.resolve(lyrics));
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MelodyProvider;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn resolves_registered_songs() {
        let mut catalog = SongCatalog::new();
        catalog.register(SongAssets::new("demo", "Demo", "demo.json"));

        assert_eq!(catalog.song("demo").unwrap().title, "Demo");
        assert_eq!(catalog.songs().count(), 1);
    }

    #[test]
    fn errors_on_unknown_songs() {
        let catalog = SongCatalog::new();
        let err = catalog.song("missing-song").unwrap_err();
        assert!(format!("{err}").contains("missing-song"));
        assert!(catalog.melody_source("missing-song").is_err());
    }

    #[test]
    fn loads_melody_through_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "songs.json",
            r#"[{"songId": "demo", "title": "Demo", "melody": "demo.json", "lyrics": "demo-lyrics.json"}]"#,
        );
        write(
            dir.path(),
            "demo.json",
            r#"{"songId": "demo", "totalDurationMs": 3000,
                "notes": [{"startMs": 0, "endMs": 1000, "pitch": 60}]}"#,
        );
        write(dir.path(), "demo-lyrics.json", r#"[{"time": 0.5, "lyric": "hello"}]"#);

        let catalog = SongCatalog::load(dir.path().join("songs.json")).unwrap();
        let melody = catalog.melody_source("demo").unwrap().load().unwrap();

        assert_eq!(melody.notes.len(), 1);
        assert_eq!(melody.lyrics[0].time_ms, 500.0);
    }
}
