//! Core library for the pitch practice engine.
//!
//! Microphone audio is reduced to a fixed-interval stream of semitones and
//! aligned with playback position, melody targets and lyrics on one
//! timeline. Each module owns one subsystem (capture, estimation, sampling,
//! playback, view mapping, etc.) and the [`SessionController`] ties them
//! together.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod mapping;
pub mod melody;
pub mod playback;
pub mod record;
pub mod render;
pub mod session;
pub mod timeline;

pub use analysis::{semitone_for, PitchEstimator, Semitone, NO_PITCH};
pub use assets::{SongAssets, SongCatalog};
#[cfg(feature = "cpal")]
pub use audio::CpalInput;
pub use audio::{CaptureEngine, CaptureHandle, CaptureRequest, InputDevice, LatestPitch, ReplayInput};
pub use config::{
    AppConfig, AudioConfig, EstimatorConfig, PlaybackConfig, SamplingConfig, SessionConfig,
    ViewConfig,
};
pub use error::{PracticeError, Result};
pub use mapping::{ScoreView, ViewAnchor, ViewMapper};
pub use melody::{
    is_match, lyric_lines_at, parse_lyrics_json, target_pitch_at, JsonMelodyFile, LyricEntry,
    LyricLines, MelodyData, MelodyNote, MelodyProvider, TakeSummary,
};
pub use playback::{ClockedTransport, PlaybackBridge, Source, Transport};
pub use record::{Recording, TakeRecorder};
pub use render::ScoreFrame;
pub use session::{SessionController, SessionEvent, SessionSnapshot, SessionState, TickReport};
pub use timeline::{Clock, ManualClock, PitchStream, SamplingClock, SystemClock};
