use crate::session::SessionState;

/// Result alias that carries the custom [`PracticeError`] type.
pub type Result<T> = std::result::Result<T, PracticeError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PracticeError {
    /// Free-form message for failures that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The user or the platform refused access to the microphone.
    #[error("microphone access denied: {0}")]
    DeviceDenied(String),
    /// No usable capture device is present.
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),
    /// Melody or lyric data could not be fetched or parsed.
    #[error("failed to load song data: {0}")]
    DataLoad(String),
    #[error("no melody data loaded")]
    NotLoaded,
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
}

impl PracticeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// True for failures the user can fix by granting or connecting a
    /// microphone.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceDenied(_) | Self::DeviceUnavailable(_))
    }
}

impl From<&str> for PracticeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PracticeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
