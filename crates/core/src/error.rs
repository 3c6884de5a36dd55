/// Result alias that carries the custom [`RhythmError`] type.
pub type Result<T> = std::result::Result<T, RhythmError>;

/// Common error type for the core crate.
///
/// Only content and configuration problems surface here. Timing anomalies are
/// absorbed by the sync clock and judgment edge cases always resolve to a
/// result, so neither ever produces an error.
#[derive(Debug, thiserror::Error)]
pub enum RhythmError {
    /// The source track could not be decoded, no voice survived the minimum
    /// event filter, or the resulting timeline is empty. `cause` carries the
    /// decode failure when there was one.
    #[error("track contains no playable content")]
    NoPlayableContent {
        #[source]
        cause: Option<Box<RhythmError>>,
    },
    /// The source track parsed but its structure is unusable. Reported as the
    /// cause of [`RhythmError::NoPlayableContent`].
    #[error("invalid track: {0}")]
    InvalidTrack(String),
    /// A configuration value violates an ordering or range constraint.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around MIDI decoding errors.
    #[error("midi: {0}")]
    Midi(#[from] midly::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl RhythmError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Content error without an underlying decode failure.
    pub fn no_playable_content() -> Self {
        Self::NoPlayableContent { cause: None }
    }

    /// Folds a decode failure into the single content error.
    pub(crate) fn unplayable(cause: RhythmError) -> Self {
        tracing::warn!(error = %cause, "source track has no playable content");
        Self::NoPlayableContent {
            cause: Some(Box::new(cause)),
        }
    }

    pub(crate) fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<&str> for RhythmError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for RhythmError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
