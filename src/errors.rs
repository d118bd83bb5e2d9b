use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColorBotError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller logic error: bad rectangle, negative duration, malformed signature.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Capture unavailable after {failures} consecutive failures")]
    CaptureExhausted { failures: u32 },

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Task cancelled")]
    Cancelled,
}

impl ColorBotError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    /// Errors that must halt the orchestration loop instead of skipping a cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CaptureExhausted { .. } | Self::Join(_))
    }
}

impl serde::Serialize for ColorBotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type ColorBotResult<T> = Result<T, ColorBotError>;
