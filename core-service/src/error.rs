use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),
}

impl CoreError {
    /// Message suitable for showing to the learner.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Playback(e) => e.user_message(),
            _ => "The player could not be started.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
