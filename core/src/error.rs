use thiserror::Error;

#[derive(Debug, Error)]
pub enum RofsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filesystem corrupted: {0}")]
    Corruption(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RofsResult<T> = Result<T, RofsError>;

impl RofsError {
    pub fn corruption(message: impl Into<String>) -> Self {
        RofsError::Corruption(message.into())
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        RofsError::NotSupported(message.into())
    }

    /// True for errors that describe the image rather than the medium.
    pub fn is_corruption(&self) -> bool {
        matches!(self, RofsError::Corruption(_))
    }
}
