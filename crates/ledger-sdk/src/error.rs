use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task queue full for key '{0}'")]
    QueueOverflow(String),

    #[error("Task timed out (correlation id: {0})")]
    Timeout(String),

    /// Wrong password: the AEAD tag did not verify. Surfaced distinctly so a
    /// caller can say "invalid password" instead of a generic failure.
    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailure,

    #[error("Remote unavailable after {attempts} attempts: {last_error}")]
    RemoteUnavailable { attempts: u32, last_error: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(#[from] veilnet::NetError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<sled::Error> for SdkError {
    fn from(e: sled::Error) -> Self {
        SdkError::Storage(e.to_string())
    }
}
