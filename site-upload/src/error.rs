use thiserror::Error;

use site_blob::BlobError;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors surfaced by the upload pipeline
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Validation failed for {file}: {source}")]
    Validation {
        file: String,
        #[source]
        source: ValidationError,
    },

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Upload item not found: {0}")]
    NotFound(String),

    #[error("Upload item {id} is {state}, expected {expected}")]
    InvalidState {
        id: String,
        state: String,
        expected: String,
    },

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn validation(file: impl Into<String>, source: ValidationError) -> Self {
        Self::Validation {
            file: file.into(),
            source,
        }
    }

    pub fn invalid_state(id: impl Into<String>, state: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidState {
            id: id.into(),
            state: state.into(),
            expected: expected.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Submission-time rejection; the file never enters the item store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file is empty")]
    Empty,

    #[error("unsupported file type: {mime_type}")]
    UnsupportedType { mime_type: String },

    #[error("file too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },
}

/// A single transfer attempt failed
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("storage error: {0}")]
    Storage(#[from] BlobError),

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Image decode/encode failure. Recovered by keeping the original bytes.
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("image encode failed: {0}")]
    Encode(String),

    #[error("codec task failed: {0}")]
    Task(String),
}
