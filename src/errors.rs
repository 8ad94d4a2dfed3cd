use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported image type: {path}. Accepted: png, jpg, jpeg, gif, webp, bmp.")]
    InvalidFileType { path: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid destination {channel_id}: {reason}")]
    InvalidDestination { channel_id: String, reason: String },

    #[error("Unauthorized ({status}): the token was rejected")]
    Unauthorized { status: u16 },

    #[error("Rate limited. Retry after {retry_after_ms}ms")]
    RateLimit { retry_after_ms: u64 },

    #[error("Attachment error for {path}: {reason}")]
    Attachment { path: String, reason: String },

    #[error("Discord API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Profile error: {0}")]
    Profile(String),

    #[error("Worker not found at {path}")]
    WorkerNotFound { path: String },

    #[error("Worker exited with code {code}: {stderr}")]
    WorkerFailed { code: i32, stderr: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn invalid_file_type(path: &str) -> Self {
        Self::InvalidFileType {
            path: path.to_string(),
        }
    }

    pub fn invalid_destination(channel_id: &str, reason: &str) -> Self {
        Self::InvalidDestination {
            channel_id: channel_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn attachment(path: &str, reason: impl ToString) -> Self {
        Self::Attachment {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors that belong to a single target and must not stop the batch.
    pub fn is_target_local(&self) -> bool {
        matches!(
            self,
            AppError::Network(_)
                | AppError::InvalidDestination { .. }
                | AppError::Unauthorized { .. }
                | AppError::RateLimit { .. }
                | AppError::Attachment { .. }
                | AppError::Api { .. }
                | AppError::FileNotFound { .. }
                | AppError::InvalidFileType { .. }
                | AppError::Validation { .. }
        )
    }
}
