// Media library error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaLibError {
    /// Transient: the database was locked by another statement.
    #[error("Database busy: {0}")]
    DbBusy(String),

    #[error("Constraint violation: {0}")]
    DbConstraint(String),

    #[error("Database corrupted: {0}")]
    DbCorrupt(String),

    #[error("Database error: {0}")]
    DbGeneric(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start decoder: {0}")]
    DecoderStart(String),

    #[error("Decoder timed out: {0}")]
    DecoderTimeout(String),

    #[error("Thumbnail compression failed: {0}")]
    ThumbnailCompress(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for MediaLibError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                let text = msg.clone().unwrap_or_else(|| e.to_string());
                match e.code {
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                        MediaLibError::DbBusy(text)
                    }
                    ErrorCode::ConstraintViolation => MediaLibError::DbConstraint(text),
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                        MediaLibError::DbCorrupt(text)
                    }
                    _ => MediaLibError::DbGeneric(text),
                }
            }
            _ => MediaLibError::DbGeneric(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for MediaLibError {
    fn from(err: anyhow::Error) -> Self {
        MediaLibError::DbGeneric(err.to_string())
    }
}

impl MediaLibError {
    /// Constraint violations are often benign (row already scheduled,
    /// duplicate artist); callers use this to decide whether to recover.
    pub fn is_constraint(&self) -> bool {
        matches!(self, MediaLibError::DbConstraint(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, MediaLibError::DbBusy(_))
    }
}

pub type Result<T> = std::result::Result<T, MediaLibError>;
