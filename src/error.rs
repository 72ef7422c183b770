use thiserror::Error;

/// Crate-wide error type.
///
/// Admission and validation failures are returned synchronously from the
/// mutation API; commit-level failures surface through task status instead
/// (see [`crate::types::TaskStatus`]).
#[derive(Error, Debug, Clone)]
pub enum QuernError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Tenant already exists: {0}")]
    TenantAlreadyExists(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Document size {size} exceeds max {max} bytes")]
    DocumentTooLarge { size: usize, max: usize },

    #[error("Writer buffer full: {buffered} bytes buffered, max {max}")]
    WriterBufferFull { buffered: usize, max: usize },

    #[error("Too many concurrent writers: {active} active, max {max}")]
    ResourceExhausted { active: usize, max: usize },

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Import target already exists: {0} (pass overwrite to replace)")]
    ImportConflict(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Write queue full for tenant: {0}")]
    QueueFull(String),

    #[error("Remote snapshot store not configured")]
    SnapshotUnavailable,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("S3 error: {0}")]
    S3(String),
}

pub type Result<T> = std::result::Result<T, QuernError>;

impl QuernError {
    /// Whether the caller can expect the operation to succeed after backoff.
    ///
    /// True for budget-admission failures (`WriterBufferFull`,
    /// `ResourceExhausted`, `QueueFull`); everything else is either a caller
    /// bug or a durable failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QuernError::WriterBufferFull { .. }
                | QuernError::ResourceExhausted { .. }
                | QuernError::QueueFull(_)
        )
    }
}

impl From<std::io::Error> for QuernError {
    fn from(e: std::io::Error) -> Self {
        QuernError::Io(e.to_string())
    }
}

impl From<tantivy::TantivyError> for QuernError {
    fn from(e: tantivy::TantivyError) -> Self {
        QuernError::Index(e.to_string())
    }
}

impl From<serde_json::Error> for QuernError {
    fn from(e: serde_json::Error) -> Self {
        QuernError::Json(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(QuernError::WriterBufferFull {
            buffered: 10,
            max: 5
        }
        .is_retryable());
        assert!(QuernError::ResourceExhausted { active: 4, max: 4 }.is_retryable());
        assert!(QuernError::QueueFull("t".into()).is_retryable());
        assert!(!QuernError::TenantNotFound("t".into()).is_retryable());
        assert!(!QuernError::DocumentTooLarge { size: 2, max: 1 }.is_retryable());
    }
}
