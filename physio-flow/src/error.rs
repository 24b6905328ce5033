use thiserror::Error;

/// Errors surfaced by the assessment engine and its storage seam.
#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Question not found: {0}")]
    QuestionNotFound(String),

    #[error("Question already answered: {0}")]
    QuestionAlreadyAnswered(String),

    #[error("Assessment already complete for session {0}")]
    AssessmentComplete(String),

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssessmentError>;
