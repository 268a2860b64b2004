use thiserror::Error;

use crate::models::DocumentId;

/// Main error type for canvasdb operations
#[derive(Error, Debug)]
pub enum CanvasError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid layer type: {0}")]
    InvalidLayerType(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Tag not found: {0}")]
    TagNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Layer already exists: {0}")]
    LayerExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Id {id} outside range [{min}, {max}) of tag {tag}")]
    IdOutOfRange {
        tag: String,
        id: u32,
        min: u32,
        max: u32,
    },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for canvasdb operations
pub type Result<T> = std::result::Result<T, CanvasError>;

/// Coarse error classes handed to collaborators that only care about policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Io,
    Integrity,
}

impl CanvasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CanvasError::Validation(_)
            | CanvasError::InvalidLayerType(_)
            | CanvasError::InvalidPath(_) => ErrorKind::Validation,
            CanvasError::LayerNotFound(_)
            | CanvasError::TagNotFound(_)
            | CanvasError::DocumentNotFound(_)
            | CanvasError::PathNotFound(_) => ErrorKind::NotFound,
            CanvasError::LayerExists(_) | CanvasError::Conflict(_) => ErrorKind::Conflict,
            CanvasError::Io(_) | CanvasError::Storage(_) => ErrorKind::Io,
            CanvasError::IdOutOfRange { .. }
            | CanvasError::Integrity(_)
            | CanvasError::Serialization(_)
            | CanvasError::Json(_) => ErrorKind::Integrity,
        }
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::Io
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        CanvasError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CanvasError::DocumentNotFound(1_000_042);
        assert_eq!(err.to_string(), "Document not found: 1000042");

        let err = CanvasError::IdOutOfRange {
            tag: "work".to_string(),
            id: 5,
            min: 1_000,
            max: 1_000_000,
        };
        assert_eq!(err.to_string(), "Id 5 outside range [1000, 1000000) of tag work");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(CanvasError::Storage("disk full".to_string()).is_retriable());
        assert!(CanvasError::Io(std::io::Error::other("boom")).is_retriable());
        assert!(!CanvasError::LayerNotFound("x".to_string()).is_retriable());
        assert!(!CanvasError::Conflict("x".to_string()).is_retriable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            CanvasError::InvalidLayerType("planet".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(CanvasError::PathNotFound("/a".into()).kind(), ErrorKind::NotFound);
        assert_eq!(CanvasError::LayerExists("a".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            CanvasError::Integrity("unknown layer".into()).kind(),
            ErrorKind::Integrity
        );
    }
}
