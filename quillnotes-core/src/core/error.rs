//! Error types for the Quillnotes core library.

use crate::core::directive::DirectiveError;
use thiserror::Error;

/// All errors that can occur within the Quillnotes core library outside of
/// directive evaluation, which reports failures through
/// [`DirectiveResult`](crate::DirectiveResult) instead.
#[derive(Debug, Error)]
pub enum QuillnotesError {
    /// A SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A note ID was requested that does not exist in the database.
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// The opened file is not a valid Quillnotes database.
    #[error("Invalid workspace: {0}")]
    InvalidWorkspace(String),

    /// A directive could not be evaluated on an explicit request.
    #[error("Directive error: {0}")]
    Directive(#[from] DirectiveError),

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored note or result data could not be (de)serialized from JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias that pins the error type to [`QuillnotesError`].
pub type Result<T> = std::result::Result<T, QuillnotesError>;

impl QuillnotesError {
    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(e) => format!("Failed to save: {e}"),
            Self::NoteNotFound(_) => "Note no longer exists".to_string(),
            Self::InvalidWorkspace(_) => "Could not open notes database".to_string(),
            Self::Directive(e) => e.to_string(),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_not_found_user_message() {
        let e = QuillnotesError::NoteNotFound("abc".to_string());
        assert_eq!(e.user_message(), "Note no longer exists");
        assert!(e.to_string().contains("abc"));
    }

    #[test]
    fn test_directive_error_converts() {
        let e: QuillnotesError = DirectiveError::Unexpected("boom".to_string()).into();
        assert!(e.user_message().contains("boom"));
    }
}
