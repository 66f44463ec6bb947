//! Requested note mutations produced by directive evaluation.

use crate::FieldValue;
use serde::{Deserialize, Serialize};

/// A single requested, not-yet-applied change to a note.
///
/// Mutations are produced by mutating directive built-ins (`set`, `toggle`,
/// `append`) and returned to the caller alongside the computed value. The
/// directive engine never writes them anywhere; see
/// [`Storage::apply_mutations`](crate::Storage::apply_mutations) for the
/// transactional applier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NoteMutation {
    /// Replace the value of a typed field on a note.
    SetField {
        /// ID of the note whose field changes.
        note_id: String,
        /// Name of the field.
        field: String,
        /// New value for the field.
        value: FieldValue,
    },
    /// Replace a note's title.
    SetTitle {
        /// ID of the note to rename.
        note_id: String,
        /// New title.
        title: String,
    },
    /// Append a line to the end of a note's content.
    AppendContent {
        /// ID of the note to extend.
        note_id: String,
        /// Text appended as a new line.
        text: String,
    },
}

impl NoteMutation {
    /// Returns the ID of the note this mutation targets.
    #[must_use]
    pub fn note_id(&self) -> &str {
        match self {
            Self::SetField { note_id, .. }
            | Self::SetTitle { note_id, .. }
            | Self::AppendContent { note_id, .. } => note_id,
        }
    }

    /// Returns the name of the targeted note attribute.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::SetField { field, .. } => field,
            Self::SetTitle { .. } => "title",
            Self::AppendContent { .. } => "content",
        }
    }
}

/// Collaborator consulted by mutating built-ins before a mutation is recorded.
///
/// Implementations decide whether a requested change is acceptable (for example
/// refusing edits to read-only notes). They only vet the request; persistence
/// happens after evaluation, outside the directive engine.
pub trait NoteOperations {
    /// Returns `Err(reason)` to reject `mutation`.
    fn authorize(&self, mutation: &NoteMutation) -> std::result::Result<(), String>;
}

impl<F> NoteOperations for F
where
    F: Fn(&NoteMutation) -> std::result::Result<(), String>,
{
    fn authorize(&self, mutation: &NoteMutation) -> std::result::Result<(), String> {
        self(mutation)
    }
}

/// A [`NoteOperations`] collaborator that accepts every mutation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllNoteOperations;

impl NoteOperations for AcceptAllNoteOperations {
    fn authorize(&self, _mutation: &NoteMutation) -> std::result::Result<(), String> {
        Ok(())
    }
}
