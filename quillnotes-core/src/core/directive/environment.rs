//! Per-evaluation execution context.

use super::executor::ExecutionError;
use crate::{Note, NoteMutation, NoteOperations};
use std::collections::BTreeSet;

/// Read access to the notes a directive may look at.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteContext<'a> {
    /// Every note available to search and lookup built-ins.
    pub notes: Option<&'a [Note]>,
    /// The note containing the directive, bound to `.`.
    pub current_note: Option<&'a Note>,
}

/// Tracks which closures or patterns created during one evaluation were used.
#[derive(Debug, Default)]
struct UsageLedger {
    created: BTreeSet<usize>,
    used: BTreeSet<usize>,
}

impl UsageLedger {
    fn unused(&self) -> usize {
        self.created.difference(&self.used).count()
    }
}

/// Execution context for a single directive evaluation.
///
/// Built fresh for each evaluation and dropped afterwards. Mutating built-ins
/// append to its mutation list; nothing is written anywhere else.
pub struct Environment<'a> {
    context: NoteContext<'a>,
    note_operations: Option<&'a dyn NoteOperations>,
    mutations: Vec<NoteMutation>,
    next_value_id: usize,
    lambdas: UsageLedger,
    patterns: UsageLedger,
}

impl<'a> Environment<'a> {
    pub fn new(context: NoteContext<'a>, note_operations: Option<&'a dyn NoteOperations>) -> Self {
        Self {
            context,
            note_operations,
            mutations: Vec::new(),
            next_value_id: 0,
            lambdas: UsageLedger::default(),
            patterns: UsageLedger::default(),
        }
    }

    pub fn current_note(&self) -> Option<&'a Note> {
        self.context.current_note
    }

    /// Returns the note collection.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::MissingNoteCollection`] when none was supplied.
    pub fn notes(&self) -> Result<&'a [Note], ExecutionError> {
        self.context.notes.ok_or(ExecutionError::MissingNoteCollection)
    }

    /// Looks a note up by ID in the collection, falling back to the current note.
    pub fn find_note(&self, id: &str) -> Option<&'a Note> {
        self.context
            .notes
            .and_then(|notes| notes.iter().find(|n| n.id == id))
            .or_else(|| self.context.current_note.filter(|n| n.id == id))
    }

    /// Vets `mutation` with the note-operations collaborator and records it.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::MissingNoteOperations`] when no collaborator is
    /// bound, or [`ExecutionError::MutationRejected`] when it refuses the change.
    pub fn record_mutation(&mut self, function: &str, mutation: NoteMutation) -> Result<(), ExecutionError> {
        let operations = self.note_operations.ok_or_else(|| ExecutionError::MissingNoteOperations {
            function: function.to_string(),
        })?;
        if let Err(reason) = operations.authorize(&mutation) {
            log::warn!("Mutation of note {} rejected: {reason}", mutation.note_id());
            return Err(ExecutionError::MutationRejected(reason));
        }
        log::debug!("Recorded {} mutation on note {}", mutation.target(), mutation.note_id());
        self.mutations.push(mutation);
        Ok(())
    }

    pub fn mutations(&self) -> &[NoteMutation] {
        &self.mutations
    }

    /// Consumes the environment, returning the recorded mutation batch.
    pub fn into_mutations(self) -> Vec<NoteMutation> {
        self.mutations
    }

    pub(super) fn register_lambda(&mut self) -> usize {
        let id = self.fresh_id();
        self.lambdas.created.insert(id);
        id
    }

    pub(super) fn register_pattern(&mut self) -> usize {
        let id = self.fresh_id();
        self.patterns.created.insert(id);
        id
    }

    pub(super) fn mark_lambda_invoked(&mut self, id: usize) {
        self.lambdas.used.insert(id);
    }

    pub(super) fn mark_pattern_matched(&mut self, id: usize) {
        self.patterns.used.insert(id);
    }

    /// Number of lambdas created during this evaluation that were never invoked.
    pub fn unused_lambdas(&self) -> usize {
        self.lambdas.unused()
    }

    /// Number of patterns created during this evaluation that never took part in a match.
    pub fn unused_patterns(&self) -> usize {
        self.patterns.unused()
    }

    fn fresh_id(&mut self) -> usize {
        let id = self.next_value_id;
        self.next_value_id += 1;
        id
    }
}
