//! Core library for Quillnotes, a note-taking application whose note bodies
//! can embed bracketed directives that are evaluated and rendered inline.
//!
//! The primary entry points are [`DirectiveFinder`], which locates and
//! evaluates directives, [`ResultCache`], which stores their results by
//! content hash, and [`build_display_text`], which renders a line with its
//! offset map. [`Storage`] holds notes and applies the mutations that
//! on-demand directive runs request.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    directive::{
        build_display_text, directive_key, find_directives, hash_directive, segment_line, DirectiveDisplayRange,
        DirectiveError, DirectiveFinder, DirectiveOutcome, DirectiveResult, DirectiveResultStore, DirectiveSegment,
        DirectiveWarningType, DslValue, Environment, ExecutionError, Executor, FoundDirective, IdempotencyAnalyzer,
        IdempotencyReport, InMemoryResultStore, LexerError, LineDisplay, NoteContext, ParseError, ResultCache,
        SqliteResultStore,
    },
    error::{QuillnotesError, Result},
    mutation::{AcceptAllNoteOperations, NoteMutation, NoteOperations},
    note::{FieldValue, Note},
    settings::{load_settings, save_settings, settings_file_path, EngineSettings},
    storage::Storage,
};
