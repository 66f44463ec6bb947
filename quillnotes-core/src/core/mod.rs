//! Internal domain modules for the Quillnotes core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod directive;
pub mod error;
pub mod mutation;
pub mod note;
pub mod settings;
pub mod storage;

#[doc(inline)]
pub use error::{QuillnotesError, Result};
#[doc(inline)]
pub use mutation::{AcceptAllNoteOperations, NoteMutation, NoteOperations};
#[doc(inline)]
pub use note::{FieldValue, Note};
#[doc(inline)]
pub use settings::{load_settings, save_settings, settings_file_path, EngineSettings};
#[doc(inline)]
pub use storage::Storage;
