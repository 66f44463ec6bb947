//! The inline directive engine.
//!
//! Note content may embed bracketed expressions such as `[2+2]` or
//! `[len(search("todo"))]`. Each one flows through
//!
//! ```text
//! find_directives -> tokenize -> parse_directive -> IdempotencyAnalyzer
//!     -> Executor (with an Environment) -> DirectiveResult
//! ```
//!
//! and the rendered line is produced by [`build_display_text`] from cached
//! results. Results are cached by the SHA-256 of the directive source through
//! a [`DirectiveResultStore`]; the position key `"{line}:{offset}"` only routes
//! a location in the text to its cached result.

pub mod analyzer;
pub mod ast;
pub mod builtins;
pub mod environment;
pub mod executor;
pub mod finder;
pub mod lexer;
pub mod parser;
pub mod pattern;
pub mod result;
pub mod segmenter;
pub mod store;
pub mod value;

#[doc(inline)]
pub use analyzer::{IdempotencyAnalyzer, IdempotencyReport};
#[doc(inline)]
pub use ast::{BinaryOp, CharClass, Directive, Expression, Pattern, UnaryOp};
#[doc(inline)]
pub use builtins::Purity;
#[doc(inline)]
pub use environment::{Environment, NoteContext};
#[doc(inline)]
pub use executor::{ExecutionError, Executor, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_EVALUATION_STEPS, MAX_VALUE_SIZE};
#[doc(inline)]
pub use finder::{
    directive_key, find_directives, hash_directive, DirectiveError, DirectiveFinder, DirectiveOutcome,
    FoundDirective,
};
#[doc(inline)]
pub use lexer::{tokenize, LexerError, Token, TokenKind};
#[doc(inline)]
pub use parser::{parse_directive, ParseError, MAX_NESTING};
#[doc(inline)]
pub use pattern::PatternValue;
#[doc(inline)]
pub use result::{DirectiveResult, DirectiveWarningType};
#[doc(inline)]
pub use segmenter::{build_display_text, segment_line, DirectiveDisplayRange, DirectiveSegment, LineDisplay};
#[doc(inline)]
pub use store::{DirectiveResultStore, InMemoryResultStore, ResultCache, SqliteResultStore};
#[doc(inline)]
pub use value::{Closure, DslValue, DslValueError, NoteRef};
