//! Locating directives in note content and running them through the pipeline.
//!
//! Every stage failure is folded into a [`DirectiveResult`], so one bad
//! directive never stops the others in the same note from being evaluated.

use super::analyzer::{IdempotencyAnalyzer, IdempotencyReport};
use super::ast::Directive;
use super::environment::{Environment, NoteContext};
use super::executor::{ExecutionError, Executor};
use super::lexer::{tokenize, LexerError};
use super::parser::{parse_directive, ParseError};
use super::result::{DirectiveResult, DirectiveWarningType};
use super::value::DslValue;
use crate::{EngineSettings, Note, NoteMutation, NoteOperations};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use thiserror::Error;

/// Failure of one directive, tagged with the pipeline stage that produced it.
///
/// The `Display` text is what ends up in [`DirectiveResult::error`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DirectiveError {
    #[error("Syntax error: {0}")]
    Lexer(#[from] LexerError),

    #[error("Parse error {0}")]
    Parse(#[from] ParseError),

    #[error("Not idempotent: {0}")]
    NonIdempotent(String),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// A directive located in a piece of content.
///
/// `content[start_offset..end_offset] == source_text`, with byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDirective {
    pub source_text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Result and requested mutations of one directive evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveOutcome {
    pub result: DirectiveResult,
    /// Always empty when `result` is a failure.
    pub mutations: Vec<NoteMutation>,
}

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\?\[[^\[\]\n]*\]").expect("directive regex is valid"))
}

/// Returns the directives in `content`, ordered by start offset.
///
/// Brackets do not nest. A bracket preceded by a backslash is escaped and
/// blank brackets such as `[ ]` are not directives.
pub fn find_directives(content: &str) -> Vec<FoundDirective> {
    directive_regex()
        .find_iter(content)
        .filter(|m| !m.as_str().starts_with('\\'))
        .filter(|m| !m.as_str()[1..m.len() - 1].trim().is_empty())
        .map(|m| FoundDirective {
            source_text: m.as_str().to_string(),
            start_offset: m.start(),
            end_offset: m.end(),
        })
        .collect()
}

/// Position identity of a directive: `"{line_index}:{start_offset}"`.
pub fn directive_key(line_index: usize, start_offset: usize) -> String {
    format!("{line_index}:{start_offset}")
}

/// Content identity of a directive: the SHA-256 hex digest of its source text.
pub fn hash_directive(source_text: &str) -> String {
    hex::encode(Sha256::digest(source_text.as_bytes()))
}

/// Runs directives through lexer, parser, idempotency gate and executor.
#[derive(Debug, Clone)]
pub struct DirectiveFinder {
    settings: EngineSettings,
    executor: Executor,
}

impl Default for DirectiveFinder {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl DirectiveFinder {
    pub fn new(settings: EngineSettings) -> Self {
        let executor = Executor::new(settings.max_call_depth, settings.max_evaluation_steps);
        Self { settings, executor }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Evaluates `source_text` for display and caching.
    ///
    /// Directives that are not idempotent fail before evaluation, so this
    /// path never returns mutations.
    pub fn execute_directive(
        &self,
        source_text: &str,
        notes: Option<&[Note]>,
        current_note: Option<&Note>,
        note_operations: Option<&dyn NoteOperations>,
    ) -> DirectiveOutcome {
        self.run(source_text, NoteContext { notes, current_note }, note_operations, true)
    }

    /// Evaluates `source_text` on an explicit user request, skipping the
    /// idempotency gate. Mutations from `set`, `toggle` and `append` are
    /// returned for the caller to apply.
    pub fn execute_directive_on_demand(
        &self,
        source_text: &str,
        notes: Option<&[Note]>,
        current_note: Option<&Note>,
        note_operations: Option<&dyn NoteOperations>,
    ) -> DirectiveOutcome {
        self.run(source_text, NoteContext { notes, current_note }, note_operations, false)
    }

    /// Evaluates every directive in `content` independently, keyed by
    /// [`directive_key`]. Line indices count `'\n'`-separated lines.
    pub fn execute_all_directives(
        &self,
        content: &str,
        notes: Option<&[Note]>,
        current_note: Option<&Note>,
        note_operations: Option<&dyn NoteOperations>,
    ) -> HashMap<String, DirectiveOutcome> {
        let mut outcomes = HashMap::new();
        for (line_index, line) in content.split('\n').enumerate() {
            for found in find_directives(line) {
                let outcome = self.execute_directive(&found.source_text, notes, current_note, note_operations);
                outcomes.insert(directive_key(line_index, found.start_offset), outcome);
            }
        }
        outcomes
    }

    /// Lexes, parses and analyzes `source_text` without evaluating it.
    pub fn check_idempotency(&self, source_text: &str) -> crate::Result<IdempotencyReport> {
        let directive = self.parse(source_text)?;
        Ok(IdempotencyAnalyzer::analyze(&directive.expression))
    }

    fn run(
        &self,
        source_text: &str,
        context: NoteContext<'_>,
        note_operations: Option<&dyn NoteOperations>,
        gated: bool,
    ) -> DirectiveOutcome {
        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| {
            self.evaluate(source_text, context, note_operations, gated)
        }))
        .unwrap_or_else(|payload| Err(DirectiveError::Unexpected(panic_message(payload.as_ref()))));

        match evaluated {
            Ok((value, warning, mutations)) => {
                let result = match warning {
                    Some(warning) => {
                        log::debug!("Directive {source_text} succeeded with warning: {warning}");
                        DirectiveResult::warning(Some(&value), warning)
                    }
                    None => {
                        log::debug!("Directive {source_text} evaluated to {}", value.type_name());
                        DirectiveResult::success(&value)
                    }
                };
                DirectiveOutcome { result, mutations }
            }
            Err(err) => {
                log::warn!("Directive {source_text} failed: {err}");
                DirectiveOutcome {
                    result: DirectiveResult::failure(err.to_string()),
                    mutations: Vec::new(),
                }
            }
        }
    }

    fn evaluate(
        &self,
        source_text: &str,
        context: NoteContext<'_>,
        note_operations: Option<&dyn NoteOperations>,
        gated: bool,
    ) -> Result<(DslValue, Option<DirectiveWarningType>, Vec<NoteMutation>), DirectiveError> {
        let directive = self.parse(source_text)?;

        if gated {
            let report = IdempotencyAnalyzer::analyze(&directive.expression);
            if let Some(reason) = report.non_idempotent_reason {
                return Err(DirectiveError::NonIdempotent(reason));
            }
        }

        let mut env = Environment::new(context, note_operations);
        let value = self.executor.execute(&directive, &mut env)?;
        let warning = if self.settings.warn_unused_lambdas && env.unused_lambdas() > 0 {
            Some(DirectiveWarningType::NoEffectLambda)
        } else if self.settings.warn_unused_patterns && env.unused_patterns() > 0 {
            Some(DirectiveWarningType::NoEffectPattern)
        } else {
            None
        };
        Ok((value, warning, env.into_mutations()))
    }

    fn parse(&self, source_text: &str) -> Result<Directive, DirectiveError> {
        if source_text.len() > self.settings.max_directive_length {
            return Err(DirectiveError::Parse(ParseError {
                position: self.settings.max_directive_length,
                message: format!("directive is longer than {} bytes", self.settings.max_directive_length),
            }));
        }
        let tokens = tokenize(source_text)?;
        log::debug!("Lexed {} tokens from {source_text}", tokens.len());
        Ok(parse_directive(tokens, source_text)?)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "evaluation panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AcceptAllNoteOperations, FieldValue};

    fn execute(source: &str) -> DirectiveOutcome {
        DirectiveFinder::default().execute_directive(source, None, None, None)
    }

    #[test]
    fn test_find_single_directive() {
        let found = find_directives("Total: [2+2] items");
        assert_eq!(
            found,
            vec![FoundDirective { source_text: "[2+2]".to_string(), start_offset: 7, end_offset: 12 }]
        );
    }

    #[test]
    fn test_found_ranges_are_ordered_and_exact() {
        let content = "a [1] b [x]][c] \\[skip] [ ] [héllo()] [[nested]]";
        let found = find_directives(content);
        let sources: Vec<_> = found.iter().map(|f| f.source_text.as_str()).collect();
        assert_eq!(sources, vec!["[1]", "[x]", "[c]", "[héllo()]", "[nested]"]);
        for pair in found.windows(2) {
            assert!(pair[0].end_offset <= pair[1].start_offset);
        }
        for f in &found {
            assert!(f.start_offset < f.end_offset);
            assert_eq!(&content[f.start_offset..f.end_offset], f.source_text);
        }
    }

    #[test]
    fn test_directives_do_not_span_lines() {
        assert!(find_directives("[open\nclose]").is_empty());
    }

    #[test]
    fn test_key_and_hash() {
        assert_eq!(directive_key(3, 14), "3:14");
        assert_eq!(hash_directive("[1+1]"), hash_directive("[1+1]"));
        assert_ne!(hash_directive("[1+1]"), hash_directive("[1+2]"));
        assert_eq!(hash_directive("[2+2]").len(), 64);
        assert_eq!(
            hash_directive(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_execute_success() {
        let outcome = execute("[2+2]");
        assert!(outcome.result.is_success());
        assert_eq!(outcome.result.value(), Some(DslValue::Number(4.0)));
        assert!(outcome.result.executed_at.is_some());
        assert!(outcome.mutations.is_empty());
    }

    #[test]
    fn test_stage_errors_are_tagged() {
        let lexed = execute("[2 $ 2]").result.error.unwrap();
        assert!(lexed.starts_with("Syntax error:"), "{lexed}");

        let parsed = execute("[2+]").result.error.unwrap();
        assert!(parsed.starts_with("Parse error at 3"), "{parsed}");

        let executed = execute("[1/0]").result.error.unwrap();
        assert_eq!(executed, "Execution error: division by zero");
    }

    #[test]
    fn test_non_idempotent_never_executes() {
        let notes = vec![Note::new("n1", "Task", "")];
        let ops = AcceptAllNoteOperations;
        let outcome = DirectiveFinder::default().execute_directive(
            r#"[toggle(., "done")]"#,
            Some(&notes),
            notes.first(),
            Some(&ops),
        );
        assert!(outcome.mutations.is_empty());
        let error = outcome.result.error.clone().unwrap();
        assert_eq!(error, "Not idempotent: 'toggle' modifies notes");
        assert_eq!(outcome.result.to_display_string("[toggle(., \"done\")]"), format!("Error: {error}"));

        let now = execute("[now]");
        assert!(now.result.error.unwrap().contains("current time"));
        assert!(now.mutations.is_empty());
    }

    #[test]
    fn test_on_demand_returns_mutations() {
        let notes = vec![Note::new("n1", "Task", "")];
        let ops = AcceptAllNoteOperations;
        let outcome = DirectiveFinder::default().execute_directive_on_demand(
            r#"[toggle(., "done")]"#,
            Some(&notes),
            notes.first(),
            Some(&ops),
        );
        assert_eq!(outcome.result.value(), Some(DslValue::Boolean(true)));
        assert_eq!(
            outcome.mutations,
            vec![NoteMutation::SetField {
                note_id: "n1".to_string(),
                field: "done".to_string(),
                value: FieldValue::Boolean(true),
            }]
        );
    }

    #[test]
    fn test_failed_on_demand_drops_mutations() {
        let notes = vec![Note::new("n1", "Task", "")];
        let ops = AcceptAllNoteOperations;
        let outcome = DirectiveFinder::default().execute_directive_on_demand(
            r#"[list(toggle(., "done"), 1 / 0)]"#,
            Some(&notes),
            notes.first(),
            Some(&ops),
        );
        assert!(outcome.result.is_error());
        assert!(outcome.mutations.is_empty());
    }

    #[test]
    fn test_mutation_without_operations_fails() {
        let notes = vec![Note::new("n1", "Task", "")];
        let outcome = DirectiveFinder::default().execute_directive_on_demand(
            r#"[append(., "more")]"#,
            Some(&notes),
            notes.first(),
            None,
        );
        assert!(outcome.result.error.unwrap().starts_with("Execution error:"));
    }

    #[test]
    fn test_unused_lambda_and_pattern_warnings() {
        let lambda = execute("[{x -> x}]").result;
        assert_eq!(lambda.warning, Some(DirectiveWarningType::NoEffectLambda));
        assert!(lambda.error.is_none());

        let pattern = execute("[len(list(pattern(digit)))]").result;
        assert_eq!(pattern.warning, Some(DirectiveWarningType::NoEffectPattern));
        assert_eq!(pattern.value(), Some(DslValue::Number(1.0)));

        let both = execute("[list({1}, pattern(digit))]").result;
        assert_eq!(both.warning, Some(DirectiveWarningType::NoEffectLambda));

        let used = execute(r#"[matches("1", pattern(digit))]"#).result;
        assert!(used.is_success());
    }

    #[test]
    fn test_warnings_can_be_disabled() {
        let finder = DirectiveFinder::new(EngineSettings {
            warn_unused_lambdas: false,
            ..EngineSettings::default()
        });
        let result = finder.execute_directive("[list({1}, pattern(digit))]", None, None, None).result;
        assert_eq!(result.warning, Some(DirectiveWarningType::NoEffectPattern));
    }

    #[test]
    fn test_overlong_directive_rejected() {
        let finder = DirectiveFinder::new(EngineSettings {
            max_directive_length: 8,
            ..EngineSettings::default()
        });
        let result = finder.execute_directive("[1+1+1+1+1]", None, None, None).result;
        assert!(result.error.unwrap().contains("longer than 8 bytes"));
    }

    #[test]
    fn test_call_depth_follows_settings() {
        let finder = DirectiveFinder::new(EngineSettings {
            max_call_depth: 2,
            ..EngineSettings::default()
        });
        let source = "[call({a -> call({b -> call({c -> c}, b)}, a)}, 1)]";
        let result = finder.execute_directive(source, None, None, None).result;
        assert!(result.error.unwrap().contains("nested deeper than 2"));
    }

    #[test]
    fn test_execute_all_directives() {
        let content = "first\nx\nTotal [1+1]\n\nagain [1+1] and [2+]";
        let outcomes = DirectiveFinder::default().execute_all_directives(content, None, None, None);
        assert_eq!(outcomes.len(), 3);

        let line2 = &outcomes["2:6"].result;
        let line4 = &outcomes["4:6"].result;
        assert_eq!(line2.value(), Some(DslValue::Number(2.0)));
        assert_eq!(line2.result, line4.result);
        assert!(outcomes["4:16"].result.is_error());
    }

    /// Runs `hostile` and a plain sibling on the same line.
    fn run_beside_sibling(hostile: &str) -> (DirectiveResult, DirectiveResult) {
        let content = format!("{hostile} then [1+1]");
        let mut outcomes = DirectiveFinder::default().execute_all_directives(&content, None, None, None);
        assert_eq!(outcomes.len(), 2);
        let sibling = outcomes.remove(&directive_key(0, hostile.len() + 6)).unwrap();
        let hostile = outcomes.remove(&directive_key(0, 0)).unwrap();
        (hostile.result, sibling.result)
    }

    #[test]
    fn test_deep_nesting_fails_alone() {
        let deep = format!("[{}1{}]", "(".repeat(400), ")".repeat(400));
        let (hostile, sibling) = run_beside_sibling(&deep);
        assert!(hostile.error.unwrap().contains("expression nested too deeply"));
        assert_eq!(sibling.value(), Some(DslValue::Number(2.0)));
    }

    #[test]
    fn test_fan_out_fails_alone() {
        let mut body = "1".to_string();
        for _ in 0..9 {
            body = format!(r#"sum(map(split("0123456789", ""), {{x -> {body}}}))"#);
        }
        let (hostile, sibling) = run_beside_sibling(&format!("[{body}]"));
        assert!(hostile.error.unwrap().contains("evaluation took more than 200000 steps"));
        assert_eq!(sibling.value(), Some(DslValue::Number(2.0)));
    }

    #[test]
    fn test_value_growth_fails_alone() {
        let doubling = r#"[len(reduce(split("abcdefghijklmnopqrstuvwxyz", ""), "x", {a, c -> a + a}))]"#;
        let (hostile, sibling) = run_beside_sibling(doubling);
        assert!(hostile.error.unwrap().contains("would build a value larger than"));
        assert_eq!(sibling.value(), Some(DslValue::Number(2.0)));
    }

    #[test]
    fn test_step_budget_follows_settings() {
        let finder = DirectiveFinder::new(EngineSettings {
            max_evaluation_steps: 5,
            ..EngineSettings::default()
        });
        let result = finder.execute_directive("[1+2+3+4]", None, None, None).result;
        assert!(result.error.unwrap().contains("more than 5 steps"));
        let result = finder.execute_directive("[1+2]", None, None, None).result;
        assert_eq!(result.value(), Some(DslValue::Number(3.0)));
    }

    #[test]
    fn test_check_idempotency() {
        let finder = DirectiveFinder::default();
        assert!(finder.check_idempotency("[1 + 1]").unwrap().is_idempotent);
        assert!(!finder.check_idempotency("[today]").unwrap().is_idempotent);
        assert!(finder.check_idempotency("[1 +]").is_err());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(3);
        assert_eq!(panic_message(payload.as_ref()), "evaluation panicked");
    }
}
