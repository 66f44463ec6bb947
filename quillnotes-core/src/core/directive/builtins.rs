//! The fixed table of built-in directive operations.
//!
//! Every built-in declares its arity and [`Purity`]; the idempotency
//! analyzer reads the latter without evaluating anything.

use super::executor::{check_size, Evaluation, ExecutionError};
use super::pattern::PatternValue;
use super::value::{Closure, DslValue, NoteRef};
use crate::{FieldValue, Note, NoteMutation};
use rand::Rng;

/// How a built-in relates to re-evaluation of the same directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purity {
    /// Same inputs, same value.
    Pure,
    /// Depends on the wall clock.
    ReadsClock,
    /// Returns a different value on each run.
    Nondeterministic,
    /// Requests changes to notes.
    Mutating,
}

impl Purity {
    /// Explains why a call to `function` with this purity cannot be cached.
    pub fn reason(self, function: &str) -> Option<String> {
        match self {
            Self::Pure => None,
            Self::ReadsClock => Some(format!("'{function}' reads the current time")),
            Self::Nondeterministic => Some(format!("'{function}' returns a different value on every run")),
            Self::Mutating => Some(format!("'{function}' modifies notes")),
        }
    }
}

type BuiltinFn = fn(&mut Evaluation<'_, '_>, Vec<DslValue>) -> Result<DslValue, ExecutionError>;

pub(super) struct Builtin {
    pub(super) name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    pub(super) purity: Purity,
    pub(super) run: BuiltinFn,
}

impl Builtin {
    pub(super) fn check_arity(&self, found: usize) -> Result<(), ExecutionError> {
        if found >= self.min_args && self.max_args.map_or(true, |max| found <= max) {
            return Ok(());
        }
        let expected = match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{} to {max}", self.min_args),
            None => format!("at least {}", self.min_args),
        };
        Err(ExecutionError::Arity {
            function: self.name.to_string(),
            expected,
            found,
        })
    }
}

const fn builtin(name: &'static str, min_args: usize, max_args: Option<usize>, purity: Purity, run: BuiltinFn) -> Builtin {
    Builtin { name, min_args, max_args, purity, run }
}

use Purity::{Mutating, Nondeterministic, Pure, ReadsClock};

static BUILTINS: &[Builtin] = &[
    // Collections and numbers
    builtin("list", 0, None, Pure, list),
    builtin("len", 1, Some(1), Pure, len),
    builtin("sum", 1, None, Pure, sum),
    builtin("avg", 1, None, Pure, avg),
    builtin("min", 1, None, Pure, min),
    builtin("max", 1, None, Pure, max),
    builtin("abs", 1, Some(1), Pure, abs),
    builtin("floor", 1, Some(1), Pure, floor),
    builtin("ceil", 1, Some(1), Pure, ceil),
    builtin("sqrt", 1, Some(1), Pure, sqrt),
    builtin("round", 1, Some(2), Pure, round),
    builtin("first", 1, Some(1), Pure, first),
    builtin("last", 1, Some(1), Pure, last),
    // Strings
    builtin("upper", 1, Some(1), Pure, upper),
    builtin("lower", 1, Some(1), Pure, lower),
    builtin("trim", 1, Some(1), Pure, trim),
    builtin("concat", 0, None, Pure, concat),
    builtin("join", 1, Some(2), Pure, join),
    builtin("split", 2, Some(2), Pure, split),
    builtin("contains", 2, Some(2), Pure, contains),
    builtin("str", 1, Some(1), Pure, to_str),
    builtin("num", 1, Some(1), Pure, to_num),
    builtin("if", 3, Some(3), Pure, if_else),
    // Lambdas
    builtin("count", 1, Some(2), Pure, count),
    builtin("map", 2, Some(2), Pure, map),
    builtin("filter", 2, Some(2), Pure, filter),
    builtin("reduce", 3, Some(3), Pure, reduce),
    builtin("call", 1, None, Pure, call),
    // Patterns
    builtin("matches", 2, Some(2), Pure, matches),
    builtin("find", 2, Some(2), Pure, find),
    builtin("find_all", 2, Some(2), Pure, find_all),
    builtin("replace", 3, Some(3), Pure, replace),
    // Notes
    builtin("notes", 0, Some(0), Pure, notes),
    builtin("note", 1, Some(1), Pure, note),
    builtin("title", 1, Some(1), Pure, title),
    builtin("content", 1, Some(1), Pure, content),
    builtin("field", 2, Some(2), Pure, field),
    builtin("search", 1, Some(1), Pure, search),
    // Impure
    builtin("now", 0, Some(0), ReadsClock, now),
    builtin("today", 0, Some(0), ReadsClock, today),
    builtin("random", 0, Some(2), Nondeterministic, random),
    builtin("set", 3, Some(3), Mutating, set),
    builtin("toggle", 2, Some(2), Mutating, toggle),
    builtin("append", 2, Some(2), Mutating, append),
];

pub(super) fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Returns the purity of the built-in called `name`, if there is one.
pub fn purity_of(name: &str) -> Option<Purity> {
    lookup(name).map(|b| b.purity)
}

/// Names of all built-in operations, in table order.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|b| b.name)
}

// ── Argument helpers ────────────────────────────────────────────────────────

fn number(function: &str, value: &DslValue) -> Result<f64, ExecutionError> {
    match value {
        DslValue::Number(n) => Ok(*n),
        other => Err(ExecutionError::type_mismatch(function, "a number", other)),
    }
}

fn whole_number(function: &str, value: &DslValue) -> Result<i64, ExecutionError> {
    let n = number(function, value)?;
    if n.fract() != 0.0 || !n.is_finite() {
        return Err(ExecutionError::invalid(function, format!("{n} is not a whole number")));
    }
    Ok(n as i64)
}

fn text<'v>(function: &str, value: &'v DslValue) -> Result<&'v str, ExecutionError> {
    match value {
        DslValue::Text(s) => Ok(s),
        other => Err(ExecutionError::type_mismatch(function, "a string", other)),
    }
}

fn items<'v>(function: &str, value: &'v DslValue) -> Result<&'v [DslValue], ExecutionError> {
    match value {
        DslValue::List(items) => Ok(items),
        other => Err(ExecutionError::type_mismatch(function, "a list", other)),
    }
}

fn closure(function: &str, value: &DslValue) -> Result<Closure, ExecutionError> {
    match value {
        DslValue::Lambda(closure) => Ok(closure.clone()),
        other => Err(ExecutionError::type_mismatch(function, "a lambda", other)),
    }
}

fn pattern<'v>(function: &str, value: &'v DslValue) -> Result<&'v PatternValue, ExecutionError> {
    match value {
        DslValue::Pattern(pattern) => Ok(pattern),
        other => Err(ExecutionError::type_mismatch(function, "a pattern", other)),
    }
}

fn plain(function: &str, value: &DslValue) -> Result<(), ExecutionError> {
    match value {
        DslValue::Lambda(_) | DslValue::Pattern(_) => {
            Err(ExecutionError::type_mismatch(function, "a plain value", value))
        }
        _ => Ok(()),
    }
}

/// Resolves a note-reference argument against the environment.
fn referenced_note<'a>(ev: &Evaluation<'_, 'a>, function: &str, value: &DslValue) -> Result<&'a Note, ExecutionError> {
    match value {
        DslValue::NoteRef(note) => ev
            .env
            .find_note(&note.id)
            .ok_or_else(|| ExecutionError::NoteNotFound(note.id.clone())),
        other => Err(ExecutionError::type_mismatch(function, "a note", other)),
    }
}

fn note_ref(note: &Note) -> DslValue {
    DslValue::NoteRef(NoteRef {
        id: note.id.clone(),
        title: note.title.clone(),
    })
}

/// Numbers from either a single list argument or the argument list itself.
fn numbers(function: &str, args: &[DslValue]) -> Result<Vec<f64>, ExecutionError> {
    let values = match args {
        [DslValue::List(items)] => items.as_slice(),
        _ => args,
    };
    values.iter().map(|v| number(function, v)).collect()
}

fn predicate(ev: &mut Evaluation<'_, '_>, function: &str, f: &Closure, item: &DslValue) -> Result<bool, ExecutionError> {
    match ev.invoke(f, vec![item.clone()])? {
        DslValue::Boolean(b) => Ok(b),
        other => Err(ExecutionError::type_mismatch(function, "a lambda returning a boolean", &other)),
    }
}

// ── Collections and numbers ─────────────────────────────────────────────────

fn list(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    ev.sized("list", DslValue::List(args))
}

fn len(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    match &args[0] {
        DslValue::Text(s) => Ok(DslValue::Number(s.chars().count() as f64)),
        DslValue::List(items) => Ok(DslValue::Number(items.len() as f64)),
        other => Err(ExecutionError::type_mismatch("len", "a string or list", other)),
    }
}

fn sum(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Number(numbers("sum", &args)?.iter().sum()))
}

fn avg(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let values = numbers("avg", &args)?;
    if values.is_empty() {
        return Ok(DslValue::Null);
    }
    Ok(DslValue::Number(values.iter().sum::<f64>() / values.len() as f64))
}

fn min(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let values = numbers("min", &args)?;
    Ok(values.into_iter().reduce(f64::min).map_or(DslValue::Null, DslValue::Number))
}

fn max(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let values = numbers("max", &args)?;
    Ok(values.into_iter().reduce(f64::max).map_or(DslValue::Null, DslValue::Number))
}

fn abs(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Number(number("abs", &args[0])?.abs()))
}

fn floor(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Number(number("floor", &args[0])?.floor()))
}

fn ceil(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Number(number("ceil", &args[0])?.ceil()))
}

fn sqrt(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let n = number("sqrt", &args[0])?;
    if n < 0.0 {
        return Err(ExecutionError::invalid("sqrt", "cannot take the square root of a negative number"));
    }
    Ok(DslValue::Number(n.sqrt()))
}

fn round(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let n = number("round", &args[0])?;
    let digits = match args.get(1) {
        Some(d) => whole_number("round", d)?,
        None => 0,
    };
    if !(0..=10).contains(&digits) {
        return Err(ExecutionError::invalid("round", "decimal places must be between 0 and 10"));
    }
    let factor = 10f64.powi(digits as i32);
    Ok(DslValue::Number((n * factor).round() / factor))
}

fn first(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(items("first", &args[0])?.first().cloned().unwrap_or(DslValue::Null))
}

fn last(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(items("last", &args[0])?.last().cloned().unwrap_or(DslValue::Null))
}

// ── Strings ─────────────────────────────────────────────────────────────────

fn upper(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Text(text("upper", &args[0])?.to_uppercase()))
}

fn lower(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Text(text("lower", &args[0])?.to_lowercase()))
}

fn trim(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Text(text("trim", &args[0])?.trim().to_string()))
}

fn concat(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let mut out = String::new();
    for arg in &args {
        plain("concat", arg)?;
        check_size("concat", out.len().saturating_add(arg.size()))?;
        out.push_str(&arg.to_display_string());
    }
    ev.sized("concat", DslValue::Text(out))
}

fn join(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let separator = match args.get(1) {
        Some(sep) => text("join", sep)?,
        None => ", ",
    };
    let mut out = String::new();
    for (i, item) in items("join", &args[0])?.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        check_size("join", out.len().saturating_add(item.size()))?;
        out.push_str(&item.to_display_string());
    }
    ev.sized("join", DslValue::Text(out))
}

fn split(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let source = text("split", &args[0])?;
    let separator = text("split", &args[1])?;
    // Splitting into single characters doubles the footprint at most.
    check_size("split", source.len().saturating_mul(2))?;
    let parts: Vec<DslValue> = if separator.is_empty() {
        source.chars().map(|c| DslValue::Text(c.to_string())).collect()
    } else {
        source.split(separator).map(|s| DslValue::Text(s.to_string())).collect()
    };
    ev.sized("split", DslValue::List(parts))
}

fn contains(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    match &args[0] {
        DslValue::Text(haystack) => Ok(DslValue::Boolean(haystack.contains(text("contains", &args[1])?))),
        DslValue::List(items) => Ok(DslValue::Boolean(items.contains(&args[1]))),
        other => Err(ExecutionError::type_mismatch("contains", "a string or list", other)),
    }
}

fn to_str(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    plain("str", &args[0])?;
    ev.sized("str", DslValue::Text(args[0].to_display_string()))
}

fn to_num(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    match &args[0] {
        DslValue::Number(n) => Ok(DslValue::Number(*n)),
        DslValue::Boolean(b) => Ok(DslValue::Number(if *b { 1.0 } else { 0.0 })),
        DslValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(DslValue::Number)
            .map_err(|_| ExecutionError::invalid("num", format!("'{s}' is not a number"))),
        other => Err(ExecutionError::type_mismatch("num", "a number, string or boolean", other)),
    }
}

fn if_else(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let [condition, then, otherwise] = <[DslValue; 3]>::try_from(args).map_err(|args| ExecutionError::Arity {
        function: "if".to_string(),
        expected: "3".to_string(),
        found: args.len(),
    })?;
    match condition {
        DslValue::Boolean(true) => Ok(then),
        DslValue::Boolean(false) => Ok(otherwise),
        other => Err(ExecutionError::type_mismatch("if", "a boolean condition", &other)),
    }
}

// ── Lambdas ─────────────────────────────────────────────────────────────────

fn count(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let values = items("count", &args[0])?;
    let Some(f) = args.get(1) else {
        return Ok(DslValue::Number(values.len() as f64));
    };
    let f = closure("count", f)?;
    let mut matched = 0usize;
    for item in values {
        if predicate(ev, "count", &f, item)? {
            matched += 1;
        }
    }
    Ok(DslValue::Number(matched as f64))
}

fn map(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let f = closure("map", &args[1])?;
    let mut mapped = Vec::new();
    let mut size = 1usize;
    for item in items("map", &args[0])? {
        let value = ev.invoke(&f, vec![item.clone()])?;
        size = size.saturating_add(value.size());
        check_size("map", size)?;
        mapped.push(value);
    }
    Ok(DslValue::List(mapped))
}

fn filter(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let f = closure("filter", &args[1])?;
    let mut kept = Vec::new();
    for item in items("filter", &args[0])? {
        if predicate(ev, "filter", &f, item)? {
            kept.push(item.clone());
        }
    }
    Ok(DslValue::List(kept))
}

fn reduce(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let f = closure("reduce", &args[2])?;
    let mut accumulator = args[1].clone();
    for item in items("reduce", &args[0])? {
        accumulator = ev.invoke(&f, vec![accumulator, item.clone()])?;
    }
    Ok(accumulator)
}

fn call(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let mut args = args.into_iter();
    let f = closure("call", &args.next().unwrap_or(DslValue::Null))?;
    ev.invoke(&f, args.collect())
}

// ── Patterns ────────────────────────────────────────────────────────────────

fn matches(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let subject = text("matches", &args[0])?;
    let p = pattern("matches", &args[1])?;
    ev.use_pattern(p);
    Ok(DslValue::Boolean(p.matches(subject)))
}

fn find(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let subject = text("find", &args[0])?;
    let p = pattern("find", &args[1])?;
    ev.use_pattern(p);
    Ok(p.find(subject).map_or(DslValue::Null, |m| DslValue::Text(m.to_string())))
}

fn find_all(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let subject = text("find_all", &args[0])?;
    let p = pattern("find_all", &args[1])?;
    ev.use_pattern(p);
    let found = p.find_all(subject).into_iter().map(|m| DslValue::Text(m.to_string())).collect();
    Ok(DslValue::List(found))
}

fn replace(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let subject = text("replace", &args[0])?;
    let p = pattern("replace", &args[1])?;
    let replacement = text("replace", &args[2])?;
    ev.use_pattern(p);
    let grown = p.find_all(subject).len().saturating_mul(replacement.len());
    check_size("replace", subject.len().saturating_add(grown))?;
    ev.sized("replace", DslValue::Text(p.replace_all(subject, replacement)))
}

// ── Notes ───────────────────────────────────────────────────────────────────

fn notes(ev: &mut Evaluation<'_, '_>, _: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::List(ev.env.notes()?.iter().map(note_ref).collect()))
}

fn note(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let key = text("note", &args[0])?;
    let notes = ev.env.notes()?;
    let found = notes
        .iter()
        .find(|n| n.id == key)
        .or_else(|| notes.iter().find(|n| n.title == key));
    Ok(found.map_or(DslValue::Null, note_ref))
}

fn title(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let note = referenced_note(ev, "title", &args[0])?;
    Ok(DslValue::Text(note.title.clone()))
}

fn content(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let note = referenced_note(ev, "content", &args[0])?;
    Ok(DslValue::Text(note.content.clone()))
}

fn field(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let note = referenced_note(ev, "field", &args[0])?;
    let name = text("field", &args[1])?;
    Ok(match note.fields.get(name) {
        Some(FieldValue::Text(s)) => DslValue::Text(s.clone()),
        Some(FieldValue::Number(n)) => DslValue::Number(*n),
        Some(FieldValue::Boolean(b)) => DslValue::Boolean(*b),
        None => DslValue::Null,
    })
}

fn search(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let notes = ev.env.notes()?;
    let found: Vec<DslValue> = match &args[0] {
        DslValue::Text(query) => {
            let query = query.to_lowercase();
            notes
                .iter()
                .filter(|n| n.title.to_lowercase().contains(&query) || n.content.to_lowercase().contains(&query))
                .map(note_ref)
                .collect()
        }
        DslValue::Pattern(p) => {
            ev.use_pattern(p);
            notes
                .iter()
                .filter(|n| p.is_found_in(&n.title) || p.is_found_in(&n.content))
                .map(note_ref)
                .collect()
        }
        other => return Err(ExecutionError::type_mismatch("search", "a string or pattern", other)),
    };
    Ok(DslValue::List(found))
}

// ── Impure ──────────────────────────────────────────────────────────────────

fn now(_: &mut Evaluation<'_, '_>, _: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Text(chrono::Local::now().format("%Y-%m-%d %H:%M").to_string()))
}

fn today(_: &mut Evaluation<'_, '_>, _: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    Ok(DslValue::Text(chrono::Local::now().format("%Y-%m-%d").to_string()))
}

fn random(_: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let mut rng = rand::rng();
    let (low, high) = match args.as_slice() {
        [] => return Ok(DslValue::Number(rng.random::<f64>())),
        [high] => (1, whole_number("random", high)?),
        [low, high, ..] => (whole_number("random", low)?, whole_number("random", high)?),
    };
    if low > high {
        return Err(ExecutionError::invalid("random", format!("empty range {low} to {high}")));
    }
    Ok(DslValue::Number(rng.random_range(low..=high) as f64))
}

fn set(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let note = referenced_note(ev, "set", &args[0])?;
    let name = text("set", &args[1])?;
    let value = &args[2];
    let mutation = match (name, value) {
        ("content", _) => {
            return Err(ExecutionError::invalid("set", "use 'append' to change note content"));
        }
        ("title", DslValue::Text(title)) => NoteMutation::SetTitle {
            note_id: note.id.clone(),
            title: title.clone(),
        },
        ("title", other) => return Err(ExecutionError::type_mismatch("set", "a string title", other)),
        (_, DslValue::Text(s)) => set_field(note, name, FieldValue::Text(s.clone())),
        (_, DslValue::Number(n)) => set_field(note, name, FieldValue::Number(*n)),
        (_, DslValue::Boolean(b)) => set_field(note, name, FieldValue::Boolean(*b)),
        (_, other) => {
            return Err(ExecutionError::type_mismatch("set", "a string, number or boolean", other));
        }
    };
    ev.env.record_mutation("set", mutation)?;
    Ok(args[2].clone())
}

fn set_field(note: &Note, field: &str, value: FieldValue) -> NoteMutation {
    NoteMutation::SetField {
        note_id: note.id.clone(),
        field: field.to_string(),
        value,
    }
}

fn toggle(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let note = referenced_note(ev, "toggle", &args[0])?;
    let name = text("toggle", &args[1])?;
    if name == "title" || name == "content" {
        return Err(ExecutionError::invalid("toggle", format!("'{name}' is not a boolean field")));
    }
    let current = match note.fields.get(name) {
        None => false,
        Some(FieldValue::Boolean(b)) => *b,
        Some(_) => {
            return Err(ExecutionError::invalid("toggle", format!("field '{name}' is not a boolean")));
        }
    };
    ev.env.record_mutation("toggle", set_field(note, name, FieldValue::Boolean(!current)))?;
    Ok(DslValue::Boolean(!current))
}

fn append(ev: &mut Evaluation<'_, '_>, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
    let note = referenced_note(ev, "append", &args[0])?;
    plain("append", &args[1])?;
    let line = args[1].to_display_string();
    let mutation = NoteMutation::AppendContent {
        note_id: note.id.clone(),
        text: line.clone(),
    };
    ev.env.record_mutation("append", mutation)?;
    Ok(DslValue::Text(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directive::environment::{Environment, NoteContext};
    use crate::core::directive::executor::Executor;
    use crate::core::directive::{lexer::tokenize, parser::parse_directive};
    use crate::AcceptAllNoteOperations;

    fn sample_notes() -> Vec<Note> {
        let mut groceries = Note::new("n1", "Groceries", "milk\neggs\n2024-05-01");
        groceries.fields.insert("done".to_string(), FieldValue::Boolean(false));
        groceries.fields.insert("budget".to_string(), FieldValue::Number(40.0));
        let mut chores = Note::new("n2", "Chores", "sweep #home");
        chores.fields.insert("priority".to_string(), FieldValue::Text("high".to_string()));
        vec![groceries, chores]
    }

    fn eval_in(source: &str, notes: &[Note]) -> Result<DslValue, ExecutionError> {
        let ops = AcceptAllNoteOperations;
        let mut env = Environment::new(
            NoteContext { notes: Some(notes), current_note: notes.first() },
            Some(&ops),
        );
        let directive = parse_directive(tokenize(source).unwrap(), source).unwrap();
        Executor::default().execute(&directive, &mut env)
    }

    fn show(source: &str) -> String {
        eval_in(source, &sample_notes()).unwrap().to_display_string()
    }

    #[test]
    fn test_every_builtin_is_unique() {
        let mut names: Vec<_> = builtin_names().collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_purity_table() {
        assert_eq!(purity_of("sum"), Some(Purity::Pure));
        assert_eq!(purity_of("now"), Some(Purity::ReadsClock));
        assert_eq!(purity_of("random"), Some(Purity::Nondeterministic));
        assert_eq!(purity_of("toggle"), Some(Purity::Mutating));
        assert_eq!(purity_of("nope"), None);
    }

    #[test]
    fn test_arity_errors() {
        let err = eval_in("[len(1, 2)]", &[]).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Arity { function: "len".to_string(), expected: "1".to_string(), found: 2 }
        );
        assert!(err.to_string().contains("expects 1 argument"));
        let err = eval_in("[round()]", &[]).unwrap_err();
        assert!(err.to_string().contains("1 to 2"));
    }

    #[test]
    fn test_numeric_builtins() {
        assert_eq!(show("[sum(list(1, 2, 3))]"), "6");
        assert_eq!(show("[sum(1, 2, 3.5)]"), "6.5");
        assert_eq!(show("[avg(2, 4)]"), "3");
        assert_eq!(show("[avg(list())]"), "null");
        assert_eq!(show("[min(3, -1, 2)]"), "-1");
        assert_eq!(show("[max(list(3, 9, 2))]"), "9");
        assert_eq!(show("[round(2.567, 2)]"), "2.57");
        assert_eq!(show("[round(2.5)]"), "3");
        assert_eq!(show("[abs(-4) + floor(1.9) + ceil(1.1)]"), "7");
        assert!(eval_in("[sqrt(-1)]", &[]).is_err());
        assert!(eval_in("[round(1, 0.5)]", &[]).is_err());
    }

    #[test]
    fn test_string_builtins() {
        assert_eq!(show(r#"[upper("abc") + lower("DEF")]"#), "ABCdef");
        assert_eq!(show(r#"[trim("  x  ")]"#), "x");
        assert_eq!(show(r#"[len("héllo")]"#), "5");
        assert_eq!(show(r#"[join(split("a-b-c", "-"), "+")]"#), "a+b+c");
        assert_eq!(show(r#"[concat("n=", 3, true)]"#), "n=3true");
        assert_eq!(show(r#"[contains("haystack", "st")]"#), "true");
        assert_eq!(show("[contains(list(1, 2), 3)]"), "false");
        assert_eq!(show(r#"[num(" 12.5 ") * 2]"#), "25");
        assert_eq!(show("[str(1.50) + str(null)]"), "1.5null");
        assert!(eval_in(r#"[num("twelve")]"#, &[]).is_err());
    }

    #[test]
    fn test_if_requires_boolean() {
        assert_eq!(show(r#"[if(1 > 2, "yes", "no")]"#), "no");
        assert!(matches!(eval_in("[if(1, 2, 3)]", &[]), Err(ExecutionError::Type { .. })));
    }

    #[test]
    fn test_lambda_builtins() {
        assert_eq!(show("[map(list(1, 2, 3), {x -> x * x})]"), "1, 4, 9");
        assert_eq!(show("[filter(list(1, 2, 3, 4), {x -> x % 2 == 0})]"), "2, 4");
        assert_eq!(show("[reduce(list(1, 2, 3), 10, {acc, x -> acc + x})]"), "16");
        assert_eq!(show("[count(list(1, 2, 3), {x -> x > 1})]"), "2");
        assert_eq!(show("[count(list(1, 2, 3))]"), "3");
        assert_eq!(show("[first(list()) == null and last(list(1, 2)) == 2]"), "true");
        assert!(matches!(eval_in("[filter(list(1), {x -> x})]", &[]), Err(ExecutionError::Type { .. })));
        assert!(matches!(eval_in("[map(list(1), 2)]", &[]), Err(ExecutionError::Type { .. })));
    }

    #[test]
    fn test_pattern_builtins() {
        assert_eq!(show(r#"[matches("2024-05-01", pattern(digit*4, "-", digit*2, "-", digit*2))]"#), "true");
        assert_eq!(show(r#"[find("call 555-1234 now", pattern(digit*3, "-", digit*4))]"#), "555-1234");
        assert_eq!(show(r#"[find("nothing", pattern(digit+))]"#), "null");
        assert_eq!(show(r#"[find_all("a1b22c333", pattern(digit+))]"#), "1, 22, 333");
        assert_eq!(show(r##"[replace("a1b22", pattern(digit+), "#")]"##), "a#b#");
    }

    #[test]
    fn test_pattern_only_valid_where_expected() {
        let err = eval_in(r#"[upper(pattern(digit))]"#, &[]).unwrap_err();
        assert!(matches!(err, ExecutionError::Type { .. }));
        let err = eval_in(r#"[matches("1", "1")]"#, &[]).unwrap_err();
        assert!(err.to_string().contains("a pattern"));
    }

    #[test]
    fn test_note_builtins() {
        assert_eq!(show("[len(notes())]"), "2");
        assert_eq!(show(r#"[note("Chores")]"#), "Chores");
        assert_eq!(show(r#"[note("n1")]"#), "Groceries");
        assert_eq!(show(r#"[note("missing")]"#), "null");
        assert_eq!(show("[title(.)]"), "Groceries");
        assert_eq!(show(r#"[len(split(content(.), "\n"))]"#), "3");
        assert_eq!(show(r#"[field(note("Chores"), "priority")]"#), "high");
        assert_eq!(show(r#"[field(., "budget") * 2]"#), "80");
        assert_eq!(show(r#"[field(., "missing")]"#), "null");
        assert_eq!(show(r#"[search("MILK")]"#), "Groceries");
        assert_eq!(show(r##"[search(pattern("#", word+))]"##), "Chores");
    }

    #[test]
    fn test_note_builtins_need_collection() {
        let mut env = Environment::new(NoteContext::default(), None);
        let directive = parse_directive(tokenize("[notes()]").unwrap(), "[notes()]").unwrap();
        assert_eq!(
            Executor::default().execute(&directive, &mut env),
            Err(ExecutionError::MissingNoteCollection)
        );
    }

    #[test]
    fn test_mutating_builtins() {
        let notes = sample_notes();
        let ops = AcceptAllNoteOperations;
        let mut env = Environment::new(
            NoteContext { notes: Some(&notes), current_note: notes.first() },
            Some(&ops),
        );
        let source = r#"[list(toggle(., "done"), set(note("Chores"), "priority", 3), set(., "title", "Food"), append(., "bread"))]"#;
        let directive = parse_directive(tokenize(source).unwrap(), source).unwrap();
        let value = Executor::default().execute(&directive, &mut env).unwrap();
        assert_eq!(value.to_display_string(), "true, 3, Food, bread");

        let mutations = env.into_mutations();
        assert_eq!(
            mutations,
            vec![
                NoteMutation::SetField {
                    note_id: "n1".to_string(),
                    field: "done".to_string(),
                    value: FieldValue::Boolean(true),
                },
                NoteMutation::SetField {
                    note_id: "n2".to_string(),
                    field: "priority".to_string(),
                    value: FieldValue::Number(3.0),
                },
                NoteMutation::SetTitle { note_id: "n1".to_string(), title: "Food".to_string() },
                NoteMutation::AppendContent { note_id: "n1".to_string(), text: "bread".to_string() },
            ]
        );
    }

    #[test]
    fn test_toggle_rejects_non_boolean_field() {
        let err = eval_in(r#"[toggle(., "budget")]"#, &sample_notes()).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidArgument { .. }));
    }

    #[test]
    fn test_random_range() {
        for _ in 0..20 {
            let DslValue::Number(n) = eval_in("[random(3, 5)]", &[]).unwrap() else {
                panic!("expected number");
            };
            assert!((3.0..=5.0).contains(&n) && n.fract() == 0.0);
        }
        assert!(eval_in("[random(5, 3)]", &[]).is_err());
    }
}
