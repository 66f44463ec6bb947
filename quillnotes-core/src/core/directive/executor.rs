//! Tree-walking evaluator for parsed directives.

use super::ast::{BinaryOp, Directive, Expression, UnaryOp};
use super::builtins;
use super::environment::Environment;
use super::pattern::PatternValue;
use super::value::{Closure, DslValue, NoteRef};
use std::collections::BTreeMap;
use thiserror::Error;

/// Default bound on nested lambda invocations.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Default bound on the work one evaluation may do.
pub const DEFAULT_MAX_EVALUATION_STEPS: usize = 200_000;

/// Largest value a directive may build, as measured by [`DslValue::size`].
pub const MAX_VALUE_SIZE: usize = 1 << 20;

/// Copying this many bytes of value costs one extra step.
const BYTES_PER_STEP: usize = 1024;

/// Runtime failure while evaluating a directive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("'{function}' expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("'{function}' expects {expected}, got {found}")]
    Type {
        function: String,
        expected: String,
        found: String,
    },

    #[error("'{function}': {message}")]
    InvalidArgument { function: String, message: String },

    #[error("'.' used outside of a note")]
    MissingCurrentNote,

    #[error("no notes are available to this directive")]
    MissingNoteCollection,

    #[error("'{function}' modifies notes, but note changes are not available here")]
    MissingNoteOperations { function: String },

    #[error("note change rejected: {0}")]
    MutationRejected(String),

    #[error("note '{0}' not found")]
    NoteNotFound(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("lambda calls nested deeper than {0}")]
    RecursionLimit(usize),

    #[error("evaluation took more than {0} steps")]
    StepLimit(usize),

    #[error("'{function}' would build a value larger than {limit} bytes")]
    ValueTooLarge { function: String, limit: usize },
}

impl ExecutionError {
    pub(super) fn type_mismatch(function: &str, expected: &str, found: &DslValue) -> Self {
        Self::Type {
            function: function.to_string(),
            expected: expected.to_string(),
            found: found.type_name().to_string(),
        }
    }

    pub(super) fn invalid(function: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub(super) fn too_large(function: &str) -> Self {
        Self::ValueTooLarge {
            function: function.to_string(),
            limit: MAX_VALUE_SIZE,
        }
    }
}

/// Fails with [`ExecutionError::ValueTooLarge`] once `size` passes [`MAX_VALUE_SIZE`].
pub(super) fn check_size(function: &str, size: usize) -> Result<(), ExecutionError> {
    if size > MAX_VALUE_SIZE {
        return Err(ExecutionError::too_large(function));
    }
    Ok(())
}

/// Lambda parameter bindings visible at a point of evaluation.
pub(super) type Scope = BTreeMap<String, DslValue>;

/// Evaluates directives against an [`Environment`].
///
/// Every evaluation is bounded: lambda calls may nest at most
/// `max_call_depth` deep, the total work is capped at `max_steps`, and no
/// value may grow past [`MAX_VALUE_SIZE`].
#[derive(Debug, Clone)]
pub struct Executor {
    max_call_depth: usize,
    max_steps: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_EVALUATION_STEPS)
    }
}

impl Executor {
    pub fn new(max_call_depth: usize, max_steps: usize) -> Self {
        Self { max_call_depth, max_steps }
    }

    /// Evaluates `directive`, recording any requested mutations in `env`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] for unknown functions, arity or type
    /// mismatches, missing context, rejected mutations, arithmetic faults and
    /// exhausted limits.
    pub fn execute(&self, directive: &Directive, env: &mut Environment<'_>) -> Result<DslValue, ExecutionError> {
        let mut evaluation = Evaluation {
            env,
            depth: 0,
            max_depth: self.max_call_depth,
            steps: 0,
            max_steps: self.max_steps,
        };
        evaluation.eval(&directive.expression, &Scope::new())
    }
}

/// State of one running evaluation, handed to built-in implementations.
pub(super) struct Evaluation<'e, 'a> {
    pub(super) env: &'e mut Environment<'a>,
    depth: usize,
    max_depth: usize,
    steps: usize,
    max_steps: usize,
}

impl Evaluation<'_, '_> {
    /// Charges `steps` against the evaluation's budget.
    pub(super) fn spend(&mut self, steps: usize) -> Result<(), ExecutionError> {
        self.steps = self.steps.saturating_add(steps);
        if self.steps > self.max_steps {
            return Err(ExecutionError::StepLimit(self.max_steps));
        }
        Ok(())
    }

    /// Checks a freshly built value against [`MAX_VALUE_SIZE`] and charges for copying it.
    pub(super) fn sized(&mut self, function: &str, value: DslValue) -> Result<DslValue, ExecutionError> {
        let size = value.size();
        check_size(function, size)?;
        self.spend(size / BYTES_PER_STEP)?;
        Ok(value)
    }

    fn eval(&mut self, expression: &Expression, scope: &Scope) -> Result<DslValue, ExecutionError> {
        self.spend(1)?;
        match expression {
            Expression::Number(n) => Ok(DslValue::Number(*n)),
            Expression::Text(s) => Ok(DslValue::Text(s.clone())),
            Expression::Boolean(b) => Ok(DslValue::Boolean(*b)),
            Expression::Null => Ok(DslValue::Null),
            Expression::SelfRef => {
                let note = self.env.current_note().ok_or(ExecutionError::MissingCurrentNote)?;
                Ok(DslValue::NoteRef(NoteRef {
                    id: note.id.clone(),
                    title: note.title.clone(),
                }))
            }
            Expression::Variable(name) => {
                let value = scope.get(name).ok_or_else(|| ExecutionError::UnknownVariable(name.clone()))?;
                self.spend(value.size() / BYTES_PER_STEP)?;
                Ok(value.clone())
            }
            Expression::Call { name, args, .. } => self.call(name, args, scope),
            Expression::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                unary(*op, value)
            }
            Expression::Binary { op: BinaryOp::And, left, right } => {
                if !self.condition("and", left, scope)? {
                    return Ok(DslValue::Boolean(false));
                }
                Ok(DslValue::Boolean(self.condition("and", right, scope)?))
            }
            Expression::Binary { op: BinaryOp::Or, left, right } => {
                if self.condition("or", left, scope)? {
                    return Ok(DslValue::Boolean(true));
                }
                Ok(DslValue::Boolean(self.condition("or", right, scope)?))
            }
            Expression::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                if *op == BinaryOp::Add {
                    check_size("+", left.size().saturating_add(right.size()))?;
                    let sum = binary(*op, left, right)?;
                    return self.sized("+", sum);
                }
                binary(*op, left, right)
            }
            Expression::Lambda { params, body } => {
                self.spend(scope_size(scope) / BYTES_PER_STEP)?;
                let id = self.env.register_lambda();
                Ok(DslValue::Lambda(Closure {
                    id,
                    params: params.clone(),
                    body: body.clone(),
                    captured: scope.clone(),
                }))
            }
            Expression::Pattern(pattern) => {
                let id = self.env.register_pattern();
                PatternValue::compile(id, pattern.clone())
                    .map(DslValue::Pattern)
                    .map_err(ExecutionError::InvalidPattern)
            }
        }
    }

    fn condition(&mut self, op: &str, expression: &Expression, scope: &Scope) -> Result<bool, ExecutionError> {
        match self.eval(expression, scope)? {
            DslValue::Boolean(b) => Ok(b),
            other => Err(ExecutionError::type_mismatch(op, "a boolean", &other)),
        }
    }

    fn call(&mut self, name: &str, args: &[Expression], scope: &Scope) -> Result<DslValue, ExecutionError> {
        if let Some(bound) = scope.get(name) {
            let DslValue::Lambda(closure) = bound.clone() else {
                return Err(ExecutionError::type_mismatch(name, "a lambda", bound));
            };
            let values = self.eval_args(args, scope)?;
            return self.invoke(&closure, values);
        }

        let builtin = builtins::lookup(name).ok_or_else(|| ExecutionError::UnknownFunction(name.to_string()))?;
        builtin.check_arity(args.len())?;
        let values = self.eval_args(args, scope)?;
        (builtin.run)(self, values)
    }

    fn eval_args(&mut self, args: &[Expression], scope: &Scope) -> Result<Vec<DslValue>, ExecutionError> {
        args.iter().map(|arg| self.eval(arg, scope)).collect()
    }

    /// Invokes `closure` with positional `args`.
    pub(super) fn invoke(&mut self, closure: &Closure, args: Vec<DslValue>) -> Result<DslValue, ExecutionError> {
        if args.len() != closure.params.len() {
            return Err(ExecutionError::Arity {
                function: "lambda".to_string(),
                expected: closure.params.len().to_string(),
                found: args.len(),
            });
        }
        if self.depth >= self.max_depth {
            return Err(ExecutionError::RecursionLimit(self.max_depth));
        }
        self.spend(1 + scope_size(&closure.captured) / BYTES_PER_STEP)?;
        self.env.mark_lambda_invoked(closure.id);

        let mut scope = closure.captured.clone();
        scope.extend(closure.params.iter().cloned().zip(args));

        self.depth += 1;
        let result = self.eval(&closure.body, &scope);
        self.depth -= 1;
        result
    }

    /// Records that `pattern` took part in a match.
    pub(super) fn use_pattern(&mut self, pattern: &PatternValue) {
        self.env.mark_pattern_matched(pattern.id);
    }
}

fn scope_size(scope: &Scope) -> usize {
    scope.values().fold(0, |total, value| total.saturating_add(value.size()))
}

fn unary(op: UnaryOp, value: DslValue) -> Result<DslValue, ExecutionError> {
    match (op, value) {
        (UnaryOp::Negate, DslValue::Number(n)) => Ok(DslValue::Number(-n)),
        (UnaryOp::Not, DslValue::Boolean(b)) => Ok(DslValue::Boolean(!b)),
        (UnaryOp::Negate, other) => Err(ExecutionError::type_mismatch("-", "a number", &other)),
        (UnaryOp::Not, other) => Err(ExecutionError::type_mismatch("not", "a boolean", &other)),
    }
}

fn binary(op: BinaryOp, left: DslValue, right: DslValue) -> Result<DslValue, ExecutionError> {
    use DslValue::{List, Number, Text};

    let symbol = op.symbol();
    for operand in [&left, &right] {
        if matches!(operand, DslValue::Lambda(_) | DslValue::Pattern(_)) {
            return Err(ExecutionError::type_mismatch(symbol, "a plain value", operand));
        }
    }

    match op {
        BinaryOp::Equal => return Ok(DslValue::Boolean(left == right)),
        BinaryOp::NotEqual => return Ok(DslValue::Boolean(left != right)),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = match (&left, &right) {
                (Number(a), Number(b)) => a.partial_cmp(b),
                (Text(a), Text(b)) => Some(a.cmp(b)),
                (Number(_), other) | (Text(_), other) => {
                    return Err(ExecutionError::type_mismatch(symbol, left.type_name(), other));
                }
                (other, _) => {
                    return Err(ExecutionError::type_mismatch(symbol, "a number or string", other));
                }
            };
            let Some(ordering) = ordering else {
                return Ok(DslValue::Boolean(false));
            };
            let result = match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(DslValue::Boolean(result));
        }
        _ => {}
    }

    match (op, left, right) {
        (BinaryOp::Add, Number(a), Number(b)) => Ok(Number(a + b)),
        (BinaryOp::Add, List(mut a), List(b)) => {
            a.extend(b);
            Ok(List(a))
        }
        (BinaryOp::Add, a @ Text(_), b) | (BinaryOp::Add, a, b @ Text(_)) => {
            Ok(Text(a.to_display_string() + &b.to_display_string()))
        }
        (BinaryOp::Subtract, Number(a), Number(b)) => Ok(Number(a - b)),
        (BinaryOp::Multiply, Number(a), Number(b)) => Ok(Number(a * b)),
        (BinaryOp::Divide | BinaryOp::Remainder, Number(_), Number(b)) if b == 0.0 => {
            Err(ExecutionError::DivisionByZero)
        }
        (BinaryOp::Divide, Number(a), Number(b)) => Ok(Number(a / b)),
        (BinaryOp::Remainder, Number(a), Number(b)) => Ok(Number(a % b)),
        (_, Number(_), other) | (_, other, _) => Err(ExecutionError::type_mismatch(symbol, "a number", &other)),
    }
}
