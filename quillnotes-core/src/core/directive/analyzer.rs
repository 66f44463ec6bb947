//! Static purity check run before a directive is evaluated.

use super::ast::Expression;
use super::builtins::purity_of;
use serde::Serialize;

/// Outcome of [`IdempotencyAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyReport {
    pub is_idempotent: bool,
    /// Why the expression cannot be cached; `None` when it is idempotent.
    pub non_idempotent_reason: Option<String>,
}

impl IdempotencyReport {
    fn idempotent() -> Self {
        Self {
            is_idempotent: true,
            non_idempotent_reason: None,
        }
    }

    fn non_idempotent(reason: String) -> Self {
        Self {
            is_idempotent: false,
            non_idempotent_reason: Some(reason),
        }
    }
}

/// Decides whether re-evaluating an expression always yields the same value.
///
/// The walk is purely syntactic. Every call to an impure built-in makes the
/// whole expression non-idempotent, including calls inside lambda bodies that
/// might never run. Calls to lambda parameters are pure; whatever the bound
/// lambda does is checked where that lambda is written. Unknown names are
/// treated as pure and left for the executor to reject.
pub struct IdempotencyAnalyzer;

impl IdempotencyAnalyzer {
    pub fn analyze(expression: &Expression) -> IdempotencyReport {
        let mut bound = Vec::new();
        match first_impurity(expression, &mut bound) {
            Some(reason) => IdempotencyReport::non_idempotent(reason),
            None => IdempotencyReport::idempotent(),
        }
    }
}

fn first_impurity(expression: &Expression, bound: &mut Vec<String>) -> Option<String> {
    match expression {
        Expression::Number(_)
        | Expression::Text(_)
        | Expression::Boolean(_)
        | Expression::Null
        | Expression::SelfRef
        | Expression::Variable(_)
        | Expression::Pattern(_) => None,
        Expression::Call { name, args, .. } => {
            if !bound.contains(name) {
                if let Some(reason) = purity_of(name).and_then(|purity| purity.reason(name)) {
                    return Some(reason);
                }
            }
            args.iter().find_map(|arg| first_impurity(arg, bound))
        }
        Expression::Unary { operand, .. } => first_impurity(operand, bound),
        Expression::Binary { left, right, .. } => {
            first_impurity(left, bound).or_else(|| first_impurity(right, bound))
        }
        Expression::Lambda { params, body } => {
            let depth = bound.len();
            bound.extend(params.iter().cloned());
            let reason = first_impurity(body, bound);
            bound.truncate(depth);
            reason
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directive::{lexer::tokenize, parser::parse_directive};

    fn analyze(source: &str) -> IdempotencyReport {
        let directive = parse_directive(tokenize(source).unwrap(), source).unwrap();
        IdempotencyAnalyzer::analyze(&directive.expression)
    }

    #[test]
    fn test_pure_expressions() {
        for source in [
            "[2+2]",
            r#"[upper(title(.)) + "!"]"#,
            "[map(list(1, 2), {x -> x * 2})]",
            r##"[search(pattern("#", word+))]"##,
            "[frobnicate(1)]",
        ] {
            let report = analyze(source);
            assert!(report.is_idempotent, "{source} should be idempotent");
            assert_eq!(report.non_idempotent_reason, None);
        }
    }

    #[test]
    fn test_time_is_not_idempotent() {
        let report = analyze("[now]");
        assert!(!report.is_idempotent);
        assert!(report.non_idempotent_reason.unwrap().contains("current time"));
    }

    #[test]
    fn test_impurity_in_nested_positions() {
        assert!(!analyze("[1 + len(today())]").is_idempotent);
        assert!(!analyze("[-random()]").is_idempotent);
        assert!(!analyze("[map(list(1), {x -> random(x)})]").is_idempotent);
        let report = analyze(r#"[if(true, 1, toggle(., "done"))]"#);
        assert_eq!(
            report.non_idempotent_reason.as_deref(),
            Some("'toggle' modifies notes")
        );
    }

    #[test]
    fn test_first_impurity_is_reported() {
        let report = analyze(r#"[list(now(), set(., "x", 1))]"#);
        assert_eq!(
            report.non_idempotent_reason.as_deref(),
            Some("'now' reads the current time")
        );
    }

    #[test]
    fn test_bound_names_shadow_builtins() {
        assert!(analyze("[call({now -> now}, 1)]").is_idempotent);
        assert!(analyze("[call({random -> random(2)}, {x -> x})]").is_idempotent);
        // Outside the lambda the built-in is visible again.
        assert!(!analyze("[list(call({now -> now}, 1), now)]").is_idempotent);
    }
}
