//! Expression tree for parsed directives.
//!
//! Trees are built once by the [parser](super::parser) and never mutated
//! afterwards. Lambda bodies are shared behind an [`Arc`] so closures created
//! at run time can hold on to them without cloning the subtree.

use std::fmt;
use std::sync::Arc;

/// One parsed bracketed directive.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// The single root expression between the brackets.
    pub expression: Expression,
    /// The original source text, brackets included.
    pub source: String,
}

/// A node of the directive expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Number(f64),
    Text(String),
    Boolean(bool),
    Null,
    /// `.`, the note the directive lives in.
    SelfRef,
    /// A lambda parameter bound by an enclosing lambda.
    Variable(String),
    /// A built-in call, or an invocation of a bound lambda parameter.
    ///
    /// Bare identifiers that are not bound parameters are zero-argument calls.
    Call {
        name: String,
        args: Vec<Expression>,
        offset: usize,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// A deferred body evaluated only when the closure is invoked.
    Lambda {
        params: Vec<String>,
        body: Arc<Expression>,
    },
    /// A matcher literal, only meaningful as an argument of matching built-ins.
    Pattern(Pattern),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Remainder => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// Alternatives of element sequences: `"a", digit*2 | "b"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub alternatives: Vec<Vec<PatternElement>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternElement {
    pub atom: PatternAtom,
    pub quantifier: Quantifier,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternAtom {
    Literal(String),
    Class(CharClass),
    Group(Pattern),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    One,
    Exactly(usize),
    ZeroOrMore,
    OneOrMore,
    Optional,
}

/// Named character classes usable inside `pattern(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    Digit,
    Letter,
    Upper,
    Lower,
    Alnum,
    Space,
    Word,
    Punct,
    Any,
}

impl CharClass {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "digit" => Self::Digit,
            "letter" => Self::Letter,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "alnum" => Self::Alnum,
            "space" => Self::Space,
            "word" => Self::Word,
            "punct" => Self::Punct,
            "any" => Self::Any,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Digit => "digit",
            Self::Letter => "letter",
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Alnum => "alnum",
            Self::Space => "space",
            Self::Word => "word",
            Self::Punct => "punct",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, sequence) in self.alternatives.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            for (j, element) in sequence.iter().enumerate() {
                if j > 0 {
                    f.write_str(", ")?;
                }
                match &element.atom {
                    PatternAtom::Literal(s) => write!(f, "{s:?}")?,
                    PatternAtom::Class(c) => f.write_str(c.name())?,
                    PatternAtom::Group(p) => write!(f, "({p})")?,
                }
                match element.quantifier {
                    Quantifier::One => {}
                    Quantifier::Exactly(n) => write!(f, "*{n}")?,
                    Quantifier::ZeroOrMore => f.write_str("*")?,
                    Quantifier::OneOrMore => f.write_str("+")?,
                    Quantifier::Optional => f.write_str("?")?,
                }
            }
        }
        Ok(())
    }
}
