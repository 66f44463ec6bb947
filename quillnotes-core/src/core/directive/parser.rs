//! Recursive-descent parser producing one [`Directive`] per bracketed source.
//!
//! Precedence, lowest to highest:
//!
//! | level          | operators                 | associativity   |
//! |----------------|---------------------------|-----------------|
//! | logical or     | `or`, `\|\|`              | left            |
//! | logical and    | `and`, `&&`               | left            |
//! | comparison     | `== != < <= > >=`         | non-associative |
//! | additive       | `+ -`                     | left            |
//! | multiplicative | `* / %`                   | left            |
//! | unary          | `- ! not`                 | right (prefix)  |
//!
//! Calls `name(a, b)` bind tighter than every operator. Lambdas are written
//! `{x, y -> body}` (or `{body}` with no parameters) and patterns
//! `pattern(digit*4, "-" | letter+)`.

use super::ast::{
    BinaryOp, CharClass, Directive, Expression, Pattern, PatternAtom, PatternElement,
    Quantifier, UnaryOp,
};
use super::lexer::{Token, TokenKind};
use std::sync::Arc;
use thiserror::Error;

/// Malformed directive grammar, with the byte offset of the offending token.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("at {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

const RESERVED: &[&str] = &["true", "false", "null", "and", "or", "not"];

/// Deepest nesting of groups, call arguments, lambdas and prefix operators.
///
/// Parsing, analysis and evaluation all recurse over the tree, so this keeps
/// every later stage well inside the stack.
pub const MAX_NESTING: usize = 64;

/// Parses a complete bracketed directive from its token stream.
///
/// The stream must be exactly `'[' expression ']' Eof`.
///
/// # Errors
///
/// Returns [`ParseError`] on any grammar violation, including trailing tokens.
pub fn parse_directive(tokens: Vec<Token>, source: &str) -> Result<Directive, ParseError> {
    let mut parser = Parser::new(tokens);
    parser.expect(&TokenKind::LBracket)?;
    if parser.check(&TokenKind::RBracket) {
        return Err(parser.error("empty directive"));
    }
    let expression = parser.expression()?;
    parser.expect(&TokenKind::RBracket)?;
    if !parser.check(&TokenKind::Eof) {
        let found = parser.current().kind.to_string();
        return Err(parser.error(&format!("unexpected {found} after directive")));
    }
    Ok(Directive {
        expression,
        source: source.to_string(),
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Lambda parameter names, innermost scope last.
    scopes: Vec<Vec<String>>,
    depth: usize,
}

impl Parser {
    fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
            let offset = tokens.last().map_or(0, |t| t.offset + t.text.len());
            tokens.push(Token { kind: TokenKind::Eof, text: String::new(), offset });
        }
        Self { tokens, pos: 0, scopes: Vec::new(), depth: 0 }
    }

    // ── Token helpers ───────────────────────────────────────────────────────

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self, ahead: usize) -> &TokenKind {
        let index = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Identifier(name) if name == word)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            let found = self.current().kind.to_string();
            Err(self.error(&format!("expected {kind}, found {found}")))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            position: self.current().offset,
            message: message.to_string(),
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.iter().any(|p| p == name))
    }

    /// Runs `rule` one nesting level deeper.
    fn nested<T>(&mut self, rule: fn(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    // ── Expressions ─────────────────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expression, ParseError> {
        self.or()
    }

    fn or(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.and()?;
        while self.check(&TokenKind::OrOr) || self.check_word("or") {
            self.advance();
            let right = self.and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.comparison()?;
        while self.check(&TokenKind::AndAnd) || self.check_word("and") {
            self.advance();
            let right = self.comparison()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn comparison_op(&self) -> Option<BinaryOp> {
        match self.current().kind {
            TokenKind::EqEq => Some(BinaryOp::Equal),
            TokenKind::NotEq => Some(BinaryOp::NotEqual),
            TokenKind::Lt => Some(BinaryOp::Less),
            TokenKind::Le => Some(BinaryOp::LessEqual),
            TokenKind::Gt => Some(BinaryOp::Greater),
            TokenKind::Ge => Some(BinaryOp::GreaterEqual),
            _ => None,
        }
    }

    fn comparison(&mut self) -> Result<Expression, ParseError> {
        let left = self.additive()?;
        let Some(op) = self.comparison_op() else {
            return Ok(left);
        };
        self.advance();
        let right = self.additive()?;
        if self.comparison_op().is_some() {
            return Err(self.error("comparison operators cannot be chained"));
        }
        Ok(binary(op, left, right))
    }

    fn additive(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Remainder,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expression, ParseError> {
        let op = if self.check(&TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.check(&TokenKind::Bang) || self.check_word("not") {
            UnaryOp::Not
        } else {
            return self.primary();
        };
        self.advance();
        let operand = self.nested(Self::unary)?;
        Ok(Expression::Unary { op, operand: Box::new(operand) })
    }

    fn primary(&mut self) -> Result<Expression, ParseError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expression::Number(n))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expression::Text(s))
            }
            TokenKind::Dot => {
                self.advance();
                Ok(Expression::SelfRef)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.nested(Self::expression)?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBrace => self.nested(Self::lambda),
            TokenKind::Identifier(name) => self.identifier(name, token.offset),
            other => Err(self.error(&format!("expected expression, found {other}"))),
        }
    }

    fn identifier(&mut self, name: String, offset: usize) -> Result<Expression, ParseError> {
        match name.as_str() {
            "true" => {
                self.advance();
                return Ok(Expression::Boolean(true));
            }
            "false" => {
                self.advance();
                return Ok(Expression::Boolean(false));
            }
            "null" => {
                self.advance();
                return Ok(Expression::Null);
            }
            "and" | "or" | "not" => {
                return Err(self.error(&format!("expected expression, found '{name}'")));
            }
            _ => {}
        }

        let bound = self.is_bound(&name);
        let has_args = *self.peek_kind(1) == TokenKind::LParen;

        if name == "pattern" && !bound && has_args {
            self.advance();
            self.advance();
            let pattern = self.pattern()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(Expression::Pattern(pattern));
        }

        self.advance();
        if !has_args {
            return Ok(if bound {
                Expression::Variable(name)
            } else {
                Expression::Call { name, args: Vec::new(), offset }
            });
        }

        self.advance();
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.nested(Self::expression)?);
                if self.eat(&TokenKind::Comma) {
                    continue;
                }
                self.expect(&TokenKind::RParen)?;
                break;
            }
        }
        Ok(Expression::Call { name, args, offset })
    }

    /// Returns the parameter count when the tokens after `{` form `a, b ->`.
    fn lambda_header_len(&self) -> Option<usize> {
        let mut ahead = 1;
        let mut count = 0;
        loop {
            if !matches!(self.peek_kind(ahead), TokenKind::Identifier(_)) {
                return None;
            }
            count += 1;
            ahead += 1;
            match self.peek_kind(ahead) {
                TokenKind::Comma => ahead += 1,
                TokenKind::Arrow => return Some(count),
                _ => return None,
            }
        }
    }

    fn lambda(&mut self) -> Result<Expression, ParseError> {
        let header = self.lambda_header_len();
        self.advance();

        let mut params: Vec<String> = Vec::new();
        if let Some(count) = header {
            for _ in 0..count {
                let token = self.advance();
                let TokenKind::Identifier(name) = token.kind else {
                    return Err(ParseError {
                        position: token.offset,
                        message: "expected parameter name".to_string(),
                    });
                };
                if RESERVED.contains(&name.as_str()) || name == "pattern" {
                    return Err(ParseError {
                        position: token.offset,
                        message: format!("'{name}' cannot be used as a parameter name"),
                    });
                }
                if params.contains(&name) {
                    return Err(ParseError {
                        position: token.offset,
                        message: format!("duplicate parameter '{name}'"),
                    });
                }
                params.push(name);
                self.eat(&TokenKind::Comma);
            }
            self.expect(&TokenKind::Arrow)?;
        }

        if self.check(&TokenKind::RBrace) {
            return Err(self.error("lambda body is empty"));
        }

        self.scopes.push(params.clone());
        let body = self.expression();
        self.scopes.pop();
        let body = body?;

        self.expect(&TokenKind::RBrace)?;
        Ok(Expression::Lambda { params, body: Arc::new(body) })
    }

    // ── Patterns ────────────────────────────────────────────────────────────

    fn pattern(&mut self) -> Result<Pattern, ParseError> {
        let mut alternatives = vec![self.pattern_sequence()?];
        while self.eat(&TokenKind::Pipe) {
            alternatives.push(self.pattern_sequence()?);
        }
        Ok(Pattern { alternatives })
    }

    fn pattern_sequence(&mut self) -> Result<Vec<PatternElement>, ParseError> {
        let mut elements = vec![self.pattern_element()?];
        while self.eat(&TokenKind::Comma) {
            elements.push(self.pattern_element()?);
        }
        Ok(elements)
    }

    fn pattern_element(&mut self) -> Result<PatternElement, ParseError> {
        let token = self.current().clone();
        let atom = match token.kind {
            TokenKind::String(s) if s.is_empty() => {
                return Err(self.error("empty literal in pattern"));
            }
            TokenKind::String(s) => {
                self.advance();
                PatternAtom::Literal(s)
            }
            TokenKind::Identifier(name) => {
                let class = CharClass::from_name(&name)
                    .ok_or_else(|| self.error(&format!("unknown character class '{name}'")))?;
                self.advance();
                PatternAtom::Class(class)
            }
            TokenKind::LParen => {
                self.advance();
                let group = self.nested(Self::pattern)?;
                self.expect(&TokenKind::RParen)?;
                PatternAtom::Group(group)
            }
            other => return Err(self.error(&format!("expected pattern element, found {other}"))),
        };

        let quantifier = match self.current().kind {
            TokenKind::Star => {
                self.advance();
                if let TokenKind::Number(n) = self.current().kind {
                    if n.fract() != 0.0 || n < 1.0 {
                        return Err(self.error("repeat count must be a positive whole number"));
                    }
                    self.advance();
                    Quantifier::Exactly(n as usize)
                } else {
                    Quantifier::ZeroOrMore
                }
            }
            TokenKind::Plus => {
                self.advance();
                Quantifier::OneOrMore
            }
            TokenKind::Question => {
                self.advance();
                Quantifier::Optional
            }
            _ => Quantifier::One,
        };

        Ok(PatternElement { atom, quantifier })
    }
}

fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
