//! Tokenizer for directive source text.

use std::fmt;
use thiserror::Error;

/// Token kinds of the directive language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    String(String),
    Identifier(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Arrow,
    Pipe,
    Question,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {n}"),
            Self::String(s) => write!(f, "string {s:?}"),
            Self::Identifier(name) => write!(f, "'{name}'"),
            Self::Plus => f.write_str("'+'"),
            Self::Minus => f.write_str("'-'"),
            Self::Star => f.write_str("'*'"),
            Self::Slash => f.write_str("'/'"),
            Self::Percent => f.write_str("'%'"),
            Self::EqEq => f.write_str("'=='"),
            Self::NotEq => f.write_str("'!='"),
            Self::Lt => f.write_str("'<'"),
            Self::Le => f.write_str("'<='"),
            Self::Gt => f.write_str("'>'"),
            Self::Ge => f.write_str("'>='"),
            Self::AndAnd => f.write_str("'&&'"),
            Self::OrOr => f.write_str("'||'"),
            Self::Bang => f.write_str("'!'"),
            Self::Arrow => f.write_str("'->'"),
            Self::Pipe => f.write_str("'|'"),
            Self::Question => f.write_str("'?'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::LBrace => f.write_str("'{'"),
            Self::RBrace => f.write_str("'}'"),
            Self::Comma => f.write_str("','"),
            Self::Dot => f.write_str("'.'"),
            Self::Eof => f.write_str("end of input"),
        }
    }
}

/// A token with its kind, raw source text and byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

/// Malformed token in directive source text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexerError {
    #[error("unexpected character '{character}' at {offset}")]
    UnexpectedCharacter { character: char, offset: usize },

    #[error("unterminated string starting at {offset}")]
    UnterminatedString { offset: usize },
}

/// Converts `source` into tokens, always terminated by a single [`TokenKind::Eof`].
///
/// # Errors
///
/// Returns [`LexerError`] on an unrecognized character or an unterminated string.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexerError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexerError> {
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            if c.is_ascii_digit() {
                self.number(offset);
                continue;
            }
            if c == '_' || c.is_ascii_alphabetic() {
                self.identifier(offset);
                continue;
            }
            if c == '"' || c == '\'' {
                self.string(offset, c)?;
                continue;
            }
            self.chars.next();
            let kind = match c {
                '+' => TokenKind::Plus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '?' => TokenKind::Question,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                ',' => TokenKind::Comma,
                '.' => TokenKind::Dot,
                '-' => self.pair('>', TokenKind::Arrow, TokenKind::Minus),
                '<' => self.pair('=', TokenKind::Le, TokenKind::Lt),
                '>' => self.pair('=', TokenKind::Ge, TokenKind::Gt),
                '!' => self.pair('=', TokenKind::NotEq, TokenKind::Bang),
                '|' => self.pair('|', TokenKind::OrOr, TokenKind::Pipe),
                '=' => {
                    if self.eat('=') {
                        TokenKind::EqEq
                    } else {
                        return Err(LexerError::UnexpectedCharacter { character: '=', offset });
                    }
                }
                '&' => {
                    if self.eat('&') {
                        TokenKind::AndAnd
                    } else {
                        return Err(LexerError::UnexpectedCharacter { character: '&', offset });
                    }
                }
                other => {
                    return Err(LexerError::UnexpectedCharacter { character: other, offset });
                }
            };
            self.push(kind, offset);
        }

        self.tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            offset: self.source.len(),
        });
        Ok(self.tokens)
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn pair(&mut self, second: char, matched: TokenKind, single: TokenKind) -> TokenKind {
        if self.eat(second) { matched } else { single }
    }

    fn end_offset(&mut self) -> usize {
        self.chars.peek().map_or(self.source.len(), |&(i, _)| i)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let end = self.end_offset();
        self.tokens.push(Token {
            kind,
            text: self.source[start..end].to_string(),
            offset: start,
        });
    }

    fn number(&mut self, start: usize) {
        self.skip_digits();
        // Only consume '.' when a digit follows, so `1.` stays a number and a dot.
        let source = self.source;
        let mut lookahead = source[self.end_offset()..].chars();
        if lookahead.next() == Some('.') && lookahead.next().is_some_and(|c| c.is_ascii_digit()) {
            self.chars.next();
            self.skip_digits();
        }
        let end = self.end_offset();
        let text = &self.source[start..end];
        // Digits with at most one interior dot always parse.
        let value = text.parse::<f64>().unwrap_or_default();
        self.push(TokenKind::Number(value), start);
    }

    fn skip_digits(&mut self) {
        while matches!(self.chars.peek(), Some(&(_, c)) if c.is_ascii_digit()) {
            self.chars.next();
        }
    }

    fn identifier(&mut self, start: usize) {
        while matches!(self.chars.peek(), Some(&(_, c)) if c == '_' || c.is_ascii_alphanumeric()) {
            self.chars.next();
        }
        let end = self.end_offset();
        let name = self.source[start..end].to_string();
        self.push(TokenKind::Identifier(name), start);
    }

    fn string(&mut self, start: usize, quote: char) -> Result<(), LexerError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                None => return Err(LexerError::UnterminatedString { offset: start }),
                Some((_, c)) if c == quote => break,
                Some((_, '\\')) => match self.chars.next() {
                    None => return Err(LexerError::UnterminatedString { offset: start }),
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, escaped)) => value.push(escaped),
                },
                Some((_, c)) => value.push(c),
            }
        }
        self.push(TokenKind::String(value), start);
        Ok(())
    }
}
