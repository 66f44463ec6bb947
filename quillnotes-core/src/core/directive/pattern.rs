//! Compilation of `pattern(...)` literals into regular expressions.

use super::ast::{CharClass, Pattern, PatternAtom, PatternElement, Quantifier};
use regex::Regex;
use std::fmt;

/// A pattern literal evaluated into a matcher.
///
/// `id` identifies the evaluation that created it so the executor can tell
/// whether this particular pattern was ever used for matching.
#[derive(Clone)]
pub struct PatternValue {
    pub id: usize,
    pub pattern: Pattern,
    regex: Regex,
    anchored: Regex,
}

impl PatternValue {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns the regex engine's message if the translated expression is rejected
    /// (e.g. an exact repeat count above the engine's size limit).
    pub fn compile(id: usize, pattern: Pattern) -> Result<Self, String> {
        let body = translate(&pattern);
        let regex = Regex::new(&format!("(?s){body}")).map_err(|e| e.to_string())?;
        let anchored = Regex::new(&format!("(?s)^(?:{body})$")).map_err(|e| e.to_string())?;
        Ok(Self { id, pattern, regex, anchored })
    }

    /// Returns `true` if the whole of `text` matches.
    pub fn matches(&self, text: &str) -> bool {
        self.anchored.is_match(text)
    }

    /// Returns `true` if any substring of `text` matches.
    pub fn is_found_in(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex.find(text).map(|m| m.as_str())
    }

    pub fn find_all<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.regex.find_iter(text).map(|m| m.as_str()).collect()
    }

    /// Replaces every match with `replacement`, taken literally.
    pub fn replace_all(&self, text: &str, replacement: &str) -> String {
        self.regex.replace_all(text, regex::NoExpand(replacement)).into_owned()
    }
}

impl PartialEq for PatternValue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.pattern == other.pattern
    }
}

impl fmt::Debug for PatternValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternValue")
            .field("id", &self.id)
            .field("pattern", &self.pattern.to_string())
            .finish()
    }
}

fn translate(pattern: &Pattern) -> String {
    pattern
        .alternatives
        .iter()
        .map(|sequence| sequence.iter().map(translate_element).collect::<String>())
        .collect::<Vec<_>>()
        .join("|")
}

fn translate_element(element: &PatternElement) -> String {
    let atom = match &element.atom {
        PatternAtom::Literal(s) => format!("(?:{})", regex::escape(s)),
        PatternAtom::Class(class) => class_regex(*class).to_string(),
        PatternAtom::Group(group) => format!("(?:{})", translate(group)),
    };
    match element.quantifier {
        Quantifier::One => atom,
        Quantifier::Exactly(n) => format!("{atom}{{{n}}}"),
        Quantifier::ZeroOrMore => format!("{atom}*"),
        Quantifier::OneOrMore => format!("{atom}+"),
        Quantifier::Optional => format!("{atom}?"),
    }
}

fn class_regex(class: CharClass) -> &'static str {
    match class {
        CharClass::Digit => r"\d",
        CharClass::Letter => r"\p{Alphabetic}",
        CharClass::Upper => r"\p{Uppercase}",
        CharClass::Lower => r"\p{Lowercase}",
        CharClass::Alnum => r"[\p{Alphabetic}\d]",
        CharClass::Space => r"\s",
        CharClass::Word => r"\w",
        CharClass::Punct => r"\p{P}",
        CharClass::Any => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directive::ast::Expression;
    use crate::core::directive::{lexer::tokenize, parser::parse_directive};

    fn compile(source: &str) -> PatternValue {
        let directive = parse_directive(tokenize(source).unwrap(), source).unwrap();
        let Expression::Pattern(pattern) = directive.expression else {
            panic!("expected pattern literal");
        };
        PatternValue::compile(0, pattern).unwrap()
    }

    #[test]
    fn test_date_pattern() {
        let p = compile(r#"[pattern(digit*4, "-", digit*2, "-", digit*2)]"#);
        assert!(p.matches("2024-03-09"));
        assert!(!p.matches("2024-3-9"));
        assert_eq!(p.find("due 2024-03-09 noon"), Some("2024-03-09"));
    }

    #[test]
    fn test_literals_are_escaped() {
        let p = compile(r#"[pattern("a.b")]"#);
        assert!(p.matches("a.b"));
        assert!(!p.matches("axb"));
    }

    #[test]
    fn test_alternation_and_quantifiers() {
        let p = compile(r##"[pattern("#", word+ | "@", letter*)]"##);
        assert_eq!(p.find_all("see #todo and @bob"), vec!["#todo", "@bob"]);
        assert!(p.matches("@"));
    }

    #[test]
    fn test_replace_is_literal() {
        let p = compile("[pattern(digit+)]");
        assert_eq!(p.replace_all("a1b22", "$0"), "a$0b$0");
    }
}
