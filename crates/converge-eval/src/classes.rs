use std::collections::BTreeSet;

use converge_core::{syntax, ConvergeError, Result};
use regex::Regex;
use tracing::{debug, trace};

/// Where a soft class lives: bundle classes vanish when the next bundle starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassScope {
    Bundle,
    #[default]
    Namespace,
}

#[derive(Debug, Clone, Default)]
pub struct ClassContext {
    hard: BTreeSet<String>,
    soft: BTreeSet<String>,
    bundle: BTreeSet<String>,
    negated: BTreeSet<String>,
}

impl ClassContext {
    pub fn new() -> Self {
        let mut ctx = Self::default();
        ctx.define_hard("any");
        ctx
    }

    /// `any` plus the operating system, architecture and family of the host.
    pub fn with_host_classes() -> Self {
        let mut ctx = Self::new();
        ctx.define_hard(std::env::consts::OS);
        ctx.define_hard(std::env::consts::ARCH);
        ctx.define_hard(std::env::consts::FAMILY);
        ctx
    }

    pub fn define_hard(&mut self, name: &str) {
        let name = syntax::canonify(name);
        if name.is_empty() || self.negated.contains(&name) {
            return;
        }
        self.hard.insert(name);
    }

    /// Returns false when the class is negated and therefore never defined.
    pub fn define(&mut self, name: &str, scope: ClassScope) -> bool {
        let name = syntax::canonify(name);
        if name.is_empty() {
            return false;
        }
        if self.negated.contains(&name) {
            debug!("Class \"{}\" is negated, not defining it", name);
            return false;
        }
        trace!("Defining class \"{}\" ({:?})", name, scope);
        match scope {
            ClassScope::Bundle => self.bundle.insert(name),
            ClassScope::Namespace => self.soft.insert(name),
        };
        true
    }

    pub fn undefine(&mut self, name: &str) {
        let name = syntax::canonify(name);
        self.soft.remove(&name);
        self.bundle.remove(&name);
    }

    pub fn negate(&mut self, name: &str) {
        let name = syntax::canonify(name);
        self.hard.remove(&name);
        self.soft.remove(&name);
        self.bundle.remove(&name);
        self.negated.insert(name);
    }

    pub fn clear_bundle(&mut self) {
        self.bundle.clear();
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.hard.contains(name) || self.soft.contains(name) || self.bundle.contains(name)
    }

    pub fn is_negated(&self, name: &str) -> bool {
        self.negated.contains(name)
    }

    /// All defined classes, sorted.
    pub fn defined(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self
            .hard
            .iter()
            .chain(self.soft.iter())
            .chain(self.bundle.iter())
            .map(String::as_str)
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    /// Defined classes whose whole name matches `pattern`.
    pub fn matching(&self, pattern: &Regex) -> Vec<&str> {
        self.defined()
            .into_iter()
            .filter(|name| {
                pattern
                    .find(name)
                    .is_some_and(|m| m.start() == 0 && m.end() == name.len())
            })
            .collect()
    }

    pub fn evaluate(&self, expression: &str) -> Result<bool> {
        let mut parser = ExpressionParser {
            classes: self,
            expression,
            chars: expression.chars().collect(),
            pos: 0,
        };
        let value = parser.parse_or()?;
        parser.skip_whitespace();
        if parser.pos < parser.chars.len() {
            return Err(parser.error(format!(
                "unexpected '{}' at offset {}",
                parser.chars[parser.pos], parser.pos
            )));
        }
        Ok(value)
    }
}

struct ExpressionParser<'a> {
    classes: &'a ClassContext,
    expression: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> ExpressionParser<'a> {
    fn error(&self, message: impl Into<String>) -> ConvergeError {
        ConvergeError::ClassExpression {
            expression: self.expression.to_string(),
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.get(self.pos).copied()
    }

    fn parse_or(&mut self) -> Result<bool> {
        let mut value = self.parse_and()?;
        while self.peek() == Some('|') {
            self.pos += 1;
            if self.chars.get(self.pos) == Some(&'|') {
                self.pos += 1;
            }
            let rhs = self.parse_and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn parse_and(&mut self) -> Result<bool> {
        let mut value = self.parse_not()?;
        while matches!(self.peek(), Some('.') | Some('&')) {
            let op = self.chars[self.pos];
            self.pos += 1;
            if op == '&' && self.chars.get(self.pos) == Some(&'&') {
                self.pos += 1;
            }
            let rhs = self.parse_not()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn parse_not(&mut self) -> Result<bool> {
        if self.peek() == Some('!') {
            self.pos += 1;
            return Ok(!self.parse_not()?);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<bool> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.parse_or()?;
                if self.peek() != Some(')') {
                    return Err(self.error("missing closing parenthesis"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if is_class_char(c) => {
                let start = self.pos;
                while self.chars.get(self.pos).is_some_and(|c| is_class_char(*c)) {
                    self.pos += 1;
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                Ok(self.classes.is_defined(&name))
            }
            Some(c) => Err(self.error(format!("unexpected '{}' at offset {}", c, self.pos))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

fn is_class_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(classes: &[&str]) -> ClassContext {
        let mut ctx = ClassContext::new();
        for class in classes {
            ctx.define(class, ClassScope::Namespace);
        }
        ctx
    }

    #[test]
    fn test_any_is_always_defined() {
        let ctx = ClassContext::new();
        assert!(ctx.evaluate("any").unwrap());
        assert!(!ctx.evaluate("!any").unwrap());
    }

    #[test]
    fn test_operators() {
        let ctx = ctx(&["linux", "web"]);
        assert!(ctx.evaluate("linux.web").unwrap());
        assert!(ctx.evaluate("linux&web").unwrap());
        assert!(!ctx.evaluate("linux.db").unwrap());
        assert!(ctx.evaluate("db|web").unwrap());
        assert!(ctx.evaluate("db||web").unwrap());
        assert!(ctx.evaluate("!db").unwrap());
        assert!(!ctx.evaluate("!(db|web)").unwrap());
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let ctx = ctx(&["a"]);
        assert!(ctx.evaluate("a|b.c").unwrap());
        assert!(!ctx.evaluate("(a|b).c").unwrap());
    }

    #[test]
    fn test_malformed_expressions() {
        let ctx = ClassContext::new();
        assert!(matches!(
            ctx.evaluate("(any"),
            Err(ConvergeError::ClassExpression { .. })
        ));
        assert!(ctx.evaluate("any.").is_err());
        assert!(ctx.evaluate("").is_err());
        assert!(ctx.evaluate("any)").is_err());
    }

    #[test]
    fn test_negated_classes_never_define() {
        let mut ctx = ClassContext::new();
        ctx.negate("debug");
        assert!(!ctx.define("debug", ClassScope::Namespace));
        assert!(!ctx.is_defined("debug"));
    }

    #[test]
    fn test_bundle_classes_are_cleared() {
        let mut ctx = ClassContext::new();
        ctx.define("local", ClassScope::Bundle);
        ctx.define("global", ClassScope::Namespace);
        ctx.clear_bundle();
        assert!(!ctx.is_defined("local"));
        assert!(ctx.is_defined("global"));
    }

    #[test]
    fn test_names_are_canonified() {
        let mut ctx = ClassContext::new();
        ctx.define("www.example.com", ClassScope::Namespace);
        assert!(ctx.is_defined("www_example_com"));
        assert!(ctx.evaluate("www_example_com").unwrap());
    }

    #[test]
    fn test_matching() {
        let ctx = ctx(&["web_1", "web_2", "db_1"]);
        let re = Regex::new("web_.*").unwrap();
        assert_eq!(ctx.matching(&re), vec!["web_1", "web_2"]);
    }
}
