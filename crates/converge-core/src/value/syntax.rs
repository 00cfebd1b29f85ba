//! Reference-token syntax: `$(name)`, `${name}` for scalar references and
//! `@(name)`, `@{name}` for naked list references.

pub const SCALAR_SIGIL: u8 = b'$';
pub const LIST_SIGIL: u8 = b'@';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Paren,
    Brace,
}

impl Bracket {
    pub fn wrap(self, sigil: u8, inner: &str) -> String {
        let sigil = sigil as char;
        match self {
            Bracket::Paren => format!("{sigil}({inner})"),
            Bracket::Brace => format!("{sigil}{{{inner}}}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarRef<'a> {
    pub start: usize,
    pub end: usize,
    pub inner: &'a str,
    pub bracket: Bracket,
    pub sigil: u8,
}

impl<'a> VarRef<'a> {
    pub fn token<'b>(&self, text: &'b str) -> &'b str {
        &text[self.start..self.end]
    }
}

/// Parses a reference starting exactly at `pos`. Brackets of both kinds are
/// counted together, so `$(a[${b}])` closes on the final `)`.
pub fn reference_at(text: &str, pos: usize, sigil: u8) -> Option<VarRef<'_>> {
    let bytes = text.as_bytes();
    if bytes.get(pos) != Some(&sigil) {
        return None;
    }
    let bracket = match bytes.get(pos + 1) {
        Some(b'(') => Bracket::Paren,
        Some(b'{') => Bracket::Brace,
        _ => return None,
    };

    let mut depth = 0usize;
    for (offset, byte) in bytes[pos + 1..].iter().enumerate() {
        match byte {
            b'(' | b'{' => depth += 1,
            b')' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    let close = pos + 1 + offset;
                    if close == pos + 2 {
                        return None;
                    }
                    return Some(VarRef {
                        start: pos,
                        end: close + 1,
                        inner: &text[pos + 2..close],
                        bracket,
                        sigil,
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// All complete top-level references with the given sigil, left to right.
pub fn references(text: &str, sigil: u8) -> Vec<VarRef<'_>> {
    let mut found = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        if let Some(var) = reference_at(text, pos, sigil) {
            pos = var.end;
            found.push(var);
        } else {
            pos += 1;
        }
    }
    found
}

/// True when the text holds at least one complete `$(...)` or `${...}` token.
pub fn is_expandable(text: &str) -> bool {
    let bytes = text.as_bytes();
    (0..bytes.len()).any(|pos| bytes[pos] == SCALAR_SIGIL && reference_at(text, pos, SCALAR_SIGIL).is_some())
}

/// True when the whole text is exactly one reference token with `sigil`.
pub fn is_naked_var(text: &str, sigil: u8) -> bool {
    matches!(reference_at(text, 0, sigil), Some(var) if var.end == text.len())
}

/// `@(name)` -> `name`.
pub fn naked_name(text: &str) -> Option<&str> {
    let sigil = *text.as_bytes().first()?;
    match reference_at(text, 0, sigil) {
        Some(var) if var.end == text.len() => Some(var.inner),
        _ => None,
    }
}

pub fn contains_var(text: &str, name: &str) -> bool {
    text.contains(&format!("$({name})")) || text.contains(&format!("${{{name}}}"))
}

/// Splits `scope.name` on the first dot that precedes any array index.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    let dot = name.find('.')?;
    if let Some(bracket) = name.find('[') {
        if bracket < dot {
            return None;
        }
    }
    let (scope, rest) = (&name[..dot], &name[dot + 1..]);
    if scope.is_empty() || rest.is_empty() {
        return None;
    }
    Some((scope, rest))
}

pub fn canonify(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_at_simple() {
        let var = reference_at("$(x) tail", 0, SCALAR_SIGIL).unwrap();
        assert_eq!(var.inner, "x");
        assert_eq!(var.end, 4);
        assert_eq!(var.bracket, Bracket::Paren);
    }

    #[test]
    fn test_reference_at_nested() {
        let text = "$(array[${index}])!";
        let var = reference_at(text, 0, SCALAR_SIGIL).unwrap();
        assert_eq!(var.inner, "array[${index}]");
        assert_eq!(var.token(text), "$(array[${index}])");
    }

    #[test]
    fn test_reference_rejects_empty_and_unbalanced() {
        assert!(reference_at("$()", 0, SCALAR_SIGIL).is_none());
        assert!(reference_at("$(x", 0, SCALAR_SIGIL).is_none());
        assert!(reference_at("$x", 0, SCALAR_SIGIL).is_none());
    }

    #[test]
    fn test_references_in_order() {
        let names: Vec<_> = references("a $(one) b ${two} $ c", SCALAR_SIGIL)
            .into_iter()
            .map(|v| v.inner)
            .collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn test_naked_vars() {
        assert!(is_naked_var("@(list)", LIST_SIGIL));
        assert!(!is_naked_var("@(list) ", LIST_SIGIL));
        assert!(!is_naked_var("$(list)", LIST_SIGIL));
        assert_eq!(naked_name("@{list}"), Some("list"));
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("main.x"), Some(("main", "x")));
        assert_eq!(split_qualified("x"), None);
        assert_eq!(split_qualified("array[a.b]"), None);
        assert_eq!(split_qualified("b.array[a.b]"), Some(("b", "array[a.b]")));
    }

    #[test]
    fn test_canonify() {
        assert_eq!(canonify("www.example.com-1"), "www_example_com_1");
    }
}
