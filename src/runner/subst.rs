//! Captured variables and placeholder substitution
//!
//! Step text is tokenized once into literal segments and `{name}`
//! placeholder references, then rendered against the store. Substituted
//! literals are never rescanned, so a value containing brace characters
//! cannot trigger a second substitution pass.

use std::collections::HashMap;

use crate::common::{Error, Result};
use crate::protocol::value::MooValue;

/// Mapping from capture name to value. Created empty per test, mutated
/// only by steps with a `capture:` directive, discarded at test end.
#[derive(Debug, Default)]
pub struct VariableStore {
    vars: HashMap<String, MooValue>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: MooValue) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&MooValue> {
        self.vars.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// One token of a step's text
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Split text into literal segments and `{name}` placeholders. Only
/// identifier-shaped names count, so MOO list literals like `{1, 2}`
/// pass through untouched.
fn tokenize(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(end) = placeholder_end(&chars, i) {
                let name: String = chars[i + 1..end].iter().collect();
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
                i = end + 1;
                continue;
            }
        }
        literal.push(chars[i]);
        i += 1;
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Index of the closing brace if chars[start..] opens an
/// identifier-shaped placeholder
fn placeholder_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let first = *chars.get(i)?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            return Some(i);
        }
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        i += 1;
    }
    None
}

/// Substitute `{name}` placeholders with the canonical literal form of
/// the captured values. An unresolved placeholder is an error raised
/// before any network traffic happens.
pub fn substitute(text: &str, store: &VariableStore) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    for segment in tokenize(text) {
        match segment {
            Segment::Literal(s) => out.push_str(&s),
            Segment::Placeholder(name) => {
                let value = store
                    .get(&name)
                    .ok_or(Error::UnresolvedPlaceholder { name })?;
                out.push_str(&value.to_string());
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::value::ErrorCode;

    #[test]
    fn test_object_ref_substitutes_unquoted() {
        let mut store = VariableStore::new();
        store.insert("obj", MooValue::Obj(128));
        assert_eq!(
            substitute("valid({obj})", &store).unwrap(),
            "valid(#128)"
        );
    }

    #[test]
    fn test_string_substitutes_quoted() {
        let mut store = VariableStore::new();
        store.insert("name", MooValue::Str("foo".to_string()));
        assert_eq!(substitute("x = {name};", &store).unwrap(), "x = \"foo\";");
    }

    #[test]
    fn test_error_code_substitutes_bare() {
        let mut store = VariableStore::new();
        store.insert("err", MooValue::Err(ErrorCode::EPerm));
        assert_eq!(
            substitute("raise({err});", &store).unwrap(),
            "raise(E_PERM);"
        );
    }

    #[test]
    fn test_moo_list_literals_untouched() {
        let store = VariableStore::new();
        assert_eq!(
            substitute("return {1, 2} == {1, 2};", &store).unwrap(),
            "return {1, 2} == {1, 2};"
        );
    }

    #[test]
    fn test_unresolved_placeholder_is_error() {
        let store = VariableStore::new();
        match substitute("valid({missing})", &store) {
            Err(Error::UnresolvedPlaceholder { name }) => assert_eq!(name, "missing"),
            other => panic!("expected unresolved placeholder, got {other:?}"),
        }
    }

    #[test]
    fn test_no_double_substitution() {
        let mut store = VariableStore::new();
        store.insert("a", MooValue::Str("{b}".to_string()));
        store.insert("b", MooValue::Int(1));
        // the substituted literal's braces are not rescanned
        assert_eq!(substitute("x = {a};", &store).unwrap(), "x = \"{b}\";");
    }

    #[test]
    fn test_adjacent_placeholders() {
        let mut store = VariableStore::new();
        store.insert("a", MooValue::Int(1));
        store.insert("b", MooValue::Int(2));
        assert_eq!(substitute("{a}{b}", &store).unwrap(), "12");
    }

    #[test]
    fn test_list_value_substitution() {
        let mut store = VariableStore::new();
        store.insert(
            "xs",
            MooValue::List(vec![MooValue::Int(1), MooValue::Obj(-1)]),
        );
        assert_eq!(
            substitute("length({xs})", &store).unwrap(),
            "length({1, #-1})"
        );
    }
}
