//! `{{path}}` interpolation over a JSON variable bag.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Walk a dotted path through nested objects. Numeric segments index arrays.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Same as [`lookup_path`] but rooted at a variable map.
pub fn lookup_in<'a>(vars: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = vars.get(head)?;
    match rest {
        Some(rest) => lookup_path(value, rest),
        None => Some(value),
    }
}

/// String form used when a value is spliced into text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Byte length and path of a placeholder sitting at the very start of `text`.
pub fn leading_placeholder(text: &str) -> Option<(usize, &str)> {
    let caps = placeholder().captures(text)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 {
        return None;
    }
    Some((whole.end(), caps.get(1)?.as_str()))
}

/// Replace every `{{a.b.c}}` placeholder with the value found in `vars`.
///
/// Unresolved placeholders are left in place so missing data stays visible
/// in the rendered text.
pub fn interpolate(template: &str, vars: &Map<String, Value>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| match lookup_in(vars, &caps[1]) {
            Some(value) => display_value(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}
