//! Traversal over untyped JSON documents

use serde_json::Value;

/// One step from the document root to a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

impl Segment<'_> {
    #[must_use]
    pub const fn key(&self) -> Option<&str> {
        match self {
            Self::Key(key) => Some(key),
            Self::Index(_) => None,
        }
    }
}

/// Calls `visit` for every string leaf with the path that leads to it,
/// depth first in document order
pub fn visit_string_leaves<'a, F>(value: &'a Value, visit: &mut F)
where
    F: FnMut(&[Segment<'a>], &'a str),
{
    let mut path = Vec::new();
    walk(value, &mut path, visit);
}

fn walk<'a, F>(value: &'a Value, path: &mut Vec<Segment<'a>>, visit: &mut F)
where
    F: FnMut(&[Segment<'a>], &'a str),
{
    match value {
        Value::String(text) => visit(path, text),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(Segment::Index(index));
                walk(item, path, visit);
                path.pop();
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                path.push(Segment::Key(key));
                walk(item, path, visit);
                path.pop();
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// String leaves accepted by `predicate`, in document order, without repeats
pub fn collect_string_leaves<P>(value: &Value, predicate: P) -> Vec<String>
where
    P: Fn(&[Segment<'_>], &str) -> bool,
{
    let mut found: Vec<String> = Vec::new();
    visit_string_leaves(value, &mut |path, text| {
        if predicate(path, text) && !found.iter().any(|f| f == text) {
            found.push(text.to_string());
        }
    });
    found
}

/// Predicate for URL-like leaves: the nearest key ends with `url`
/// (case-insensitive) and the text is an absolute http(s) URL
#[must_use]
pub fn is_url_leaf(path: &[Segment<'_>], text: &str) -> bool {
    let key_matches = path
        .iter()
        .rev()
        .find_map(Segment::key)
        .is_some_and(|key| key.to_ascii_lowercase().ends_with("url"));
    key_matches && (text.starts_with("http://") || text.starts_with("https://"))
}
