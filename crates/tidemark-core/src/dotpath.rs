//! Dotted-path access into nested documents.
//!
//! A path like `"a.b.c"` addresses `doc["a"]["b"]["c"]`. Reads into a
//! missing path resolve to `None`; writes create missing intermediate maps
//! on demand. Traversing *through* a value that is not a map is a
//! key-not-found error on writes (reads treat it as absent).

use serde_json::{Map, Value};
use snafu::Snafu;

use crate::Document;

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("cannot traverse `{path}`: `{segment}` is not a mapping"))]
pub struct PathError {
    pub path: String,
    pub segment: String,
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Read the value at a dotted path, `None` when any segment is missing or
/// a non-mapping value is hit along the way.
pub fn get<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => match doc.get(head)? {
            Value::Object(inner) => get(inner, rest),
            _ => None,
        },
    }
}

/// Whether a dotted path resolves to a value.
pub fn contains(doc: &Document, path: &str) -> bool {
    get(doc, path).is_some()
}

/// Write the value at a dotted path, creating intermediate maps as needed.
pub fn set(doc: &mut Document, path: &str, value: Value) -> PathResult<()> {
    set_inner(doc, path, path, value)
}

fn set_inner(doc: &mut Document, full: &str, path: &str, value: Value) -> PathResult<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_owned(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(inner) => set_inner(inner, full, rest, value),
                _ => Err(PathError {
                    path: full.to_owned(),
                    segment: head.to_owned(),
                }),
            }
        }
    }
}

/// Insert `default` at the path unless the path already resolves; returns
/// a mutable reference to whatever ends up there.
pub fn setdefault<'a>(
    doc: &'a mut Document,
    path: &str,
    default: Value,
) -> PathResult<&'a mut Value> {
    if !contains(doc, path) {
        set(doc, path, default)?;
    }
    get_mut(doc, path).ok_or_else(|| PathError {
        path: path.to_owned(),
        segment: path.to_owned(),
    })
}

/// Mutable variant of [`get`].
pub fn get_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Value> {
    match path.split_once('.') {
        None => doc.get_mut(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Value::Object(inner) => get_mut(inner, rest),
            _ => None,
        },
    }
}
