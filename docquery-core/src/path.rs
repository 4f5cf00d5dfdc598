//! Field path addressing.
//!
//! Paths are dot-separated. A `*` segment (as in `addresses.*.city`) means "any element of
//! this embedded array". Filters rely on the store's implicit array traversal, so the wildcard
//! is simply dropped there. Aggregations unwind every wildcard array before accumulating.

use bson::{Bson, Document};

use crate::error::{QueryError, QueryResult};

/// Segment marking "any element of the embedded array".
pub const WILDCARD: &str = "*";

/// Rejects empty paths and paths with empty segments.
pub fn validate(path: &str) -> QueryResult<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(QueryError::invalid(format!(
            "field path \"{path}\" must be a non-empty dot-separated name"
        )));
    }

    Ok(())
}

/// Returns `true` when the path addresses elements of an embedded array.
pub fn has_wildcard(path: &str) -> bool {
    path.split('.').any(|segment| segment == WILDCARD)
}

/// Strips wildcard segments, leaving the dotted path the store traverses natively.
pub fn normalize(path: &str) -> String {
    path.split('.')
        .filter(|segment| *segment != WILDCARD)
        .collect::<Vec<_>>()
        .join(".")
}

/// Splits a path into the arrays that must be unwound and the leaf to aggregate over.
///
/// `amount.*.hidden` unwinds `amount` and aggregates `amount.hidden`.
pub fn unwind_plan(path: &str) -> (Vec<String>, String) {
    let mut unwinds = Vec::new();
    let mut prefix: Vec<&str> = Vec::new();

    for segment in path.split('.') {
        if segment == WILDCARD {
            if !prefix.is_empty() {
                unwinds.push(prefix.join("."));
            }
        } else {
            prefix.push(segment);
        }
    }

    (unwinds, prefix.join("."))
}

/// Looks up a dotted path inside a document, descending through embedded documents only.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}
