//! Filter evaluation for in-memory documents.
//!
//! Interprets the native filter documents the query compiler emits, with the store's usual
//! semantics: dotted paths traverse embedded documents and arrays, equality against an array
//! field matches any element, and `{ field: null }` also matches a missing field.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::{Regex, RegexBuilder};

use docquery_core::error::{QueryError, QueryResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numbers of every width are normalized to `f64`, so `Int32(3)` equals `Double(3.0)`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    /// Embedded documents compare by content, ignoring key order.
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Types with no ordering of their own (binary, regex, ...).
    Other,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Other,
        }
    }
}

impl Comparable<'_> {
    /// Position in the store's cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Other => 11,
        }
    }

    /// Total order used for sorting and `$min`/`$max`: by type rank first, then by value.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Array(a), Comparable::Array(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(left, right)| left.total_cmp(right))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => match self.rank().cmp(&other.rank()) {
                Ordering::Equal => self.partial_cmp(other).unwrap_or(Ordering::Equal),
                ordering => ordering,
            },
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

/// Only values of the same type class are ordered; anything else yields `None`.
impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

/// Deep equality with numeric widening.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

pub(crate) fn compare_values(left: &Bson, right: &Bson) -> Ordering {
    Comparable::from(left).total_cmp(&Comparable::from(right))
}

/// Every value a dotted path reaches, traversing arrays of embedded documents.
pub(crate) fn lookup_all<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut found = Vec::new();

    if let Some((first, rest)) = segments.split_first()
        && let Some(value) = document.get(*first)
    {
        descend(value, rest, &mut found);
    }

    found
}

fn descend<'a>(current: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((segment, rest)) = segments.split_first() else {
        found.push(current);
        return;
    };

    match current {
        Bson::Document(inner) => {
            if let Some(value) = inner.get(*segment) {
                descend(value, rest, found);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                if let Some(value) = items.get(index) {
                    descend(value, rest, found);
                }
            } else {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    descend(item, segments, found);
                }
            }
        }
        _ => {}
    }
}

/// Builds a regex from a pattern and store-style option letters.
pub(crate) fn build_regex(pattern: &str, options: &str) -> QueryResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(QueryError::store)
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => doc.keys().next().is_some_and(|key| key.starts_with('$')),
        _ => false,
    }
}

/// Evaluates native filter documents against stored documents.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn matches(&self, filter: &Document) -> QueryResult<bool> {
        for (key, condition) in filter {
            let satisfied = match key.as_str() {
                "$and" => self.all(condition)?,
                "$or" => self.any(condition)?,
                "$nor" => !self.any(condition)?,
                operator if operator.starts_with('$') => {
                    return Err(QueryError::store(format!("unknown top level operator: {operator}")));
                }
                field => {
                    let values = lookup_all(self.document, field);
                    matches_condition(&values, condition)?
                }
            };

            if !satisfied {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> QueryResult<Vec<Document>> {
        let mut matched = Vec::new();
        for document in documents {
            if DocumentEvaluator::new(document).matches(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn clauses(condition: &Bson) -> QueryResult<Vec<&Document>> {
        match condition {
            Bson::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_document()
                        .ok_or_else(|| QueryError::store("$and/$or/$nor entries must be documents"))
                })
                .collect(),
            _ => Err(QueryError::store("$and/$or/$nor must be a nonempty array")),
        }
    }

    fn all(&self, condition: &Bson) -> QueryResult<bool> {
        for clause in Self::clauses(condition)? {
            if !self.matches(clause)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any(&self, condition: &Bson) -> QueryResult<bool> {
        for clause in Self::clauses(condition)? {
            if self.matches(clause)? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Checks a field condition (an operator document or a literal) against the values a path reached.
pub(crate) fn matches_condition(values: &[&Bson], condition: &Bson) -> QueryResult<bool> {
    match condition {
        Bson::Document(operators) if is_operator_document(condition) => matches_operators(values, operators),
        Bson::RegularExpression(regex) => {
            matches_regex(values, &build_regex(regex.pattern.as_str(), regex.options.as_str())?)
        }
        literal => Ok(equals_any(values, literal)),
    }
}

fn matches_operators(values: &[&Bson], operators: &Document) -> QueryResult<bool> {
    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => equals_any(values, operand),
            "$ne" => !equals_any(values, operand),
            "$gt" => ordered(values, operand, |ordering| ordering == Ordering::Greater),
            "$gte" => ordered(values, operand, |ordering| ordering != Ordering::Less),
            "$lt" => ordered(values, operand, |ordering| ordering == Ordering::Less),
            "$lte" => ordered(values, operand, |ordering| ordering != Ordering::Greater),
            "$in" => in_list(values, operand)?,
            "$nin" => !in_list(values, operand)?,
            "$exists" => truthy(operand) == !values.is_empty(),
            "$type" => has_type(values, operand)?,
            "$mod" => modulo(values, operand)?,
            "$all" => all_of(values, operand)?,
            "$size" => size_of(values, operand)?,
            "$elemMatch" => elem_match(values, operand)?,
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or_default();
                let regex = match operand {
                    Bson::String(pattern) => build_regex(pattern, options)?,
                    Bson::RegularExpression(regex) => {
                        build_regex(regex.pattern.as_str(), regex.options.as_str())?
                    }
                    _ => return Err(QueryError::store("$regex has to be a string")),
                };
                matches_regex(values, &regex)?
            }
            "$options" => true,
            "$not" => match operand {
                Bson::Document(inner) => !matches_operators(values, inner)?,
                Bson::RegularExpression(_) => !matches_condition(values, operand)?,
                _ => return Err(QueryError::store("$not needs a regex or a document")),
            },
            other => return Err(QueryError::store(format!("unknown operator: {other}"))),
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Each reached value, plus the elements of reached arrays.
fn expanded<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(*value);
        if let Bson::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn equals_any(values: &[&Bson], target: &Bson) -> bool {
    if matches!(target, Bson::Null) && values.is_empty() {
        return true;
    }

    expanded(values).into_iter().any(|value| values_equal(value, target))
}

fn ordered(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let operand = Comparable::from(operand);

    expanded(values).into_iter().any(|value| {
        Comparable::from(value)
            .partial_cmp(&operand)
            .is_some_and(&accept)
    })
}

fn operand_list<'a>(operator: &str, operand: &'a Bson) -> QueryResult<&'a Vec<Bson>> {
    operand
        .as_array()
        .ok_or_else(|| QueryError::store(format!("{operator} needs an array")))
}

fn in_list(values: &[&Bson], operand: &Bson) -> QueryResult<bool> {
    let candidates = operand_list("$in", operand)?;

    for candidate in candidates {
        let hit = match candidate {
            Bson::RegularExpression(regex) => {
                matches_regex(values, &build_regex(regex.pattern.as_str(), regex.options.as_str())?)?
            }
            other => equals_any(values, other),
        };
        if hit {
            return Ok(true);
        }
    }

    Ok(false)
}

fn all_of(values: &[&Bson], operand: &Bson) -> QueryResult<bool> {
    let required = operand_list("$all", operand)?;
    Ok(!required.is_empty() && required.iter().all(|item| equals_any(values, item)))
}

fn size_of(values: &[&Bson], operand: &Bson) -> QueryResult<bool> {
    let size = match operand {
        Bson::Int32(n) => *n as i64,
        Bson::Int64(n) => *n,
        Bson::Double(n) if n.fract() == 0.0 => *n as i64,
        _ => return Err(QueryError::store("$size needs a number")),
    };

    Ok(values
        .iter()
        .any(|value| matches!(value, Bson::Array(items) if items.len() as i64 == size)))
}

fn modulo(values: &[&Bson], operand: &Bson) -> QueryResult<bool> {
    let (divisor, remainder) = match operand.as_array().map(Vec::as_slice) {
        Some([divisor, remainder]) => (as_i64(divisor), as_i64(remainder)),
        _ => return Err(QueryError::store("malformed mod, needs to be an array of 2 elements")),
    };
    let (Some(divisor), Some(remainder)) = (divisor, remainder) else {
        return Err(QueryError::store("malformed mod, divisor and remainder must be numbers"));
    };
    if divisor == 0 {
        return Err(QueryError::store("divisor cannot be 0"));
    }

    Ok(expanded(values)
        .into_iter()
        .filter_map(as_i64)
        .any(|value| value.wrapping_rem(divisor) == remainder))
}

fn elem_match(values: &[&Bson], operand: &Bson) -> QueryResult<bool> {
    let Bson::Document(condition) = operand else {
        return Err(QueryError::store("$elemMatch needs an Object"));
    };
    let operator_form = is_operator_document(operand)
        && !condition
            .keys()
            .any(|key| matches!(key.as_str(), "$and" | "$or" | "$nor"));

    for value in values {
        let Bson::Array(items) = value else {
            continue;
        };

        for item in items {
            let hit = if operator_form {
                matches_operators(&[item], condition)?
            } else {
                match item {
                    Bson::Document(element) => DocumentEvaluator::new(element).matches(condition)?,
                    _ => false,
                }
            };
            if hit {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

fn matches_regex(values: &[&Bson], regex: &Regex) -> QueryResult<bool> {
    Ok(expanded(values)
        .into_iter()
        .any(|value| matches!(value, Bson::String(text) if regex.is_match(text))))
}

fn has_type(values: &[&Bson], operand: &Bson) -> QueryResult<bool> {
    let wanted: Vec<&Bson> = match operand {
        Bson::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    for wanted in wanted {
        let alias = match wanted {
            Bson::String(alias) => alias.clone(),
            number => match as_i64(number) {
                Some(code) => type_alias(code)
                    .ok_or_else(|| QueryError::store(format!("invalid numerical type code: {code}")))?
                    .to_string(),
                None => return Err(QueryError::store("type must be represented as a number or a string")),
            },
        };

        let candidates = if alias == "array" {
            values.to_vec()
        } else {
            expanded(values)
        };
        if candidates.into_iter().any(|value| type_matches(value, &alias)) {
            return Ok(true);
        }
    }

    Ok(false)
}

fn type_alias(code: i64) -> Option<&'static str> {
    Some(match code {
        1 => "double",
        2 => "string",
        3 => "object",
        4 => "array",
        5 => "binData",
        7 => "objectId",
        8 => "bool",
        9 => "date",
        10 => "null",
        11 => "regex",
        16 => "int",
        17 => "timestamp",
        18 => "long",
        19 => "decimal",
        _ => return None,
    })
}

fn type_matches(value: &Bson, alias: &str) -> bool {
    match alias {
        "number" => matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)),
        "double" => matches!(value, Bson::Double(_)),
        "string" => matches!(value, Bson::String(_)),
        "object" => matches!(value, Bson::Document(_)),
        "array" => matches!(value, Bson::Array(_)),
        "binData" => matches!(value, Bson::Binary(_)),
        "objectId" => matches!(value, Bson::ObjectId(_)),
        "bool" => matches!(value, Bson::Boolean(_)),
        "date" => matches!(value, Bson::DateTime(_)),
        "null" => matches!(value, Bson::Null),
        "regex" => matches!(value, Bson::RegularExpression(_)),
        "int" => matches!(value, Bson::Int32(_)),
        "timestamp" => matches!(value, Bson::Timestamp(_)),
        "long" => matches!(value, Bson::Int64(_)),
        "decimal" => matches!(value, Bson::Decimal128(_)),
        _ => false,
    }
}

pub(crate) fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(n.trunc() as i64),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Null => false,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}
