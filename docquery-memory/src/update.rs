//! Applies native update documents to in-memory documents.

use bson::{Bson, Document};

use docquery_core::{
    coerce::ID_FIELD,
    error::{QueryError, QueryResult},
};

use crate::evaluator::{DocumentEvaluator, matches_condition, values_equal};

/// Applies `update` to `document` in place and reports whether anything changed.
///
/// An update without `$` keys replaces the document, keeping its `_id`. `$setOnInsert` only
/// applies when `inserting` is set.
pub(crate) fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> QueryResult<bool> {
    let before = document.clone();

    if !update.keys().any(|key| key.starts_with('$')) {
        let mut replacement = Document::new();
        if let Some(id) = document.get(ID_FIELD) {
            replacement.insert(ID_FIELD, id.clone());
        }
        for (key, value) in update {
            if key != ID_FIELD {
                replacement.insert(key.clone(), value.clone());
            }
        }
        *document = replacement;
        return Ok(*document != before);
    }

    for (operator, operand) in update {
        let fields = operand
            .as_document()
            .ok_or_else(|| QueryError::store(format!("modifiers operate on fields but {operator} was not a document")))?;

        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(document, path, value.clone())?;
                    }
                }
                "$unset" => remove_path(document, path),
                "$inc" => increment(document, path, value)?,
                "$push" => push(document, path, value, false)?,
                "$addToSet" => push(document, path, value, true)?,
                "$pull" => pull(document, path, |item| pull_matches(item, value))?,
                "$pullAll" => {
                    let listed = value
                        .as_array()
                        .ok_or_else(|| QueryError::store("$pullAll requires an array argument"))?;
                    pull(document, path, |item| {
                        Ok(listed.iter().any(|candidate| values_equal(item, candidate)))
                    })?
                }
                other => return Err(QueryError::store(format!("unknown modifier: {other}"))),
            }
        }
    }

    Ok(*document != before)
}

/// Seed document for an upsert: the equality pairs of the filter.
pub(crate) fn upsert_seed(filter: &Document) -> QueryResult<Document> {
    let mut seed = Document::new();
    collect_equalities(filter, &mut seed)?;
    Ok(seed)
}

fn collect_equalities(filter: &Document, seed: &mut Document) -> QueryResult<()> {
    for (key, value) in filter {
        if key == "$and" {
            for clause in value.as_array().into_iter().flatten() {
                if let Bson::Document(clause) = clause {
                    collect_equalities(clause, seed)?;
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        match value {
            Bson::Document(operators) if operators.keys().next().is_some_and(|k| k.starts_with('$')) => {
                if let Some(eq) = operators.get("$eq") {
                    set_path(seed, key, eq.clone())?;
                }
            }
            Bson::RegularExpression(_) => {}
            literal => set_path(seed, key, literal.clone())?,
        }
    }

    Ok(())
}

pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> QueryResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    set_in_document(document, &segments, value)
}

fn set_in_document(document: &mut Document, segments: &[&str], value: Bson) -> QueryResult<()> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        document.insert(*segment, value);
        return Ok(());
    }

    match document.get_mut(*segment) {
        Some(child) => set_in_value(child, rest, value),
        None => {
            let mut child = Document::new();
            set_in_document(&mut child, rest, value)?;
            document.insert(*segment, child);
            Ok(())
        }
    }
}

fn set_in_value(target: &mut Bson, segments: &[&str], value: Bson) -> QueryResult<()> {
    match target {
        Bson::Document(inner) => set_in_document(inner, segments, value),
        Bson::Array(items) => {
            let Some((segment, rest)) = segments.split_first() else {
                return Ok(());
            };
            let index: usize = segment
                .parse()
                .map_err(|_| QueryError::store(format!("cannot use the part ({segment}) to traverse an array")))?;

            while items.len() <= index {
                items.push(Bson::Null);
            }

            if rest.is_empty() {
                items[index] = value;
                Ok(())
            } else {
                if matches!(items[index], Bson::Null) {
                    items[index] = Bson::Document(Document::new());
                }
                set_in_value(&mut items[index], rest, value)
            }
        }
        other => Err(QueryError::store(format!(
            "cannot create field in element of type {:?}",
            other.element_type()
        ))),
    }
}

pub(crate) fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

pub(crate) fn remove_path(document: &mut Document, path: &str) {
    let Some((parent, leaf)) = path.rsplit_once('.') else {
        document.remove(path);
        return;
    };

    match get_path_mut(document, parent) {
        Some(Bson::Document(inner)) => {
            inner.remove(leaf);
        }
        Some(Bson::Array(items)) => {
            if let Some(slot) = leaf.parse::<usize>().ok().and_then(|index| items.get_mut(index)) {
                *slot = Bson::Null;
            }
        }
        _ => {}
    }
}

fn increment(document: &mut Document, path: &str, amount: &Bson) -> QueryResult<()> {
    if !is_number(amount) {
        return Err(QueryError::store("cannot increment with non-numeric argument"));
    }

    match get_path_mut(document, path) {
        Some(current) => {
            let sum = add_numbers(current, amount).ok_or_else(|| {
                QueryError::store(format!(
                    "cannot apply $inc to a value of non-numeric type {:?}",
                    current.element_type()
                ))
            })?;
            *current = sum;
            Ok(())
        }
        None => set_path(document, path, amount.clone()),
    }
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Adds two numbers, keeping the narrowest type that holds the result.
pub(crate) fn add_numbers(left: &Bson, right: &Bson) -> Option<Bson> {
    Some(match (left, right) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*a as i64 + *b as i64),
        },
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            Bson::Int64(int_value(left)?.wrapping_add(int_value(right)?))
        }
        (Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_), Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_)) => {
            Bson::Double(float_value(left)? + float_value(right)?)
        }
        _ => return None,
    })
}

fn int_value(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

pub(crate) fn float_value(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn push(document: &mut Document, path: &str, value: &Bson, unique: bool) -> QueryResult<()> {
    let operator = if unique { "$addToSet" } else { "$push" };
    let additions: Vec<Bson> = match value {
        Bson::Document(modifiers) if modifiers.contains_key("$each") => modifiers
            .get_array("$each")
            .map_err(|_| QueryError::store(format!("the argument to $each in {operator} must be an array")))?
            .clone(),
        single => vec![single.clone()],
    };

    if get_path_mut(document, path).is_none() {
        set_path(document, path, Bson::Array(Vec::new()))?;
    }

    let items = match get_path_mut(document, path) {
        Some(Bson::Array(items)) => items,
        Some(other) => {
            return Err(QueryError::store(format!(
                "the field '{path}' must be an array but is of type {:?}",
                other.element_type()
            )));
        }
        None => return Err(QueryError::store(format!("cannot create array field '{path}'"))),
    };

    for addition in additions {
        if unique && items.iter().any(|item| values_equal(item, &addition)) {
            continue;
        }
        items.push(addition);
    }

    Ok(())
}

fn pull(
    document: &mut Document,
    path: &str,
    mut remove: impl FnMut(&Bson) -> QueryResult<bool>,
) -> QueryResult<()> {
    match get_path_mut(document, path) {
        Some(Bson::Array(items)) => {
            let mut kept = Vec::with_capacity(items.len());
            for item in items.drain(..) {
                if !remove(&item)? {
                    kept.push(item);
                }
            }
            *items = kept;
            Ok(())
        }
        Some(_) => Err(QueryError::store("cannot apply $pull to a non-array value")),
        None => Ok(()),
    }
}

/// `$pull` condition: an operator document applies to the element itself, a plain document
/// to the fields of embedded-document elements, anything else is deep equality.
fn pull_matches(item: &Bson, condition: &Bson) -> QueryResult<bool> {
    match condition {
        Bson::Document(fields) if fields.keys().next().is_some_and(|key| key.starts_with('$')) => {
            matches_condition(&[item], condition)
        }
        Bson::Document(fields) => match item {
            Bson::Document(element) => DocumentEvaluator::new(element).matches(fields),
            _ => Ok(false),
        },
        literal => Ok(values_equal(item, literal)),
    }
}
