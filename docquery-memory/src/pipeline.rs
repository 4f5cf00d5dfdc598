//! Aggregation pipeline, projection and sorting for in-memory documents.

use std::cmp::Ordering;

use bson::{Bson, Document, doc};

use docquery_core::{
    coerce::ID_FIELD,
    error::{QueryError, QueryResult},
    path,
};

use crate::{
    evaluator::{DocumentEvaluator, compare_values, values_equal},
    update::{add_numbers, float_value, remove_path, set_path},
};

/// Runs `pipeline` stage by stage over `documents`.
pub(crate) fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> QueryResult<Vec<Document>> {
    for stage in pipeline {
        let (name, spec) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => {
                return Err(QueryError::store(
                    "a pipeline stage specification object must contain exactly one field",
                ));
            }
        };

        documents = match name.as_str() {
            "$match" => {
                let filter = stage_document(name, spec)?;
                DocumentEvaluator::filter_documents(documents.iter(), filter)?
            }
            "$unwind" => unwind(documents, spec)?,
            "$group" => group(&documents, stage_document(name, spec)?)?,
            "$sort" => {
                sort_documents(&mut documents, stage_document(name, spec)?);
                documents
            }
            "$skip" => {
                let skip = stage_count(name, spec)?;
                documents.into_iter().skip(skip).collect()
            }
            "$limit" => {
                let limit = stage_count(name, spec)?;
                documents.into_iter().take(limit).collect()
            }
            "$project" => {
                let projection = stage_document(name, spec)?;
                documents
                    .iter()
                    .map(|document| project(document, projection))
                    .collect::<QueryResult<_>>()?
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .ok_or_else(|| QueryError::store("the count field must be a non-empty string"))?;
                if documents.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field, count_value(documents.len()));
                    vec![counted]
                }
            }
            other => return Err(QueryError::store(format!("unrecognized pipeline stage name: '{other}'"))),
        };
    }

    Ok(documents)
}

fn stage_document<'a>(name: &str, spec: &'a Bson) -> QueryResult<&'a Document> {
    spec.as_document()
        .ok_or_else(|| QueryError::store(format!("the {name} stage specification must be an object")))
}

fn stage_count(name: &str, spec: &Bson) -> QueryResult<usize> {
    match spec {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(usize::try_from(*n).unwrap_or(usize::MAX)),
        _ => Err(QueryError::store(format!("invalid argument to {name} stage"))),
    }
}

fn count_value(count: usize) -> Bson {
    match i32::try_from(count) {
        Ok(n) => Bson::Int32(n),
        Err(_) => Bson::Int64(i64::try_from(count).unwrap_or(i64::MAX)),
    }
}

fn unwind(documents: Vec<Document>, spec: &Bson) -> QueryResult<Vec<Document>> {
    let (field, preserve) = match spec {
        Bson::String(field) => (field.as_str(), false),
        Bson::Document(options) => (
            options
                .get_str("path")
                .map_err(|_| QueryError::store("no path specified to $unwind stage"))?,
            options
                .get_bool("preserveNullAndEmptyArrays")
                .unwrap_or(false),
        ),
        _ => return Err(QueryError::store("expected either a string or an object as specification for $unwind")),
    };
    let field = field
        .strip_prefix('$')
        .ok_or_else(|| QueryError::store("path option to $unwind stage should be prefixed with a '$'"))?;

    let mut unwound = Vec::with_capacity(documents.len());
    for document in documents {
        match path::lookup(&document, field).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = document.clone();
                    set_path(&mut copy, field, item)?;
                    unwound.push(copy);
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    unwound.push(document);
                }
            }
            Some(_) => unwound.push(document),
        }
    }

    Ok(unwound)
}

/// Evaluates a group key or accumulator argument: `"$field"` paths, objects of expressions, or literals.
fn evaluate(document: &Document, expression: &Bson) -> Option<Bson> {
    match expression {
        Bson::String(reference) if reference.starts_with('$') => {
            path::lookup(document, &reference[1..]).cloned()
        }
        Bson::Document(fields) => {
            let mut evaluated = Document::new();
            for (key, value) in fields {
                if let Some(value) = evaluate(document, value) {
                    evaluated.insert(key.clone(), value);
                }
            }
            Some(Bson::Document(evaluated))
        }
        literal => Some(literal.clone()),
    }
}

fn group(documents: &[Document], spec: &Document) -> QueryResult<Vec<Document>> {
    let key_expression = spec
        .get(ID_FIELD)
        .ok_or_else(|| QueryError::store("a group specification must include an _id"))?;
    if let Some(field) = spec.keys().find(|field| field.contains('.')) {
        return Err(QueryError::store(format!("the group aggregate field name '{field}' cannot contain '.'")));
    }

    let mut groups: Vec<(Bson, Vec<&Document>)> = Vec::new();
    for document in documents {
        let key = evaluate(document, key_expression).unwrap_or(Bson::Null);
        match groups.iter_mut().find(|(existing, _)| values_equal(existing, &key)) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    let mut results = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut result = doc! { ID_FIELD: key };

        for (field, accumulator) in spec.iter().filter(|(field, _)| field.as_str() != ID_FIELD) {
            let (operator, argument) = accumulator
                .as_document()
                .and_then(|accumulator| accumulator.iter().next())
                .ok_or_else(|| QueryError::store(format!("the field '{field}' must be an accumulator object")))?;

            let values: Vec<Bson> = members
                .iter()
                .filter_map(|member| evaluate(member, argument))
                .collect();
            result.insert(field.clone(), accumulate(operator, values)?);
        }

        results.push(result);
    }

    Ok(results)
}

fn accumulate(operator: &str, values: Vec<Bson>) -> QueryResult<Bson> {
    Ok(match operator {
        "$sum" => values
            .iter()
            .filter(|value| float_value(value).is_some())
            .try_fold(Bson::Int32(0), |sum, value| add_numbers(&sum, value))
            .unwrap_or(Bson::Int32(0)),
        "$avg" => {
            let numbers: Vec<f64> = values.iter().filter_map(float_value).collect();
            if numbers.is_empty() {
                Bson::Null
            } else {
                Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        "$min" => present(values)
            .min_by(|a, b| compare_values(a, b))
            .unwrap_or(Bson::Null),
        "$max" => present(values)
            .max_by(|a, b| compare_values(a, b))
            .unwrap_or(Bson::Null),
        "$first" => values.into_iter().next().unwrap_or(Bson::Null),
        "$last" => values.into_iter().last().unwrap_or(Bson::Null),
        "$push" => Bson::Array(values),
        "$addToSet" => {
            let mut unique: Vec<Bson> = Vec::new();
            for value in values {
                if !unique.iter().any(|existing| values_equal(existing, &value)) {
                    unique.push(value);
                }
            }
            Bson::Array(unique)
        }
        other => return Err(QueryError::store(format!("unknown group operator '{other}'"))),
    })
}

fn present(values: Vec<Bson>) -> impl Iterator<Item = Bson> {
    values.into_iter().filter(|value| !matches!(value, Bson::Null))
}

/// Stable multi-key sort. A lone `$natural` key keeps insertion order, reversed for `-1`.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) {
    if let Some(direction) = sort.get("$natural") {
        if is_descending(direction) {
            documents.reverse();
        }
        return;
    }

    let keys: Vec<(&str, bool)> = sort
        .iter()
        .map(|(field, direction)| (field.as_str(), is_descending(direction)))
        .collect();

    documents.sort_by(|left, right| {
        for (field, descending) in &keys {
            let ordering = compare_values(
                path::lookup(left, field).unwrap_or(&Bson::Null),
                path::lookup(right, field).unwrap_or(&Bson::Null),
            );
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn is_descending(direction: &Bson) -> bool {
    match direction {
        Bson::Int32(n) => *n < 0,
        Bson::Int64(n) => *n < 0,
        Bson::Double(n) => *n < 0.0,
        _ => false,
    }
}

/// Applies an inclusion or exclusion projection, with `$slice` on array fields.
pub(crate) fn project(document: &Document, projection: &Document) -> QueryResult<Document> {
    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    let mut slices = Vec::new();
    let mut hide_id = false;

    for (field, spec) in projection {
        match spec {
            Bson::Document(operator) => match operator.get("$slice") {
                Some(slice) => slices.push((field.as_str(), slice)),
                None => return Err(QueryError::store(format!("unsupported projection option: {field}"))),
            },
            flag if field == ID_FIELD => hide_id = !is_truthy(flag),
            flag if is_truthy(flag) => includes.push(field.as_str()),
            _ => excludes.push(field.as_str()),
        }
    }

    if !includes.is_empty() && !excludes.is_empty() {
        return Err(QueryError::store("cannot do exclusion on a field in inclusion projection"));
    }

    let mut projected = if includes.is_empty() {
        let mut copy = document.clone();
        for field in &excludes {
            remove_path(&mut copy, field);
        }
        copy
    } else {
        let mut picked = Document::new();
        if let Some(id) = document.get(ID_FIELD) {
            picked.insert(ID_FIELD, id.clone());
        }
        for field in includes.iter().chain(slices.iter().map(|(field, _)| field)) {
            if let Some(value) = path::lookup(document, field) {
                set_path(&mut picked, field, value.clone())?;
            }
        }
        picked
    };

    for (field, slice) in slices {
        if let Some(Bson::Array(items)) = path::lookup(&projected, field).cloned() {
            set_path(&mut projected, field, Bson::Array(apply_slice(items, slice)?))?;
        }
    }

    if hide_id {
        projected.remove(ID_FIELD);
    }

    Ok(projected)
}

fn apply_slice(items: Vec<Bson>, slice: &Bson) -> QueryResult<Vec<Bson>> {
    let len = items.len() as i64;
    let (start, count) = match slice {
        Bson::Array(bounds) => match bounds.as_slice() {
            [skip, limit] => {
                let (Some(skip), Some(limit)) = (as_int(skip), as_int(limit)) else {
                    return Err(QueryError::store("$slice arguments must be numbers"));
                };
                if limit <= 0 {
                    return Err(QueryError::store("$slice limit must be positive"));
                }
                let start = if skip < 0 { (len + skip).max(0) } else { skip.min(len) };
                (start, limit)
            }
            _ => return Err(QueryError::store("$slice array argument must have two elements")),
        },
        other => match as_int(other) {
            Some(n) if n >= 0 => (0, n),
            Some(n) => ((len + n).max(0), n.saturating_neg()),
            None => return Err(QueryError::store("$slice only supports numbers and [skip, limit] arrays")),
        },
    };

    Ok(items
        .into_iter()
        .skip(start as usize)
        .take(count as usize)
        .collect())
}

fn as_int(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<Document> {
        vec![
            doc! { "name": "knife", "type": "sharp", "amount": 34 },
            doc! { "name": "fork", "type": "sharp", "amount": 20 },
            doc! { "name": "spoon", "type": "round", "amount": 3 },
            doc! { "name": "spoon", "type": "round", "amount": 14 },
        ]
    }

    #[test]
    fn sum_and_avg_over_a_collection() {
        let sum = run_pipeline(items(), &[doc! { "$group": { "_id": Bson::Null, "aggregate": { "$sum": "$amount" } } }])
            .unwrap();
        let avg = run_pipeline(items(), &[doc! { "$group": { "_id": Bson::Null, "aggregate": { "$avg": "$amount" } } }])
            .unwrap();

        assert_eq!(sum[0].get("aggregate"), Some(&Bson::Int32(71)));
        assert_eq!(avg[0].get("aggregate"), Some(&Bson::Double(17.75)));
    }

    #[test]
    fn group_rejects_dotted_output_names() {
        let result = run_pipeline(items(), &[doc! { "$group": { "_id": Bson::Null, "a.b": { "$last": "$type" } } }]);
        assert!(matches!(result, Err(QueryError::Store(_))));
    }

    #[test]
    fn group_keeps_first_appearance_order() {
        let grouped = run_pipeline(
            items(),
            &[doc! { "$group": { "_id": { "type": "$type" }, "type": { "$last": "$type" }, "n": { "$sum": 1 } } }],
        )
        .unwrap();

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].get_str("type").unwrap(), "sharp");
        assert_eq!(grouped[1].get("n"), Some(&Bson::Int32(2)));
    }

    #[test]
    fn unwind_drops_empty_arrays() {
        let documents = vec![
            doc! { "amount": [ { "hidden": 5 }, { "hidden": 7 } ] },
            doc! { "amount": [] },
        ];

        let unwound = run_pipeline(documents, &[doc! { "$unwind": "$amount" }]).unwrap();
        assert_eq!(unwound.len(), 2);
        assert_eq!(unwound[1], doc! { "amount": { "hidden": 7 } });
    }

    #[test]
    fn sort_skip_limit() {
        let mut sorted = items();
        sort_documents(&mut sorted, &doc! { "type": 1, "amount": -1 });

        let amounts: Vec<i32> = sorted.iter().map(|d| d.get_i32("amount").unwrap()).collect();
        assert_eq!(amounts, vec![14, 3, 34, 20]);

        let page = run_pipeline(sorted, &[doc! { "$skip": 1_i64 }, doc! { "$limit": 2_i64 }]).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn natural_sort_reverses_insertion_order() {
        let mut sorted = items();
        sort_documents(&mut sorted, &doc! { "$natural": -1 });

        assert_eq!(sorted[0].get_i32("amount").unwrap(), 14);
    }

    #[test]
    fn projections_include_exclude_and_slice() {
        let document = doc! { "_id": 1, "name": "John", "tags": ["a", "b", "c", "d"], "age": 3 };

        assert_eq!(project(&document, &doc! { "name": 1 }).unwrap(), doc! { "_id": 1, "name": "John" });
        assert_eq!(
            project(&document, &doc! { "tags": 0, "_id": 0 }).unwrap(),
            doc! { "name": "John", "age": 3 }
        );
        assert_eq!(
            project(&document, &doc! { "tags": { "$slice": [1, 2] } }).unwrap().get_array("tags").unwrap(),
            &vec![Bson::String("b".into()), Bson::String("c".into())]
        );
        assert_eq!(
            project(&document, &doc! { "tags": { "$slice": -1 } }).unwrap().get_array("tags").unwrap(),
            &vec![Bson::String("d".into())]
        );
    }

    #[test]
    fn extreme_slices_clamp_to_the_array() {
        let document = doc! { "tags": ["a", "b"] };
        let everything = vec![Bson::String("a".into()), Bson::String("b".into())];

        for slice in [Bson::Int64(i64::MIN), Bson::Int64(i64::MAX)] {
            let projected = project(&document, &doc! { "tags": { "$slice": slice } }).unwrap();
            assert_eq!(projected.get_array("tags").unwrap(), &everything);
        }

        let from_far_back = project(&document, &doc! { "tags": { "$slice": [i64::MIN, 1_i64] } }).unwrap();
        assert_eq!(from_far_back.get_array("tags").unwrap(), &vec![Bson::String("a".into())]);
    }

    #[test]
    fn unknown_stages_are_store_errors() {
        assert!(run_pipeline(items(), &[doc! { "$lookup": {} }]).is_err());
    }
}
