//! The write translator.
//!
//! High-level write calls are first expressed as [`WriteIntent`]s, then merged into one native
//! update document. Intents that touch the same operator (`$set` from plain keys and an explicit
//! `$set`, for instance) are folded together, with later keys winning.

use bson::{Bson, Document, doc};

use crate::{
    coerce::{coerce_id, is_id_field, type_name},
    command::UpsertOp,
    error::{QueryError, QueryResult},
    path,
};

/// Options for [`QueryBuilder::update`](crate::builder::QueryBuilder::update).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document built from the filter when nothing matches.
    pub upsert: bool,
    /// Update every matching document rather than the first one.
    pub multiple: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            upsert: false,
            multiple: true,
        }
    }
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        Self {
            upsert: true,
            ..Self::default()
        }
    }
}

/// The first argument of `push`/`pull`: one field, or a map of field to value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldTarget {
    Field(String),
    Fields(Document),
}

impl From<&str> for FieldTarget {
    fn from(field: &str) -> Self {
        FieldTarget::Field(field.to_string())
    }
}

impl From<String> for FieldTarget {
    fn from(field: String) -> Self {
        FieldTarget::Field(field)
    }
}

impl From<Document> for FieldTarget {
    fn from(fields: Document) -> Self {
        FieldTarget::Fields(fields)
    }
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteIntent {
    /// Plain field assignments; dotted keys address embedded fields.
    Set(Document),
    Unset(Vec<String>),
    Increment { field: String, amount: Bson },
    /// Append `value`. A list value appends each element.
    Push { field: String, value: Bson, unique: bool },
    /// Append the map's values as-is, one per field.
    PushFields { fields: Document, unique: bool },
    /// Remove elements equal to `value`. A list value removes every listed element.
    Pull { field: String, value: Bson },
    PullFields(Document),
    /// Operator document passed through, e.g. `{ "$max": { "score": 10 } }`.
    Operator(Document),
    /// Full replacement of the matched document.
    Replace(Document),
}

impl WriteIntent {
    /// Splits caller-supplied update fields into pass-through operators and an implicit `$set`.
    pub fn from_fields(fields: Document) -> QueryResult<Vec<WriteIntent>> {
        let mut set = Document::new();
        let mut intents = Vec::new();

        for (key, value) in fields {
            if key.starts_with('$') {
                match value {
                    Bson::Document(operand) => {
                        let mut operator = Document::new();
                        operator.insert(key, operand);
                        intents.push(WriteIntent::Operator(operator));
                    }
                    other => {
                        return Err(QueryError::invalid(format!(
                            "update operator \"{key}\" expects a document, got \"{}\"",
                            type_name(&other)
                        )));
                    }
                }
            } else {
                path::validate(&key)?;
                set.insert(key, value);
            }
        }

        if !set.is_empty() {
            intents.push(WriteIntent::Set(set));
        }

        Ok(intents)
    }

    /// `increment`/`decrement`; decrements negate the amount.
    pub fn increment(field: &str, amount: Bson, negate: bool) -> QueryResult<WriteIntent> {
        path::validate(field)?;

        let amount = match (amount, negate) {
            (amount @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)), false) => amount,
            (Bson::Int32(n), true) => Bson::Int32(n.checked_neg().ok_or_else(|| overflow(field))?),
            (Bson::Int64(n), true) => Bson::Int64(n.checked_neg().ok_or_else(|| overflow(field))?),
            (Bson::Double(n), true) => Bson::Double(-n),
            (other, _) => {
                return Err(QueryError::invalid(format!(
                    "increment amount must be numeric, got \"{}\"",
                    type_name(&other)
                )));
            }
        };

        Ok(WriteIntent::Increment {
            field: field.to_string(),
            amount,
        })
    }

    /// `push(field, value, unique)` or `push(map)`.
    ///
    /// A map combined with a non-null value is ambiguous and rejected.
    pub fn push(target: FieldTarget, value: Bson, unique: bool) -> QueryResult<WriteIntent> {
        match target {
            FieldTarget::Fields(fields) => {
                reject_second_argument("push", &value)?;
                validate_keys(&fields)?;
                Ok(WriteIntent::PushFields { fields, unique })
            }
            FieldTarget::Field(field) => {
                path::validate(&field)?;
                Ok(WriteIntent::Push { field, value, unique })
            }
        }
    }

    /// `pull(field, value)` or `pull(map)`.
    pub fn pull(target: FieldTarget, value: Bson) -> QueryResult<WriteIntent> {
        match target {
            FieldTarget::Fields(fields) => {
                reject_second_argument("pull", &value)?;
                validate_keys(&fields)?;
                Ok(WriteIntent::PullFields(fields))
            }
            FieldTarget::Field(field) => {
                path::validate(&field)?;
                Ok(WriteIntent::Pull { field, value })
            }
        }
    }

    pub fn unset<I, S>(fields: I) -> QueryResult<WriteIntent>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        for field in &fields {
            path::validate(field)?;
        }

        Ok(WriteIntent::Unset(fields))
    }

    fn apply(self, update: &mut UpdateDocument) -> QueryResult<()> {
        match self {
            WriteIntent::Set(fields) => update.merge("$set", fields),
            WriteIntent::Unset(fields) => update.merge(
                "$unset",
                fields.into_iter().map(|field| (field, Bson::String(String::new()))).collect(),
            ),
            WriteIntent::Increment { field, amount } => update.merge("$inc", single(field, amount)),
            WriteIntent::Push { field, value, unique } => {
                let value = match value {
                    Bson::Array(items) => Bson::Document(doc! { "$each": items }),
                    other => other,
                };
                update.merge(push_operator(unique), single(field, value))
            }
            WriteIntent::PushFields { fields, unique } => update.merge(push_operator(unique), fields),
            WriteIntent::Pull { field, value } => match value {
                items @ Bson::Array(_) => update.merge("$pullAll", single(field, items)),
                other => update.merge("$pull", single(field, other)),
            },
            WriteIntent::PullFields(fields) => update.merge("$pull", fields),
            WriteIntent::Operator(operators) => {
                for (operator, operand) in operators {
                    match operand {
                        Bson::Document(operand) => update.merge(&operator, operand)?,
                        other => {
                            return Err(QueryError::invalid(format!(
                                "update operator \"{operator}\" expects a document, got \"{}\"",
                                type_name(&other)
                            )));
                        }
                    }
                }
                Ok(())
            }
            WriteIntent::Replace(document) => update.replace(document),
        }
    }
}

/// Merges intents into one native update document.
pub fn merge_intents(intents: Vec<WriteIntent>) -> QueryResult<Document> {
    let mut update = UpdateDocument::default();
    for intent in intents {
        intent.apply(&mut update)?;
    }

    update.finish()
}

/// Restricts an increment to documents where `field` is missing or not null.
pub fn increment_guard(field: &str) -> Document {
    doc! {
        "$or": [
            { field: { "$exists": false } },
            { field: { "$ne": Bson::Null } },
        ]
    }
}

/// Builds one upsert operation per document, keyed by the `unique_by` fields.
///
/// `update_columns` defaults to every field outside `unique_by`. When nothing is left to update,
/// the unique fields are written with `$setOnInsert` so the operation stays valid.
pub fn upsert_ops(
    documents: Vec<Document>,
    unique_by: &[String],
    update_columns: Option<&[String]>,
    key: &str,
) -> QueryResult<Vec<UpsertOp>> {
    if unique_by.is_empty() {
        return Err(QueryError::invalid("upsert requires at least one unique field"));
    }

    documents
        .into_iter()
        .enumerate()
        .map(|(index, document)| {
            let mut filter = Document::new();
            for field in unique_by {
                let value = path::lookup(&document, field).cloned().ok_or_else(|| {
                    QueryError::invalid(format!("upsert document {index} is missing unique field \"{field}\""))
                })?;
                let value = if is_id_field(field, key) {
                    coerce_id(value)
                } else {
                    value
                };
                filter.insert(field.as_str(), value);
            }

            let mut set = Document::new();
            let mut on_insert = Document::new();
            for (field, value) in document {
                if unique_by.iter().any(|unique| *unique == field) {
                    continue;
                }

                let updated = update_columns.is_none_or(|columns| columns.iter().any(|column| *column == field));
                if updated {
                    set.insert(field, value);
                } else {
                    on_insert.insert(field, value);
                }
            }

            let mut update = Document::new();
            if !set.is_empty() {
                update.insert("$set", set);
            }
            if !on_insert.is_empty() {
                update.insert("$setOnInsert", on_insert);
            }
            if update.is_empty() {
                update.insert("$setOnInsert", filter.clone());
            }

            Ok(UpsertOp { filter, update })
        })
        .collect()
}

#[derive(Debug, Default)]
struct UpdateDocument {
    operators: Document,
    replacement: Option<Document>,
}

impl UpdateDocument {
    fn merge(&mut self, operator: &str, fields: Document) -> QueryResult<()> {
        if !operator.starts_with('$') {
            return Err(QueryError::invalid(format!("\"{operator}\" is not an update operator")));
        }

        match self.operators.get_mut(operator) {
            Some(Bson::Document(existing)) => existing.extend(fields),
            _ => {
                self.operators.insert(operator, fields);
            }
        }

        Ok(())
    }

    fn replace(&mut self, document: Document) -> QueryResult<()> {
        if let Some(key) = document.keys().find(|key| key.starts_with('$')) {
            return Err(QueryError::invalid(format!(
                "replacement document cannot contain operator \"{key}\""
            )));
        }

        self.replacement = Some(document);
        Ok(())
    }

    fn finish(self) -> QueryResult<Document> {
        match (self.replacement, self.operators.is_empty()) {
            (Some(_), false) => Err(QueryError::invalid(
                "a replacement document cannot be combined with update operators",
            )),
            (Some(replacement), true) => Ok(replacement),
            (None, _) => Ok(self.operators),
        }
    }
}

fn push_operator(unique: bool) -> &'static str {
    if unique { "$addToSet" } else { "$push" }
}

fn single(field: String, value: Bson) -> Document {
    let mut document = Document::new();
    document.insert(field, value);
    document
}

fn overflow(field: &str) -> QueryError {
    QueryError::invalid(format!("decrement amount for \"{field}\" cannot be negated without overflow"))
}

fn validate_keys(fields: &Document) -> QueryResult<()> {
    fields.keys().try_for_each(|key| path::validate(key))
}

fn reject_second_argument(method: &str, value: &Bson) -> QueryResult<()> {
    if matches!(value, Bson::Null) {
        return Ok(());
    }

    Err(QueryError::invalid(format!(
        "{method} got a value of type \"{}\" while its first argument is of type \"document\"; \
         pass either a field and a value or a single map of fields",
        type_name(value)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_keys_merge_into_explicit_set() {
        let intents = WriteIntent::from_fields(doc! {
            "$set": { "name": "John" },
            "age": 30,
            "$inc": { "visits": 1 },
            "address.city": "Ghent",
        })
        .unwrap();

        assert_eq!(
            merge_intents(intents).unwrap(),
            doc! {
                "$set": { "name": "John", "age": 30, "address.city": "Ghent" },
                "$inc": { "visits": 1 },
            }
        );
    }

    #[test]
    fn increment_merges_with_extra_fields() {
        let update = merge_intents(vec![
            WriteIntent::increment("age", Bson::Int32(5), true).unwrap(),
            WriteIntent::Set(doc! { "note": "adjusted" }),
        ])
        .unwrap();

        assert_eq!(update, doc! { "$inc": { "age": -5 }, "$set": { "note": "adjusted" } });
        assert!(WriteIntent::increment("age", Bson::String("1".into()), false).is_err());
    }

    #[test]
    fn decrement_rejects_unnegatable_minimums() {
        for amount in [Bson::Int32(i32::MIN), Bson::Int64(i64::MIN)] {
            let err = WriteIntent::increment("age", amount, true).unwrap_err();
            assert!(matches!(err, QueryError::InvalidArgument(_)));
        }

        let intent = WriteIntent::increment("age", Bson::Int64(i64::MIN), false).unwrap();
        assert_eq!(merge_intents(vec![intent]).unwrap(), doc! { "$inc": { "age": i64::MIN } });
    }

    #[test]
    fn push_variants() {
        let single = merge_intents(vec![WriteIntent::push("tags".into(), "tag1".into(), true).unwrap()]).unwrap();
        assert_eq!(single, doc! { "$addToSet": { "tags": "tag1" } });

        let each = merge_intents(vec![
            WriteIntent::push("tags".into(), Bson::Array(vec!["a".into(), "b".into()]), false).unwrap(),
        ])
        .unwrap();
        assert_eq!(each, doc! { "$push": { "tags": { "$each": ["a", "b"] } } });

        let map = merge_intents(vec![
            WriteIntent::push(doc! { "messages": { "from": "Jane" } }.into(), Bson::Null, false).unwrap(),
        ])
        .unwrap();
        assert_eq!(map, doc! { "$push": { "messages": { "from": "Jane" } } });
    }

    #[test]
    fn push_map_with_value_names_both_types() {
        let err = WriteIntent::push(doc! { "tags": "a" }.into(), Bson::Int32(1), false).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("\"int\""));
        assert!(message.contains("\"document\""));
    }

    #[test]
    fn pull_list_uses_pull_all() {
        let update = merge_intents(vec![
            WriteIntent::pull("tags".into(), Bson::Array(vec!["tag2".into(), "tag4".into()])).unwrap(),
        ])
        .unwrap();

        assert_eq!(update, doc! { "$pullAll": { "tags": ["tag2", "tag4"] } });
    }

    #[test]
    fn unset_many_fields() {
        let update = merge_intents(vec![WriteIntent::unset(["note1", "note2"]).unwrap()]).unwrap();
        assert_eq!(update, doc! { "$unset": { "note1": "", "note2": "" } });
    }

    #[test]
    fn replacement_cannot_mix_with_operators() {
        let result = merge_intents(vec![
            WriteIntent::Replace(doc! { "name": "John" }),
            WriteIntent::Set(doc! { "age": 1 }),
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn upsert_ops_default_to_other_columns() {
        let ops = upsert_ops(
            vec![doc! { "email": "foo", "name": "bar" }, doc! { "email": "foo" }],
            &["email".to_string()],
            None,
            "_id",
        )
        .unwrap();

        assert_eq!(ops[0].filter, doc! { "email": "foo" });
        assert_eq!(ops[0].update, doc! { "$set": { "name": "bar" } });
        assert_eq!(ops[1].update, doc! { "$setOnInsert": { "email": "foo" } });
    }

    #[test]
    fn upsert_ops_keep_other_fields_for_inserts() {
        let ops = upsert_ops(
            vec![doc! { "email": "foo", "name": "bar", "age": 5 }],
            &["email".to_string()],
            Some(&["name".to_string()]),
            "_id",
        )
        .unwrap();

        assert_eq!(
            ops[0].update,
            doc! { "$set": { "name": "bar" }, "$setOnInsert": { "age": 5 } }
        );
    }

    #[test]
    fn upsert_requires_unique_values() {
        let result = upsert_ops(vec![doc! { "name": "bar" }], &["email".to_string()], None, "_id");
        assert!(result.is_err());
    }
}
