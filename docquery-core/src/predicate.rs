//! The predicate tree.
//!
//! Every `where`-family call appends one [`WhereClause`]. Clauses are validated and coerced when
//! they are appended and are never mutated afterwards. [`compile_filter`] renders the sequence
//! into a native filter document.
//!
//! Connectors follow SQL precedence: `AND` binds tighter than `OR`, so `a AND b OR c` compiles to
//! `{ $or: [ { $and: [a, b] }, c ] }`. The connector of the first clause is ignored.

use bson::{Bson, DateTime, Document, doc};
use chrono::NaiveDate;

use crate::{
    coerce::{DateInput, coerce_id, end_of_day, is_id_field, midnight},
    error::{QueryError, QueryResult},
    operator::Operator,
    path,
};

/// How a clause joins the clauses before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boolean {
    #[default]
    And,
    Or,
}

/// A single condition in the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `field <operator> value`.
    Compare {
        field: String,
        operator: Operator,
        value: Bson,
    },
    /// Inclusive range, or its complement when `negated`.
    Between {
        field: String,
        low: Bson,
        high: Bson,
        negated: bool,
    },
    /// `field` is null or missing, or the opposite when `negated`.
    Null { field: String, negated: bool },
    /// Whole-day comparison against a UTC calendar day.
    Date {
        field: String,
        operator: Operator,
        day: NaiveDate,
    },
    /// Native filter document passed through untouched.
    Raw(Document),
    /// Parenthesized group of clauses.
    Nested(Vec<WhereClause>),
}

/// A predicate plus the connector joining it to its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub boolean: Boolean,
    pub predicate: Predicate,
}

impl WhereClause {
    pub fn new(boolean: Boolean, predicate: Predicate) -> Self {
        Self { boolean, predicate }
    }
}

impl Predicate {
    /// Builds a comparison, resolving the operator token and checking the value shape.
    ///
    /// Values compared against the primary key `key` (or any embedded `._id`) are coerced to
    /// native ObjectIds when they look like one.
    pub fn compare(field: &str, token: &str, value: Bson, key: &str) -> QueryResult<Self> {
        let operator = Operator::parse(token)?;
        Self::compare_with(field, operator, value, key)
    }

    /// Same as [`Predicate::compare`] with an already-resolved operator.
    pub fn compare_with(field: &str, operator: Operator, value: Bson, key: &str) -> QueryResult<Self> {
        path::validate(field)?;

        let value = if is_id_field(field, key) {
            coerce_id(value)
        } else {
            value
        };

        Ok(Predicate::Compare {
            field: path::normalize(field),
            operator,
            value: operator.prepare(value)?,
        })
    }

    pub fn between(field: &str, low: Bson, high: Bson, negated: bool, key: &str) -> QueryResult<Self> {
        path::validate(field)?;

        let (low, high) = if is_id_field(field, key) {
            (coerce_id(low), coerce_id(high))
        } else {
            (low, high)
        };

        Ok(Predicate::Between {
            field: path::normalize(field),
            low,
            high,
            negated,
        })
    }

    pub fn null(field: &str, negated: bool) -> QueryResult<Self> {
        path::validate(field)?;

        Ok(Predicate::Null {
            field: path::normalize(field),
            negated,
        })
    }

    /// Builds a whole-day comparison. Only ordering and (in)equality operators are accepted.
    pub fn date(field: &str, token: &str, value: DateInput) -> QueryResult<Self> {
        path::validate(field)?;

        let operator = Operator::parse(token)?;
        if !matches!(
            operator,
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte
        ) {
            return Err(QueryError::invalid(format!(
                "date comparison does not support operator \"{operator}\""
            )));
        }

        Ok(Predicate::Date {
            field: path::normalize(field),
            operator,
            day: value.to_day()?,
        })
    }

    /// Renders this predicate as a standalone filter document.
    pub fn compile(&self) -> Document {
        match self {
            Predicate::Compare { field, operator, value } => {
                let mut filter = Document::new();
                filter.insert(field.as_str(), operator.fragment(value));
                filter
            }
            Predicate::Between {
                field,
                low,
                high,
                negated: false,
            } => doc! { field.as_str(): { "$gte": low.clone(), "$lte": high.clone() } },
            Predicate::Between {
                field,
                low,
                high,
                negated: true,
            } => doc! {
                "$or": [
                    { field.as_str(): { "$lt": low.clone() } },
                    { field.as_str(): { "$gt": high.clone() } },
                ]
            },
            Predicate::Null { field, negated: false } => doc! { field.as_str(): Bson::Null },
            Predicate::Null { field, negated: true } => doc! { field.as_str(): { "$ne": Bson::Null } },
            Predicate::Date { field, operator, day } => compile_date(field, *operator, *day),
            Predicate::Raw(filter) => filter.clone(),
            Predicate::Nested(clauses) => compile_filter(clauses),
        }
    }
}

fn compile_date(field: &str, operator: Operator, day: NaiveDate) -> Document {
    let start = DateTime::from_chrono(midnight(day));
    let end = DateTime::from_chrono(end_of_day(day));

    match operator {
        Operator::Ne => doc! {
            "$or": [
                { field: { "$lt": start } },
                { field: { "$gt": end } },
            ]
        },
        Operator::Lt => doc! { field: { "$lt": start } },
        Operator::Lte => doc! { field: { "$lte": end } },
        Operator::Gt => doc! { field: { "$gt": end } },
        Operator::Gte => doc! { field: { "$gte": start } },
        _ => doc! { field: { "$gte": start, "$lte": end } },
    }
}

/// Compiles a clause sequence into one native filter document.
///
/// No clauses yields the empty (match-all) filter, a single clause yields its own document.
pub fn compile_filter(clauses: &[WhereClause]) -> Document {
    let mut groups: Vec<Vec<Document>> = Vec::new();

    for (index, clause) in clauses.iter().enumerate() {
        if index == 0 || clause.boolean == Boolean::Or {
            groups.push(Vec::new());
        }

        if let Some(group) = groups.last_mut() {
            group.push(clause.predicate.compile());
        }
    }

    match groups.len() {
        0 => Document::new(),
        1 => conjunction(groups.remove(0)),
        _ => doc! {
            "$or": groups
                .into_iter()
                .map(|group| Bson::Document(conjunction(group)))
                .collect::<Vec<_>>()
        },
    }
}

fn conjunction(mut filters: Vec<Document>) -> Document {
    if filters.len() == 1 {
        return filters.remove(0);
    }

    doc! {
        "$and": filters.into_iter().map(Bson::Document).collect::<Vec<_>>()
    }
}
