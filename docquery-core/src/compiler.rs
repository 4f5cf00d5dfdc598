//! The query compiler.
//!
//! [`QueryState`] is everything a builder has accumulated. The functions here render it into the
//! native find, aggregate and distinct commands defined in [`crate::command`].

use std::{str::FromStr, time::Duration};

use bson::{Bson, Document, doc};

use crate::{
    coerce::ID_FIELD,
    command::{AggregateCommand, DistinctCommand, FindCommand, Hint},
    error::{QueryError, QueryResult},
    path,
    predicate::{WhereClause, compile_filter},
};

/// Field name that requests natural (insertion) order.
pub const NATURAL: &str = "natural";

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    #[default]
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(direction: &str) -> QueryResult<Self> {
        match direction.trim().to_ascii_lowercase().as_str() {
            "asc" | "1" => Ok(SortDirection::Asc),
            "desc" | "-1" => Ok(SortDirection::Desc),
            _ => Err(QueryError::invalid(format!(
                "sort direction must be \"asc\" or \"desc\", got \"{direction}\""
            ))),
        }
    }
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Accumulator requested by an aggregate terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    fn accumulator(&self) -> &'static str {
        match self {
            AggregateFunction::Count | AggregateFunction::Sum => "$sum",
            AggregateFunction::Avg => "$avg",
            AggregateFunction::Min => "$min",
            AggregateFunction::Max => "$max",
        }
    }
}

/// Name of the field the aggregate result is grouped into.
pub const AGGREGATE_FIELD: &str = "aggregate";

/// Mutable state of one builder chain.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub collection: String,
    pub key_name: String,
    pub wheres: Vec<WhereClause>,
    pub orders: Vec<Sort>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub columns: Vec<String>,
    pub projection: Option<Document>,
    pub groups: Vec<String>,
    pub hint: Option<Hint>,
    pub timeout: Option<Duration>,
}

impl QueryState {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key_name: ID_FIELD.to_string(),
            wheres: Vec::new(),
            orders: Vec::new(),
            limit: None,
            skip: None,
            columns: Vec::new(),
            projection: None,
            groups: Vec::new(),
            hint: None,
            timeout: None,
        }
    }

    /// The timeout in the store's unit, computed at dispatch.
    pub fn max_time_ms(&self) -> Option<u64> {
        self.timeout
            .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Either shape a `get` can compile to.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledQuery {
    Find(FindCommand),
    /// Grouped reads need a pipeline.
    Aggregate(AggregateCommand),
}

pub fn compile_filter_of(state: &QueryState) -> Document {
    compile_filter(&state.wheres)
}

/// Sort document in append order. A repeated field keeps its first position and takes the last direction.
pub fn compile_sort(orders: &[Sort]) -> Option<Document> {
    if orders.is_empty() {
        return None;
    }

    let mut sort = Document::new();
    for order in orders {
        let field = if order.field == NATURAL {
            "$natural"
        } else {
            order.field.as_str()
        };
        sort.insert(field, order.direction.as_i32());
    }

    Some(sort)
}

/// Inclusion projection for the selected columns, overlaid with any raw projection.
pub fn compile_projection(state: &QueryState) -> Option<Document> {
    let mut projection = Document::new();

    for column in state.columns.iter().filter(|column| column.as_str() != "*") {
        projection.insert(path::normalize(column), 1);
    }

    if let Some(raw) = &state.projection {
        projection.extend(raw.clone());
    }

    (!projection.is_empty()).then_some(projection)
}

/// Renders a `get`.
pub fn compile_select(state: &QueryState) -> CompiledQuery {
    if !state.groups.is_empty() {
        return CompiledQuery::Aggregate(compile_grouped(state));
    }

    CompiledQuery::Find(FindCommand {
        filter: compile_filter_of(state),
        projection: compile_projection(state),
        sort: compile_sort(&state.orders),
        limit: state.limit,
        skip: state.skip,
        hint: state.hint.clone(),
        max_time_ms: state.max_time_ms(),
    })
}

fn compile_grouped(state: &QueryState) -> AggregateCommand {
    let mut pipeline = Vec::new();

    let filter = compile_filter_of(state);
    if !filter.is_empty() {
        pipeline.push(doc! { "$match": filter });
    }

    let mut keys = Document::new();
    let mut group = Document::new();
    for field in &state.groups {
        keys.insert(grouped_name(field), format!("${field}"));
        group.insert(grouped_name(field), doc! { "$last": format!("${field}") });
    }
    for column in state.columns.iter().filter(|column| column.as_str() != "*") {
        group.insert(grouped_name(column), doc! { "$last": format!("${column}") });
    }

    let mut stage = doc! { "_id": keys };
    stage.extend(group);
    pipeline.push(doc! { "$group": stage });

    let orders: Vec<Sort> = state
        .orders
        .iter()
        .map(|order| Sort {
            field: if order.field == NATURAL {
                order.field.clone()
            } else {
                grouped_name(&order.field)
            },
            direction: order.direction,
        })
        .collect();
    if let Some(sort) = compile_sort(&orders) {
        pipeline.push(doc! { "$sort": sort });
    }
    if let Some(skip) = state.skip {
        pipeline.push(doc! { "$skip": to_i64(skip) });
    }
    if let Some(limit) = state.limit {
        pipeline.push(doc! { "$limit": to_i64(limit) });
    }

    AggregateCommand {
        pipeline,
        hint: state.hint.clone(),
        max_time_ms: state.max_time_ms(),
    }
}

/// Output name of a grouped field. `$group` output names cannot contain dots, so `author.name`
/// comes back as `author_name`.
fn grouped_name(path: &str) -> String {
    path.replace('.', "_")
}

/// Renders an aggregate terminal as a pipeline whose single output document holds the result
/// under [`AGGREGATE_FIELD`].
///
/// Wildcard arrays along `field` are unwound first. Documents missing the field never reach the
/// accumulator, and a field-scoped `Count` also skips explicit nulls.
pub fn compile_aggregate(state: &QueryState, function: AggregateFunction, field: Option<&str>) -> AggregateCommand {
    let mut pipeline = Vec::new();

    let filter = compile_filter_of(state);
    if !filter.is_empty() {
        pipeline.push(doc! { "$match": filter });
    }

    let accumulator = match field {
        Some(field) => {
            let (unwinds, leaf) = path::unwind_plan(field);
            for unwind in unwinds {
                pipeline.push(doc! { "$unwind": format!("${unwind}") });
            }

            let presence = match function {
                AggregateFunction::Count => doc! { "$exists": true, "$ne": Bson::Null },
                _ => doc! { "$exists": true },
            };
            let mut guard = Document::new();
            guard.insert(leaf.as_str(), presence);
            pipeline.push(doc! { "$match": guard });

            match function {
                AggregateFunction::Count => Bson::Int32(1),
                _ => Bson::String(format!("${leaf}")),
            }
        }
        None => Bson::Int32(1),
    };

    let mut result = Document::new();
    result.insert(function.accumulator(), accumulator);

    let mut group = doc! { "_id": Bson::Null };
    group.insert(AGGREGATE_FIELD, result);
    pipeline.push(doc! { "$group": group });

    AggregateCommand {
        pipeline,
        hint: state.hint.clone(),
        max_time_ms: state.max_time_ms(),
    }
}

pub fn compile_distinct(state: &QueryState, field: &str) -> DistinctCommand {
    DistinctCommand {
        field: path::normalize(field),
        filter: compile_filter_of(state),
        max_time_ms: state.max_time_ms(),
    }
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
