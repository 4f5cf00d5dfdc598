//! Compiled native commands.
//!
//! These are the only shapes a [`StoreBackend`](crate::backend::StoreBackend) ever receives.
//! Everything here is already in the store's wire vocabulary; backends do no further translation.

use bson::{Bson, Document};

/// Index hint, passed through to the store verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    /// Key pattern, e.g. `{ "$natural": -1 }`.
    Keys(Document),
    /// Index name.
    Name(String),
}

impl From<Document> for Hint {
    fn from(keys: Document) -> Self {
        Hint::Keys(keys)
    }
}

impl From<&str> for Hint {
    fn from(name: &str) -> Self {
        Hint::Name(name.to_string())
    }
}

impl From<String> for Hint {
    fn from(name: String) -> Self {
        Hint::Name(name)
    }
}

/// A `find` against one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindCommand {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub hint: Option<Hint>,
    pub max_time_ms: Option<u64>,
}

/// An aggregation pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateCommand {
    pub pipeline: Vec<Document>,
    pub hint: Option<Hint>,
    pub max_time_ms: Option<u64>,
}

/// Distinct values of one field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistinctCommand {
    pub field: String,
    pub filter: Document,
    pub max_time_ms: Option<u64>,
}

/// A single update statement.
///
/// `update` is either an operator document (`$set`, `$inc`, ...) or, when no key starts
/// with `$`, a full replacement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateCommand {
    pub filter: Document,
    pub update: Document,
    pub upsert: bool,
    pub multiple: bool,
}

/// One upsert operation inside an ordered bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOp {
    pub filter: Document,
    pub update: Document,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteCommand {
    pub filter: Document,
}

/// What an update reported back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

/// Totals of an ordered bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
}

impl BulkWriteOutcome {
    /// Rows that were inserted or actually changed. Matches that changed nothing are excluded.
    pub fn affected(&self) -> u64 {
        self.upserted + self.modified
    }
}
