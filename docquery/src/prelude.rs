//! Convenient re-exports of commonly used types from docquery.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docquery::prelude::*;
//! ```

pub use docquery_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    builder::QueryBuilder,
    coerce::DateInput,
    command::Hint,
    compiler::SortDirection,
    connection::Connection,
    cursor::ResultCursor,
    error::{QueryError, QueryResult},
    model::{Model, ModelExt},
    page::{Page, PaginationParams},
    write::{FieldTarget, UpdateOptions},
};
