//! A fluent query builder that compiles SQL-style call chains into native document-store commands.
//!
//! This crate is the core of the docquery project and provides:
//!
//! - **Operator grammar** ([`operator`]) - The closed set of comparison and array operators
//! - **Predicate tree** ([`predicate`]) - `where`-family clauses and their compilation to filters
//! - **Value coercion** ([`coerce`], [`path`]) - Identifier and date normalization, field path addressing
//! - **Query compiler** ([`compiler`]) - Find, aggregate and distinct commands from builder state
//! - **Write translator** ([`write`]) - Update documents and bulk upserts from write calls
//! - **Execution** ([`builder`], [`cursor`]) - Dispatching commands and adapting results
//! - **Store backend abstraction** ([`backend`], [`command`]) - The narrow driver seam
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docquery::prelude::*;
//!
//! let connection = Connection::new(InMemoryStore::new());
//! let total = connection
//!     .collection("items")
//!     .where_eq("type", "sharp")
//!     .sum("amount")
//!     .await?;
//! ```

pub mod backend;
pub mod builder;
pub mod coerce;
pub mod command;
pub mod compiler;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod model;
pub mod operator;
pub mod page;
pub mod path;
pub mod predicate;
pub mod write;
