//! In-memory document store backend for docquery.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It interprets the same native filter, update and pipeline documents a document database
//! server would receive, which makes it the backend of choice for development and tests.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Native filters** - Comparison, array, regex, type and logical operators over dotted paths
//! - **Native updates** - `$set`, `$unset`, `$inc`, `$push`, `$addToSet`, `$pull`, `$pullAll`, upserts
//! - **Pipelines** - `$match`, `$unwind`, `$group`, `$sort`, `$skip`, `$limit`, `$project`, `$count`
//!
//! # Quick Start
//!
//! ```ignore
//! use docquery::{Connection, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::new(InMemoryStore::builder().build().await?);
//!     let items = connection.collection("items");
//!
//!     items.insert([doc! { "name": "knife", "amount": 34 }]).await?;
//!     assert_eq!(items.count().await?, 1);
//!
//!     Ok(())
//! }
//! ```

pub mod evaluator;
mod pipeline;
pub mod store;
mod update;

pub use store::{InMemoryStore, InMemoryStoreBuilder, MemoryCollection};
