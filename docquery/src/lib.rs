//! Main docquery crate providing a fluent, SQL-style query builder over document stores.
//!
//! This crate is the primary entry point for users of docquery. It re-exports the core types
//! from the sub-crates and provides convenient access to the storage backends.
//!
//! # Features
//!
//! - **Fluent predicates** - `where_`, `or_where`, `where_in`, `where_between`, nested groups with SQL precedence
//! - **Native compilation** - Chains compile to the store's own filter, projection, sort and pipeline documents
//! - **Aggregates** - `count`, `sum`, `avg`, `min`, `max`, `distinct` and wildcard array paths
//! - **Writes** - `update`, `increment`, `push`, `pull`, `unset`, bulk `upsert`, scoped deletes
//! - **Multiple backends** - In-memory and MongoDB storage behind one narrow trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docquery::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> QueryResult<()> {
//!     let connection = Connection::new(InMemoryStore::builder().build().await?);
//!     let items = connection.collection("items");
//!
//!     items
//!         .insert([
//!             doc! { "name": "knife", "type": "sharp", "amount": 34 },
//!             doc! { "name": "spoon", "type": "round", "amount": 3 },
//!         ])
//!         .await?;
//!
//!     let sharp = items
//!         .clone()
//!         .where_("amount", ">", 10)?
//!         .or_where_eq("type", "sharp")
//!         .order_by_desc("amount")
//!         .get()
//!         .await?;
//!
//!     println!("Sharp or large items: {:?}", sharp);
//!
//!     connection.shutdown().await
//! }
//! ```
//!
//! # Models
//!
//! Any serde type can be mapped onto a collection by implementing [`model::Model`]:
//!
//! ```ignore
//! use docquery::prelude::*;
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//! }
//!
//! impl Model for User {
//!     fn collection_name() -> &'static str { "users" }
//! }
//!
//! let id = connection.model::<User>().insert_model(&user).await?;
//! let found: Option<User> = connection.model::<User>().find_model(id).await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docquery_core::{
    backend, builder, coerce, command, compiler, connection, cursor, error, model, operator, page, path, predicate,
    write,
};

pub use docquery_core::{builder::QueryBuilder, connection::Connection};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docquery_memory::{InMemoryStore, InMemoryStoreBuilder, MemoryCollection};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docquery_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
