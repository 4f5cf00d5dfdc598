//! Connection entry point.
//!
//! A [`Connection`] owns one backend and hands out query builders bound to it.
//!
//! # Example
//!
//! ```ignore
//! use docquery::{Connection, memory::InMemoryStore};
//!
//! let connection = Connection::new(InMemoryStore::new());
//! let id = connection
//!     .collection("users")
//!     .insert_get_id(doc! { "name": "John" })
//!     .await?;
//! ```

use crate::{backend::StoreBackend, builder::QueryBuilder, error::QueryResult, model::Model};

/// Hands out query builders over a single backend.
#[derive(Debug)]
pub struct Connection<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> Connection<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// A builder over the named collection.
    pub fn collection(&self, name: &str) -> QueryBuilder<'_, B> {
        QueryBuilder::new(&self.backend, name)
    }

    /// Alias of [`Connection::collection`].
    pub fn table(&self, name: &str) -> QueryBuilder<'_, B> {
        self.collection(name)
    }

    /// A builder over `M`'s collection, keyed by `M`'s primary key.
    pub fn model<M: Model>(&self) -> QueryBuilder<'_, B> {
        QueryBuilder::new(&self.backend, M::collection_name()).with_key(M::key_name())
    }

    /// Native handle of `M`'s collection.
    pub fn model_raw<M: Model>(&self) -> B::Native {
        self.backend.native_collection(M::collection_name())
    }

    pub fn raw_collection(&self, name: &str) -> B::Native {
        self.backend.native_collection(name)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn shutdown(self) -> QueryResult<()> {
        self.backend.shutdown().await
    }
}
