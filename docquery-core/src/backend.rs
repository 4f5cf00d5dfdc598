//! The driver seam.
//!
//! The [`StoreBackend`] trait is the narrow interface the execution layer dispatches compiled
//! commands through. A backend receives nothing but native command documents (see
//! [`crate::command`]) and reports failures as [`QueryError::Store`](crate::error::QueryError::Store),
//! which the builder propagates unchanged.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::{
    command::{
        AggregateCommand, BulkWriteOutcome, DeleteCommand, DistinctCommand, FindCommand, UpdateCommand,
        UpdateOutcome, UpsertOp,
    },
    error::QueryResult,
};

/// A lazily pulled, single-pass stream of documents.
pub type DocumentStream = BoxStream<'static, QueryResult<Document>>;

/// Abstract interface for document store drivers.
///
/// # Thread Safety
///
/// Implementations must be thread-safe. Separate builders may dispatch through the same backend
/// from concurrent tasks; pooling and connection reuse are the backend's concern.
///
/// # Error Handling
///
/// Store failures are returned as-is. Backends do not retry.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Native collection handle handed to raw callbacks.
    type Native: Send;

    /// Returns the native handle for `collection`.
    fn native_collection(&self, collection: &str) -> Self::Native;

    /// Runs a find and materializes every result in order.
    async fn find(&self, collection: &str, command: FindCommand) -> QueryResult<Vec<Document>>;

    /// Runs a find and returns a forward-only stream over the results.
    ///
    /// The stream holds any server-side cursor open until it is drained or dropped.
    async fn find_cursor(&self, collection: &str, command: FindCommand) -> QueryResult<DocumentStream>;

    /// Runs an aggregation pipeline.
    async fn aggregate(&self, collection: &str, command: AggregateCommand) -> QueryResult<Vec<Document>>;

    /// Distinct values of a field across the matching documents.
    async fn distinct(&self, collection: &str, command: DistinctCommand) -> QueryResult<Vec<Bson>>;

    /// Inserts documents in order and returns their ids in the same order.
    ///
    /// # Arguments
    ///
    /// * `collection` - Target collection, created on first write
    /// * `documents` - Documents to insert. A document without `_id` gets a fresh ObjectId.
    ///
    /// # Returns
    ///
    /// The `_id` of every inserted document. A failure partway through leaves earlier
    /// documents inserted.
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> QueryResult<Vec<Bson>>;

    /// Applies an update to the first or every matching document.
    async fn update(&self, collection: &str, command: UpdateCommand) -> QueryResult<UpdateOutcome>;

    /// Runs upsert operations as one ordered batch.
    ///
    /// The batch stops at the first failure. Operations before it stay applied.
    async fn bulk_upsert(&self, collection: &str, operations: Vec<UpsertOp>) -> QueryResult<BulkWriteOutcome>;

    /// Deletes every matching document and returns how many were removed.
    async fn delete(&self, collection: &str, command: DeleteCommand) -> QueryResult<u64>;

    /// Removes every document in the collection.
    async fn truncate(&self, collection: &str) -> QueryResult<bool>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> QueryResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    type Native = B::Native;

    fn native_collection(&self, collection: &str) -> Self::Native {
        (*self).native_collection(collection)
    }

    async fn find(&self, collection: &str, command: FindCommand) -> QueryResult<Vec<Document>> {
        (*self).find(collection, command).await
    }

    async fn find_cursor(&self, collection: &str, command: FindCommand) -> QueryResult<DocumentStream> {
        (*self).find_cursor(collection, command).await
    }

    async fn aggregate(&self, collection: &str, command: AggregateCommand) -> QueryResult<Vec<Document>> {
        (*self).aggregate(collection, command).await
    }

    async fn distinct(&self, collection: &str, command: DistinctCommand) -> QueryResult<Vec<Bson>> {
        (*self).distinct(collection, command).await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> QueryResult<Vec<Bson>> {
        (*self).insert(collection, documents).await
    }

    async fn update(&self, collection: &str, command: UpdateCommand) -> QueryResult<UpdateOutcome> {
        (*self).update(collection, command).await
    }

    async fn bulk_upsert(&self, collection: &str, operations: Vec<UpsertOp>) -> QueryResult<BulkWriteOutcome> {
        (*self).bulk_upsert(collection, operations).await
    }

    async fn delete(&self, collection: &str, command: DeleteCommand) -> QueryResult<u64> {
        (*self).delete(collection, command).await
    }

    async fn truncate(&self, collection: &str) -> QueryResult<bool> {
        (*self).truncate(collection).await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> QueryResult<Self::Backend>;
}
