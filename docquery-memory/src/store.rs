//! In-memory storage implementation.
//!
//! Documents live in insertion order per collection, behind an async-aware read-write lock.
//! Every command is interpreted from the same native documents a remote store would receive.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;
use tracing::{debug, trace};

use docquery_core::{
    backend::{DocumentStream, StoreBackend, StoreBackendBuilder},
    coerce::ID_FIELD,
    command::{
        AggregateCommand, BulkWriteOutcome, DeleteCommand, DistinctCommand, FindCommand, Hint, UpdateCommand,
        UpdateOutcome, UpsertOp,
    },
    error::{QueryError, QueryResult},
};

use crate::{
    evaluator::{DocumentEvaluator, lookup_all, values_equal},
    pipeline::{project, run_pipeline, sort_documents},
    update::{apply_update, upsert_seed},
};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document store.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). The only index is the implicit
/// one on `_id`, which is what hints may name.
///
/// # Example
///
/// ```ignore
/// use docquery_memory::InMemoryStore;
/// use docquery::Connection;
///
/// let connection = Connection::new(InMemoryStore::new());
/// connection.collection("users").insert([doc! { "name": "Alice" }]).await?;
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder
    }

    async fn select(&self, collection: &str, command: &FindCommand) -> QueryResult<Vec<Document>> {
        check_hint(command.hint.as_ref())?;
        if let Some(max_time_ms) = command.max_time_ms {
            trace!(collection, max_time_ms, "time limit is not enforced in memory");
        }

        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched = DocumentEvaluator::filter_documents(documents.iter(), &command.filter)?;
        drop(store);

        match (&command.sort, &command.hint) {
            (Some(sort), _) => sort_documents(&mut matched, sort),
            (None, Some(Hint::Keys(keys))) if keys.contains_key("$natural") => sort_documents(&mut matched, keys),
            _ => {}
        }

        let skip = command.skip.map_or(0, |skip| usize::try_from(skip).unwrap_or(usize::MAX));
        let limit = command
            .limit
            .filter(|limit| *limit > 0)
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| match &command.projection {
                Some(projection) => project(&document, projection),
                None => Ok(document),
            })
            .collect()
    }
}

/// Only the natural order and the implicit `_id` index exist in memory.
fn check_hint(hint: Option<&Hint>) -> QueryResult<()> {
    let known = match hint {
        None => true,
        Some(Hint::Keys(keys)) => {
            keys.len() == 1 && (keys.contains_key("$natural") || keys.contains_key(ID_FIELD))
        }
        Some(Hint::Name(name)) => name == "_id_",
    };

    if known {
        Ok(())
    } else {
        Err(QueryError::store("hint provided does not correspond to an existing index"))
    }
}

fn duplicate_key(collection: &str, id: &Bson) -> QueryError {
    QueryError::store(format!(
        "E11000 duplicate key error collection: {collection} index: _id_ dup key: {{ _id: {id} }}"
    ))
}

fn ensure_id(mut document: Document) -> (Document, Bson) {
    if let Some(id) = document.get(ID_FIELD) {
        let id = id.clone();
        return (document, id);
    }

    let id = Bson::ObjectId(ObjectId::new());
    let mut with_id = Document::new();
    with_id.insert(ID_FIELD, id.clone());
    with_id.extend(std::mem::take(&mut document));
    (with_id, id)
}

fn contains_id(documents: &[Document], id: &Bson) -> bool {
    documents
        .iter()
        .any(|document| document.get(ID_FIELD).is_some_and(|existing| values_equal(existing, id)))
}

/// Applies one update to `documents`, inserting a seeded document on an unmatched upsert.
fn update_in_place(
    collection: &str,
    documents: &mut Vec<Document>,
    filter: &Document,
    update: &Document,
    upsert: bool,
    multiple: bool,
) -> QueryResult<UpdateOutcome> {
    let mut outcome = UpdateOutcome::default();

    for index in 0..documents.len() {
        if !DocumentEvaluator::new(&documents[index]).matches(filter)? {
            continue;
        }

        let mut candidate = documents[index].clone();
        let changed = apply_update(&mut candidate, update, false)?;
        if candidate.get(ID_FIELD) != documents[index].get(ID_FIELD) {
            return Err(QueryError::store("performing an update on the path '_id' would modify the immutable field '_id'"));
        }

        outcome.matched += 1;
        if changed {
            documents[index] = candidate;
            outcome.modified += 1;
        }

        if !multiple {
            break;
        }
    }

    if outcome.matched == 0 && upsert {
        let mut seeded = upsert_seed(filter)?;
        apply_update(&mut seeded, update, true)?;
        let (seeded, id) = ensure_id(seeded);

        if contains_id(documents, &id) {
            return Err(duplicate_key(collection, &id));
        }

        documents.push(seeded);
        outcome.upserted_id = Some(id);
    }

    Ok(outcome)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Native = MemoryCollection;

    fn native_collection(&self, collection: &str) -> Self::Native {
        MemoryCollection {
            name: collection.to_string(),
            store: self.store.clone(),
        }
    }

    async fn find(&self, collection: &str, command: FindCommand) -> QueryResult<Vec<Document>> {
        self.select(collection, &command).await
    }

    async fn find_cursor(&self, collection: &str, command: FindCommand) -> QueryResult<DocumentStream> {
        let documents = self.select(collection, &command).await?;
        Ok(stream::iter(documents.into_iter().map(Ok)).boxed())
    }

    async fn aggregate(&self, collection: &str, command: AggregateCommand) -> QueryResult<Vec<Document>> {
        check_hint(command.hint.as_ref())?;

        let documents = self
            .store
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default();

        trace!(collection, stages = command.pipeline.len(), "running pipeline");
        run_pipeline(documents, &command.pipeline)
    }

    async fn distinct(&self, collection: &str, command: DistinctCommand) -> QueryResult<Vec<Bson>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let mut values: Vec<Bson> = Vec::new();
        for document in documents {
            if !DocumentEvaluator::new(document).matches(&command.filter)? {
                continue;
            }

            for value in lookup_all(document, &command.field) {
                let flattened: Vec<&Bson> = match value {
                    Bson::Array(items) => items.iter().collect(),
                    single => vec![single],
                };
                for value in flattened {
                    if !values.iter().any(|existing| values_equal(existing, value)) {
                        values.push(value.clone());
                    }
                }
            }
        }

        Ok(values)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> QueryResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let stored = store.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let (document, id) = ensure_id(document);
            if contains_id(stored, &id) {
                return Err(duplicate_key(collection, &id));
            }

            stored.push(document);
            ids.push(id);
        }

        debug!(collection, inserted = ids.len(), "inserted documents");
        Ok(ids)
    }

    async fn update(&self, collection: &str, command: UpdateCommand) -> QueryResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        update_in_place(
            collection,
            documents,
            &command.filter,
            &command.update,
            command.upsert,
            command.multiple,
        )
    }

    async fn bulk_upsert(&self, collection: &str, operations: Vec<UpsertOp>) -> QueryResult<BulkWriteOutcome> {
        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        let mut outcome = BulkWriteOutcome::default();
        for operation in &operations {
            let result = update_in_place(collection, documents, &operation.filter, &operation.update, true, false)?;

            outcome.matched += result.matched;
            outcome.modified += result.modified;
            outcome.upserted += u64::from(result.upserted_id.is_some());
        }

        debug!(collection, ?outcome, "applied bulk upsert");
        Ok(outcome)
    }

    async fn delete(&self, collection: &str, command: DeleteCommand) -> QueryResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let doomed = documents
            .iter()
            .map(|document| DocumentEvaluator::new(document).matches(&command.filter))
            .collect::<QueryResult<Vec<bool>>>()?;

        let before = documents.len();
        let mut flags = doomed.into_iter();
        documents.retain(|_| !flags.next().unwrap_or(false));

        Ok((before - documents.len()) as u64)
    }

    async fn truncate(&self, collection: &str) -> QueryResult<bool> {
        let mut store = self.store.write().await;
        if let Some(documents) = store.get_mut(collection) {
            documents.clear();
        }

        Ok(true)
    }
}

/// Native handle to one in-memory collection, handed to raw callbacks.
#[derive(Clone, Debug)]
pub struct MemoryCollection {
    name: String,
    store: Arc<RwLock<StoreMap>>,
}

impl MemoryCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of every stored document, in insertion order.
    pub async fn documents(&self) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(&self.name)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn count_documents(&self) -> u64 {
        self.store
            .read()
            .await
            .get(&self.name)
            .map_or(0, |documents| documents.len() as u64)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docquery_memory::InMemoryStore;
/// use docquery::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> QueryResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
