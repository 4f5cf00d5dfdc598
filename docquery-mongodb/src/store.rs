use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection,
    options::{
        AggregateOptions, ClientOptions, DistinctOptions, FindOptions, Hint as MongoHint, ReplaceOptions,
        UpdateModifications, UpdateOneModel, UpdateOptions,
    },
};
use tracing::{debug, trace};

use docquery_core::{
    backend::{DocumentStream, StoreBackend, StoreBackendBuilder},
    command::{
        AggregateCommand, BulkWriteOutcome, DeleteCommand, DistinctCommand, FindCommand, Hint, UpdateCommand,
        UpdateOutcome, UpsertOp,
    },
    error::{QueryError, QueryResult},
};

/// `StoreBackend` over the official MongoDB async driver.
///
/// Commands are passed to the server untouched. Failures surface as [`QueryError::Store`]
/// with the driver error as the source.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(collection_name)
    }

    fn find_options(command: &FindCommand) -> FindOptions {
        let mut options = FindOptions::default();

        options.projection = command.projection.clone();
        options.sort = command.sort.clone();
        options.limit = command.limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        options.skip = command.skip;
        options.hint = command.hint.clone().map(native_hint);
        options.max_time = command.max_time_ms.map(Duration::from_millis);

        options
    }
}

fn native_hint(hint: Hint) -> MongoHint {
    match hint {
        Hint::Keys(keys) => MongoHint::Keys(keys),
        Hint::Name(name) => MongoHint::Name(name),
    }
}

fn is_replacement(update: &Document) -> bool {
    !update.keys().any(|key| key.starts_with('$'))
}

fn count(value: impl TryInto<u64>) -> u64 {
    value.try_into().unwrap_or(0)
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Native = MongoCollection<Document>;

    fn native_collection(&self, collection: &str) -> Self::Native {
        self.get_collection(collection)
    }

    async fn find(&self, collection: &str, command: FindCommand) -> QueryResult<Vec<Document>> {
        self.get_collection(collection)
            .find(command.filter.clone())
            .with_options(Self::find_options(&command))
            .await
            .map_err(QueryError::store)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(QueryError::store)
    }

    async fn find_cursor(&self, collection: &str, command: FindCommand) -> QueryResult<DocumentStream> {
        let cursor = self
            .get_collection(collection)
            .find(command.filter.clone())
            .with_options(Self::find_options(&command))
            .await
            .map_err(QueryError::store)?;

        Ok(cursor.map_err(QueryError::store).boxed())
    }

    async fn aggregate(&self, collection: &str, command: AggregateCommand) -> QueryResult<Vec<Document>> {
        let mut options = AggregateOptions::default();
        options.hint = command.hint.map(native_hint);
        options.max_time = command.max_time_ms.map(Duration::from_millis);

        self.get_collection(collection)
            .aggregate(command.pipeline)
            .with_options(options)
            .await
            .map_err(QueryError::store)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(QueryError::store)
    }

    async fn distinct(&self, collection: &str, command: DistinctCommand) -> QueryResult<Vec<Bson>> {
        let mut options = DistinctOptions::default();
        options.max_time = command.max_time_ms.map(Duration::from_millis);

        self.get_collection(collection)
            .distinct(command.field.as_str(), command.filter)
            .with_options(options)
            .await
            .map_err(QueryError::store)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> QueryResult<Vec<Bson>> {
        let total = documents.len();
        let result = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(QueryError::store)?;

        let mut ids = result.inserted_ids.into_iter().collect::<Vec<(usize, Bson)>>();
        ids.sort_by_key(|(index, _)| *index);

        debug!(collection, inserted = ids.len(), requested = total, "inserted documents");
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn update(&self, collection: &str, command: UpdateCommand) -> QueryResult<UpdateOutcome> {
        let target = self.get_collection(collection);

        let result = if is_replacement(&command.update) {
            let mut options = ReplaceOptions::default();
            options.upsert = Some(command.upsert);

            target
                .replace_one(command.filter, command.update)
                .with_options(options)
                .await
        } else {
            let mut options = UpdateOptions::default();
            options.upsert = Some(command.upsert);

            if command.multiple {
                target.update_many(command.filter, command.update).with_options(options).await
            } else {
                target.update_one(command.filter, command.update).with_options(options).await
            }
        }
        .map_err(QueryError::store)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    /// Sent as one ordered client-level bulk write. Requires MongoDB 8.0 or newer.
    async fn bulk_upsert(&self, collection: &str, operations: Vec<UpsertOp>) -> QueryResult<BulkWriteOutcome> {
        let namespace = self.get_collection(collection).namespace();
        trace!(collection, operations = operations.len(), "sending bulk upsert");

        let models = operations
            .into_iter()
            .map(|operation| {
                UpdateOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(operation.filter)
                    .update(UpdateModifications::Document(operation.update))
                    .upsert(true)
                    .build()
            })
            .collect::<Vec<_>>();

        let result = self
            .client
            .bulk_write(models)
            .ordered(true)
            .await
            .map_err(QueryError::store)?;

        Ok(BulkWriteOutcome {
            matched: count(result.matched_count),
            modified: count(result.modified_count),
            upserted: count(result.upserted_count),
        })
    }

    async fn delete(&self, collection: &str, command: DeleteCommand) -> QueryResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(command.filter)
            .await
            .map_err(QueryError::store)?
            .deleted_count)
    }

    async fn truncate(&self, collection: &str) -> QueryResult<bool> {
        self.get_collection(collection)
            .delete_many(Document::new())
            .await
            .map_err(QueryError::store)?;

        Ok(true)
    }

    async fn shutdown(self) -> QueryResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
    max_pool_size: Option<u32>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
            max_pool_size: None,
        }
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn max_pool_size(mut self, max_pool_size: u32) -> Self {
        self.max_pool_size = Some(max_pool_size);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> QueryResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| QueryError::Initialization(e.to_string()))?;

        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }
        if self.max_pool_size.is_some() {
            options.max_pool_size = self.max_pool_size;
        }

        debug!(database = %self.database, "building mongodb client");

        Ok(MongoDbStore::new(
            Client::with_options(options).map_err(|e| QueryError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
