//! The fluent query builder and execution orchestrator.
//!
//! Chained methods only accumulate [`QueryState`]. Terminal methods (`get`, `first`, `count`,
//! `update`, `delete`, ...) compile that state into a native command, dispatch it through the
//! [`StoreBackend`] and adapt the result. Terminals borrow the builder, so one chain can run
//! several terminals in turn.
//!
//! Methods that take an operator token or a date return `QueryResult<Self>` so grammar mistakes
//! surface at the call site. The remaining chain methods cannot fail on their operator; a
//! malformed field path is kept and reported by the next terminal before any I/O.
//!
//! # Example
//!
//! ```ignore
//! let spoons = connection
//!     .collection("items")
//!     .where_("amount", ">", 10)?
//!     .or_where_eq("name", "spoon")
//!     .order_by_desc("amount")
//!     .take(5)
//!     .get()
//!     .await?;
//! ```

use std::time::Duration;

use bson::{Bson, Document, doc};
use futures::{StreamExt, stream};
use tracing::debug;

use crate::{
    backend::StoreBackend,
    coerce::DateInput,
    command::{DeleteCommand, Hint, UpdateCommand, UpdateOutcome},
    compiler::{
        AGGREGATE_FIELD, AggregateFunction, CompiledQuery, QueryState, Sort, SortDirection, compile_aggregate,
        compile_distinct, compile_select,
    },
    cursor::ResultCursor,
    error::{QueryError, QueryResult},
    model::{Model, ModelExt},
    operator::Operator,
    page::{Page, PaginationParams},
    path,
    predicate::{Boolean, Predicate, WhereClause, compile_filter},
    write::{FieldTarget, UpdateOptions, WriteIntent, increment_guard, merge_intents, upsert_ops},
};

/// Builds and runs queries against one collection.
#[derive(Debug)]
pub struct QueryBuilder<'a, B: StoreBackend> {
    backend: &'a B,
    state: QueryState,
    pending: Option<String>,
}

impl<B: StoreBackend> Clone for QueryBuilder<'_, B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend,
            state: self.state.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<'a, B: StoreBackend> QueryBuilder<'a, B> {
    pub fn new(backend: &'a B, collection: impl Into<String>) -> Self {
        Self {
            backend,
            state: QueryState::new(collection),
            pending: None,
        }
    }

    /// Sets the primary key field used for `find`, `delete_by_id` and identifier coercion.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.state.key_name = key.into();
        self
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn collection(&self) -> &str {
        &self.state.collection
    }

    /// The native filter the current predicates compile to.
    pub fn to_filter(&self) -> QueryResult<Document> {
        self.check()?;
        Ok(compile_filter(&self.state.wheres))
    }

    /// The native read command `get` would dispatch.
    pub fn to_command(&self) -> QueryResult<CompiledQuery> {
        self.check()?;
        Ok(compile_select(&self.state))
    }

    // -- predicates ---------------------------------------------------------------------------

    /// `field <op> value`, joined with AND.
    ///
    /// # Errors
    ///
    /// [`QueryError::UnsupportedOperator`] for an unknown token, [`QueryError::InvalidArgument`]
    /// for an empty field or a value of the wrong shape for the operator.
    pub fn where_(self, field: &str, op: &str, value: impl Into<Bson>) -> QueryResult<Self> {
        let predicate = Predicate::compare(field, op, value.into(), &self.state.key_name)?;
        Ok(self.append(Boolean::And, predicate))
    }

    /// `field <op> value`, joined with OR.
    pub fn or_where(self, field: &str, op: &str, value: impl Into<Bson>) -> QueryResult<Self> {
        let predicate = Predicate::compare(field, op, value.into(), &self.state.key_name)?;
        Ok(self.append(Boolean::Or, predicate))
    }

    pub fn where_eq(self, field: &str, value: impl Into<Bson>) -> Self {
        let predicate = Predicate::compare_with(field, Operator::Eq, value.into(), &self.state.key_name);
        self.append_or_defer(Boolean::And, predicate)
    }

    pub fn or_where_eq(self, field: &str, value: impl Into<Bson>) -> Self {
        let predicate = Predicate::compare_with(field, Operator::Eq, value.into(), &self.state.key_name);
        self.append_or_defer(Boolean::Or, predicate)
    }

    pub fn where_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.list(Boolean::And, field, Operator::In, values)
    }

    pub fn or_where_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.list(Boolean::Or, field, Operator::In, values)
    }

    pub fn where_not_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.list(Boolean::And, field, Operator::NotIn, values)
    }

    pub fn or_where_not_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.list(Boolean::Or, field, Operator::NotIn, values)
    }

    /// Inclusive range.
    pub fn where_between(self, field: &str, low: impl Into<Bson>, high: impl Into<Bson>) -> Self {
        let predicate = Predicate::between(field, low.into(), high.into(), false, &self.state.key_name);
        self.append_or_defer(Boolean::And, predicate)
    }

    pub fn or_where_between(self, field: &str, low: impl Into<Bson>, high: impl Into<Bson>) -> Self {
        let predicate = Predicate::between(field, low.into(), high.into(), false, &self.state.key_name);
        self.append_or_defer(Boolean::Or, predicate)
    }

    /// Strictly outside the inclusive range.
    pub fn where_not_between(self, field: &str, low: impl Into<Bson>, high: impl Into<Bson>) -> Self {
        let predicate = Predicate::between(field, low.into(), high.into(), true, &self.state.key_name);
        self.append_or_defer(Boolean::And, predicate)
    }

    pub fn or_where_not_between(self, field: &str, low: impl Into<Bson>, high: impl Into<Bson>) -> Self {
        let predicate = Predicate::between(field, low.into(), high.into(), true, &self.state.key_name);
        self.append_or_defer(Boolean::Or, predicate)
    }

    /// Field is null or missing.
    pub fn where_null(self, field: &str) -> Self {
        let predicate = Predicate::null(field, false);
        self.append_or_defer(Boolean::And, predicate)
    }

    pub fn or_where_null(self, field: &str) -> Self {
        let predicate = Predicate::null(field, false);
        self.append_or_defer(Boolean::Or, predicate)
    }

    pub fn where_not_null(self, field: &str) -> Self {
        let predicate = Predicate::null(field, true);
        self.append_or_defer(Boolean::And, predicate)
    }

    pub fn or_where_not_null(self, field: &str) -> Self {
        let predicate = Predicate::null(field, true);
        self.append_or_defer(Boolean::Or, predicate)
    }

    /// Compares the UTC calendar day of `field` against the day of `value`.
    pub fn where_date(self, field: &str, op: &str, value: impl Into<DateInput>) -> QueryResult<Self> {
        let predicate = Predicate::date(field, op, value.into())?;
        Ok(self.append(Boolean::And, predicate))
    }

    pub fn or_where_date(self, field: &str, op: &str, value: impl Into<DateInput>) -> QueryResult<Self> {
        let predicate = Predicate::date(field, op, value.into())?;
        Ok(self.append(Boolean::Or, predicate))
    }

    /// Appends a native filter document as-is.
    pub fn where_raw(self, filter: Document) -> Self {
        self.append(Boolean::And, Predicate::Raw(filter))
    }

    pub fn or_where_raw(self, filter: Document) -> Self {
        self.append(Boolean::Or, Predicate::Raw(filter))
    }

    /// Groups the predicates added by `build` in parentheses, joined with AND.
    ///
    /// `build` runs on a fresh child builder. Only its predicates are kept.
    pub fn where_nested<F>(self, build: F) -> QueryResult<Self>
    where
        F: FnOnce(Self) -> QueryResult<Self>,
    {
        self.nested(Boolean::And, build)
    }

    pub fn or_where_nested<F>(self, build: F) -> QueryResult<Self>
    where
        F: FnOnce(Self) -> QueryResult<Self>,
    {
        self.nested(Boolean::Or, build)
    }

    fn nested<F>(self, boolean: Boolean, build: F) -> QueryResult<Self>
    where
        F: FnOnce(Self) -> QueryResult<Self>,
    {
        let mut child_state = QueryState::new(self.state.collection.clone());
        child_state.key_name = self.state.key_name.clone();

        let child = build(Self {
            backend: self.backend,
            state: child_state,
            pending: None,
        })?;
        child.check()?;

        if child.state.wheres.is_empty() {
            return Ok(self);
        }

        Ok(self.append(boolean, Predicate::Nested(child.state.wheres)))
    }

    fn list<I, V>(self, boolean: Boolean, field: &str, operator: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values = Bson::Array(values.into_iter().map(Into::into).collect());
        let predicate = Predicate::compare_with(field, operator, values, &self.state.key_name);
        self.append_or_defer(boolean, predicate)
    }

    fn append(mut self, boolean: Boolean, predicate: Predicate) -> Self {
        self.state.wheres.push(WhereClause::new(boolean, predicate));
        self
    }

    fn append_or_defer(self, boolean: Boolean, predicate: QueryResult<Predicate>) -> Self {
        match predicate {
            Ok(predicate) => self.append(boolean, predicate),
            Err(err) => self.defer(err),
        }
    }

    fn defer(mut self, err: QueryError) -> Self {
        if self.pending.is_none() {
            self.pending = Some(match err {
                QueryError::InvalidArgument(message) => message,
                other => other.to_string(),
            });
        }
        self
    }

    fn check(&self) -> QueryResult<()> {
        match &self.pending {
            Some(message) => Err(QueryError::InvalidArgument(message.clone())),
            None => Ok(()),
        }
    }

    // -- read options -------------------------------------------------------------------------

    /// Sorts by `field`. `"natural"` sorts by insertion order.
    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        if let Err(err) = path::validate(field) {
            return self.defer(err);
        }

        self.state.orders.push(Sort {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn order_by_desc(self, field: &str) -> Self {
        self.order_by(field, SortDirection::Desc)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn take(self, limit: u64) -> Self {
        self.limit(limit)
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.state.skip = Some(skip);
        self
    }

    pub fn offset(self, skip: u64) -> Self {
        self.skip(skip)
    }

    /// Restricts the returned fields.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Native projection document, e.g. `{ "tags": { "$slice": 2 } }`.
    pub fn project(mut self, projection: Document) -> Self {
        match &mut self.state.projection {
            Some(existing) => existing.extend(projection),
            None => self.state.projection = Some(projection),
        }
        self
    }

    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.groups.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Index hint, sent verbatim. An unknown index is reported by the store.
    pub fn hint(mut self, hint: impl Into<Hint>) -> Self {
        self.state.hint = Some(hint.into());
        self
    }

    /// Maximum execution time, converted to milliseconds when a command is dispatched.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.state.timeout = Some(timeout);
        self
    }

    // -- reads --------------------------------------------------------------------------------

    /// Runs the query and returns every matching document in order.
    pub async fn get(&self) -> QueryResult<Vec<Document>> {
        self.check()?;

        let collection = self.collection();
        match compile_select(&self.state) {
            CompiledQuery::Find(command) => {
                debug!(collection, ?command, "dispatching find");
                self.backend.find(collection, command).await
            }
            CompiledQuery::Aggregate(command) => {
                debug!(collection, ?command, "dispatching grouped aggregate");
                self.backend.aggregate(collection, command).await
            }
        }
    }

    pub async fn get_models<M: Model>(&self) -> QueryResult<Vec<M>> {
        self.get()
            .await?
            .into_iter()
            .map(M::from_document)
            .collect()
    }

    /// The first match, or `None`.
    pub async fn first(&self) -> QueryResult<Option<Document>> {
        let documents = self.clone().take(1).get().await?;
        Ok(documents.into_iter().next())
    }

    pub async fn first_model<M: Model>(&self) -> QueryResult<Option<M>> {
        self.first()
            .await?
            .map(M::from_document)
            .transpose()
    }

    /// Looks a document up by primary key, on top of the current predicates.
    ///
    /// A null id returns `None` without contacting the store.
    pub async fn find(&self, id: impl Into<Bson>) -> QueryResult<Option<Document>> {
        let id = id.into();
        if matches!(id, Bson::Null) {
            return Ok(None);
        }

        let key = self.state.key_name.clone();
        self.clone().where_eq(&key, id).first().await
    }

    pub async fn find_model<M: Model>(&self, id: impl Into<Bson>) -> QueryResult<Option<M>> {
        self.find(id)
            .await?
            .map(M::from_document)
            .transpose()
    }

    /// A single field of the first match.
    pub async fn value(&self, field: &str) -> QueryResult<Option<Bson>> {
        path::validate(field)?;

        let first = self.clone().select([field]).first().await?;
        Ok(first.and_then(|document| path::lookup(&document, field).cloned()))
    }

    /// One field of every match. Documents without the field yield `Null`.
    pub async fn pluck(&self, field: &str) -> QueryResult<Vec<Bson>> {
        path::validate(field)?;

        let documents = self.clone().select([field]).get().await?;
        Ok(documents
            .iter()
            .map(|document| path::lookup(document, field).cloned().unwrap_or(Bson::Null))
            .collect())
    }

    /// Maps `key` to `field` for every match. Later documents win on duplicate keys.
    pub async fn pluck_keyed(&self, field: &str, key: &str) -> QueryResult<Document> {
        path::validate(field)?;
        path::validate(key)?;

        let documents = self.clone().select([field, key]).get().await?;
        let mut keyed = Document::new();
        for document in &documents {
            let Some(name) = path::lookup(document, key).map(key_string) else {
                continue;
            };
            let value = path::lookup(document, field).cloned().unwrap_or(Bson::Null);
            keyed.insert(name, value);
        }

        Ok(keyed)
    }

    /// Streams the results instead of materializing them.
    pub async fn cursor(&self) -> QueryResult<ResultCursor> {
        self.check()?;

        let collection = self.collection();
        let inner = match compile_select(&self.state) {
            CompiledQuery::Find(command) => {
                debug!(collection, ?command, "opening find cursor");
                self.backend.find_cursor(collection, command).await?
            }
            CompiledQuery::Aggregate(command) => {
                debug!(collection, ?command, "dispatching grouped aggregate");
                let documents = self.backend.aggregate(collection, command).await?;
                stream::iter(documents.into_iter().map(Ok)).boxed()
            }
        };

        Ok(ResultCursor::new(collection, inner))
    }

    pub async fn exists(&self) -> QueryResult<bool> {
        Ok(self.first().await?.is_some())
    }

    pub async fn doesnt_exist(&self) -> QueryResult<bool> {
        Ok(!self.exists().await?)
    }

    // -- aggregates ---------------------------------------------------------------------------

    /// Number of matching documents.
    pub async fn count(&self) -> QueryResult<u64> {
        let result = self.aggregate(AggregateFunction::Count, None).await?;
        Ok(as_count(&result))
    }

    /// Number of matching documents where `field` is present and not null.
    pub async fn count_field(&self, field: &str) -> QueryResult<u64> {
        let result = self.aggregate(AggregateFunction::Count, Some(field)).await?;
        Ok(as_count(&result))
    }

    /// Sum over documents that have `field`. Zero when none do.
    pub async fn sum(&self, field: &str) -> QueryResult<Bson> {
        let result = self.aggregate(AggregateFunction::Sum, Some(field)).await?;
        Ok(match result {
            Bson::Null => Bson::Int32(0),
            sum => sum,
        })
    }

    /// Average over documents that have `field`, `Null` when none do.
    pub async fn avg(&self, field: &str) -> QueryResult<Bson> {
        self.aggregate(AggregateFunction::Avg, Some(field)).await
    }

    pub async fn average(&self, field: &str) -> QueryResult<Bson> {
        self.avg(field).await
    }

    pub async fn min(&self, field: &str) -> QueryResult<Bson> {
        self.aggregate(AggregateFunction::Min, Some(field)).await
    }

    pub async fn max(&self, field: &str) -> QueryResult<Bson> {
        self.aggregate(AggregateFunction::Max, Some(field)).await
    }

    async fn aggregate(&self, function: AggregateFunction, field: Option<&str>) -> QueryResult<Bson> {
        self.check()?;
        if let Some(field) = field {
            path::validate(field)?;
        }

        let collection = self.collection();
        let command = compile_aggregate(&self.state, function, field);
        debug!(collection, ?function, ?command, "dispatching aggregate");

        let results = self.backend.aggregate(collection, command).await?;
        Ok(results
            .first()
            .and_then(|result| result.get(AGGREGATE_FIELD))
            .cloned()
            .unwrap_or(Bson::Null))
    }

    /// Distinct values of `field` among the matches. Array values are flattened.
    pub async fn distinct(&self, field: &str) -> QueryResult<Vec<Bson>> {
        self.check()?;
        path::validate(field)?;

        let collection = self.collection();
        let command = compile_distinct(&self.state, field);
        debug!(collection, ?command, "dispatching distinct");
        self.backend.distinct(collection, command).await
    }

    /// Counts the matches, then fetches only the requested page.
    pub async fn paginate(&self, params: PaginationParams) -> QueryResult<Page<Document>> {
        let count = self.count().await?;
        let items = self
            .clone()
            .skip(params.offset())
            .take(params.per_page)
            .get()
            .await?;

        Ok(params.page_of(items, count))
    }

    // -- writes -------------------------------------------------------------------------------

    /// Inserts documents and returns their ids in order.
    pub async fn insert<I>(&self, documents: I) -> QueryResult<Vec<Bson>>
    where
        I: IntoIterator<Item = Document>,
    {
        let documents: Vec<Document> = documents.into_iter().collect();
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let collection = self.collection();
        debug!(collection, count = documents.len(), "dispatching insert");
        self.backend.insert(collection, documents).await
    }

    /// Inserts one document and returns its id.
    pub async fn insert_get_id(&self, document: Document) -> QueryResult<Bson> {
        self.insert([document])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::store("insert reported no id"))
    }

    pub async fn insert_model<M: Model>(&self, model: &M) -> QueryResult<Bson> {
        self.insert_get_id(model.to_document()?).await
    }

    /// Updates the matches. Keys starting with `$` are native operators; every other key is set.
    ///
    /// Returns the number of documents actually changed.
    pub async fn update(&self, fields: Document, options: UpdateOptions) -> QueryResult<u64> {
        let intents = WriteIntent::from_fields(fields)?;
        let outcome = self.run_update(intents, None, options).await?;
        Ok(outcome.modified + u64::from(outcome.upserted_id.is_some()))
    }

    /// Replaces the first match entirely.
    pub async fn replace(&self, document: Document) -> QueryResult<u64> {
        let options = UpdateOptions {
            upsert: false,
            multiple: false,
        };
        let outcome = self
            .run_update(vec![WriteIntent::Replace(document)], None, options)
            .await?;
        Ok(outcome.modified)
    }

    /// Atomically adds `amount` to `field`, setting `extra` alongside.
    ///
    /// Documents where `field` is explicitly null are left untouched.
    pub async fn increment(&self, field: &str, amount: impl Into<Bson>, extra: Document) -> QueryResult<u64> {
        self.step(field, amount.into(), extra, false).await
    }

    pub async fn decrement(&self, field: &str, amount: impl Into<Bson>, extra: Document) -> QueryResult<u64> {
        self.step(field, amount.into(), extra, true).await
    }

    async fn step(&self, field: &str, amount: Bson, extra: Document, negate: bool) -> QueryResult<u64> {
        let mut intents = vec![WriteIntent::increment(field, amount, negate)?];
        intents.extend(WriteIntent::from_fields(extra)?);

        let guard = increment_guard(&path::normalize(field));
        let outcome = self
            .run_update(intents, Some(guard), UpdateOptions::default())
            .await?;
        Ok(outcome.modified)
    }

    /// Appends to an array field. `unique` skips values already present.
    ///
    /// `target` is a field name, or a map of field to value with `value` left `Null`.
    pub async fn push(&self, target: impl Into<FieldTarget>, value: impl Into<Bson>, unique: bool) -> QueryResult<u64> {
        let intent = WriteIntent::push(target.into(), value.into(), unique)?;
        let outcome = self.run_update(vec![intent], None, UpdateOptions::default()).await?;
        Ok(outcome.modified)
    }

    /// Removes matching array elements. A list value removes every listed element.
    pub async fn pull(&self, target: impl Into<FieldTarget>, value: impl Into<Bson>) -> QueryResult<u64> {
        let intent = WriteIntent::pull(target.into(), value.into())?;
        let outcome = self.run_update(vec![intent], None, UpdateOptions::default()).await?;
        Ok(outcome.modified)
    }

    /// Removes fields from every match.
    pub async fn unset<I, S>(&self, fields: I) -> QueryResult<u64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let intent = WriteIntent::unset(fields)?;
        let outcome = self.run_update(vec![intent], None, UpdateOptions::default()).await?;
        Ok(outcome.modified)
    }

    async fn run_update(
        &self,
        intents: Vec<WriteIntent>,
        scope: Option<Document>,
        options: UpdateOptions,
    ) -> QueryResult<UpdateOutcome> {
        self.check()?;

        let update = merge_intents(intents)?;
        if update.is_empty() {
            return Err(QueryError::invalid("update has nothing to write"));
        }

        let command = UpdateCommand {
            filter: self.scoped_filter(scope),
            update,
            upsert: options.upsert,
            multiple: options.multiple,
        };

        let collection = self.collection();
        debug!(collection, ?command, "dispatching update");
        self.backend.update(collection, command).await
    }

    /// Inserts or updates each document, matched on `unique_by`, in one ordered batch.
    ///
    /// `update_columns` defaults to every field outside `unique_by`. Returns inserted plus
    /// changed documents; matches that needed no change are not counted.
    pub async fn upsert<I>(&self, documents: I, unique_by: &[&str], update_columns: Option<&[&str]>) -> QueryResult<u64>
    where
        I: IntoIterator<Item = Document>,
    {
        self.check()?;

        let documents: Vec<Document> = documents.into_iter().collect();
        if documents.is_empty() {
            return Ok(0);
        }

        let unique_by: Vec<String> = unique_by.iter().map(|field| field.to_string()).collect();
        let update_columns: Option<Vec<String>> =
            update_columns.map(|columns| columns.iter().map(|field| field.to_string()).collect());

        let operations = upsert_ops(
            documents,
            &unique_by,
            update_columns.as_deref(),
            &self.state.key_name,
        )?;

        let collection = self.collection();
        debug!(collection, operations = operations.len(), "dispatching bulk upsert");
        let outcome = self.backend.bulk_upsert(collection, operations).await?;
        Ok(outcome.affected())
    }

    /// Deletes every match and returns how many were removed.
    pub async fn delete(&self) -> QueryResult<u64> {
        self.run_delete(None).await
    }

    /// Deletes the match with primary key `id`. The id applies to this call only.
    pub async fn delete_by_id(&self, id: impl Into<Bson>) -> QueryResult<u64> {
        let id = id.into();
        if matches!(id, Bson::Null) {
            return self.run_delete(None).await;
        }

        let predicate = Predicate::compare_with(&self.state.key_name, Operator::Eq, id, &self.state.key_name)?;
        self.run_delete(Some(predicate.compile())).await
    }

    async fn run_delete(&self, scope: Option<Document>) -> QueryResult<u64> {
        self.check()?;

        let command = DeleteCommand {
            filter: self.scoped_filter(scope),
        };

        let collection = self.collection();
        debug!(collection, ?command, "dispatching delete");
        self.backend.delete(collection, command).await
    }

    /// Removes every document in the collection, ignoring predicates.
    pub async fn truncate(&self) -> QueryResult<bool> {
        let collection = self.collection();
        debug!(collection, "dispatching truncate");
        self.backend.truncate(collection).await
    }

    // -- escape hatch -------------------------------------------------------------------------

    /// Runs `f` against the native collection handle, bypassing all translation.
    pub fn raw<R>(&self, f: impl FnOnce(B::Native) -> R) -> R {
        f(self.raw_collection())
    }

    /// The native collection handle.
    pub fn raw_collection(&self) -> B::Native {
        self.backend.native_collection(self.collection())
    }

    fn scoped_filter(&self, scope: Option<Document>) -> Document {
        let filter = compile_filter(&self.state.wheres);
        match scope {
            None => filter,
            Some(scope) if filter.is_empty() => scope,
            Some(scope) => doc! { "$and": [filter, scope] },
        }
    }
}

fn as_count(value: &Bson) -> u64 {
    match value {
        Bson::Int32(n) => u64::try_from(*n).unwrap_or(0),
        Bson::Int64(n) => u64::try_from(*n).unwrap_or(0),
        Bson::Double(n) if *n > 0.0 => *n as u64,
        _ => 0,
    }
}

fn key_string(key: &Bson) -> String {
    match key {
        Bson::String(text) => text.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}
