//! The fluent query builder.
//!
//! A [`QueryBuilder`] accumulates predicates, update operators, projection,
//! sort order and paging between calls. Terminal operations translate that
//! state into a find, a bulk write or a database command, run it through the
//! [`Session`], normalize the reply and reset the state.
//!
//! ```rust,ignore
//! use mortar_mongodb::prelude::*;
//!
//! let mut db = QueryBuilder::connect(config).await?;
//!
//! let adults = db
//!     .select(&["name", "age"], &[])
//!     .where_gte("age", 18)?
//!     .order_by(doc! { "age": "desc" })
//!     .limit(10)
//!     .get("users")
//!     .result()
//!     .await?;
//!
//! db.where_eq("name", "Alice")?
//!     .set(("status", "active"))
//!     .update("users", UpdateOptions::new())
//!     .await?;
//! ```

use std::sync::Arc;

use bson::{Bson, Document, doc};
use tracing::{debug, warn};

use crate::bulk::{BulkWrite, UpdateOptions, WriteResult};
use crate::client::MongoSession;
use crate::config::MongoConfig;
use crate::document::{self, QueryOutput};
use crate::error::{MongoError, MongoResult, Operation};
use crate::filter::{FilterBuilder, LikeOptions};
use crate::session::{ReadQuery, Session};
use crate::types::{self, Namespace, ReadConcern, ReadPreference, ReturnAs, WriteConcern};
use crate::update::{IntoFieldNames, IntoFieldValues, UpdateBuilder};

/// Limit applied when none was requested.
pub const DEFAULT_LIMIT: i64 = 999_999;

/// Stateful query builder bound to one database.
///
/// A builder is meant for a single owner issuing one operation at a time;
/// use one builder per task. Builders sharing a [`Session`] share its
/// connection pool.
pub struct QueryBuilder {
    session: Arc<dyn Session>,
    database: String,
    debug: bool,
    legacy_support: bool,
    return_as: ReturnAs,
    read_concern: ReadConcern,
    read_preference: ReadPreference,
    write_concern: WriteConcern,

    collection: String,
    filter: FilterBuilder,
    update: UpdateBuilder,
    selects: Document,
    projection: Option<Document>,
    sorts: Document,
    limit: i64,
    offset: i64,
    distinct: Option<String>,
    count: bool,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("filter", self.filter.as_document())
            .field("update", &self.update)
            .field("projection", &self.projection)
            .field("sorts", &self.sorts)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("distinct", &self.distinct)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl QueryBuilder {
    /// Create a builder over an established session.
    pub fn new(session: Arc<dyn Session>, config: &MongoConfig) -> Self {
        Self {
            session,
            database: config.database.trim().to_string(),
            debug: config.debug,
            legacy_support: config.legacy_support,
            return_as: config.return_as,
            read_concern: config.read_concern,
            read_preference: config.read_preference,
            write_concern: config.write_concern(),
            collection: String::new(),
            filter: FilterBuilder::new(),
            update: UpdateBuilder::new(),
            selects: Document::new(),
            projection: None,
            sorts: Document::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            distinct: None,
            count: false,
        }
    }

    /// Connect with `config` and create a builder over the new session.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let session = MongoSession::connect(config.clone()).await?;
        Ok(Self::new(Arc::new(session), &config))
    }

    // ==================== Predicates ====================

    /// Merge a field → value equality map into the filter.
    pub fn where_(&mut self, wheres: Document) -> &mut Self {
        self.filter.merge(wheres);
        self
    }

    /// Add a single equality predicate.
    pub fn where_eq(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        self.filter.eq(field, value)?;
        Ok(self)
    }

    /// Append every pair of `alternatives` as an `$or` branch.
    pub fn where_or(&mut self, alternatives: Document) -> MongoResult<&mut Self> {
        self.filter.or(alternatives)?;
        Ok(self)
    }

    /// `field` equals any of `values`.
    pub fn where_in<V: Into<Bson>>(
        &mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> MongoResult<&mut Self> {
        self.filter.in_array(field, values)?;
        Ok(self)
    }

    /// Array `field` contains every one of `values`.
    pub fn where_in_all<V: Into<Bson>>(
        &mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> MongoResult<&mut Self> {
        self.filter.all(field, values)?;
        Ok(self)
    }

    /// `field` equals none of `values`.
    pub fn where_not_in<V: Into<Bson>>(
        &mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> MongoResult<&mut Self> {
        self.filter.not_in(field, values)?;
        Ok(self)
    }

    /// `field > value`.
    pub fn where_gt(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        self.filter.gt(field, value)?;
        Ok(self)
    }

    /// `field >= value`.
    pub fn where_gte(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        self.filter.gte(field, value)?;
        Ok(self)
    }

    /// `field < value`.
    pub fn where_lt(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        self.filter.lt(field, value)?;
        Ok(self)
    }

    /// `field <= value`.
    pub fn where_lte(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        self.filter.lte(field, value)?;
        Ok(self)
    }

    /// `field != value`.
    pub fn where_ne(&mut self, field: &str, value: impl Into<Bson>) -> MongoResult<&mut Self> {
        self.filter.ne(field, value)?;
        Ok(self)
    }

    /// `lower <= field <= upper`.
    pub fn where_between(
        &mut self,
        field: &str,
        lower: impl Into<Bson>,
        upper: impl Into<Bson>,
    ) -> MongoResult<&mut Self> {
        self.filter.between(field, lower, upper)?;
        Ok(self)
    }

    /// `lower < field < upper`.
    pub fn where_between_ne(
        &mut self,
        field: &str,
        lower: impl Into<Bson>,
        upper: impl Into<Bson>,
    ) -> MongoResult<&mut Self> {
        self.filter.between_ne(field, lower, upper)?;
        Ok(self)
    }

    /// Match the literal text `value` inside `field`.
    pub fn like(&mut self, field: &str, value: &str, options: LikeOptions) -> MongoResult<&mut Self> {
        self.filter.like(field, value, options)?;
        Ok(self)
    }

    // ==================== Update operators ====================

    /// `$set` a pair or a map of pairs.
    pub fn set(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.update.set(fields);
        self
    }

    /// `$unset` one or more fields.
    pub fn unset(&mut self, fields: impl IntoFieldNames) -> &mut Self {
        self.update.unset(fields);
        self
    }

    /// `$addToSet` a value, or each element of a list.
    pub fn add_to_set(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.update.add_to_set(field, value);
        self
    }

    /// `$push` a pair or a map of pairs.
    pub fn push(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.update.push(fields);
        self
    }

    /// `$pop` the last element of one or more arrays.
    pub fn pop(&mut self, fields: impl IntoFieldNames) -> &mut Self {
        self.update.pop(fields);
        self
    }

    /// `$pull` elements of `field` matching `value`.
    pub fn pull(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.update.pull(field, value);
        self
    }

    /// `$rename` a field.
    pub fn rename_field(&mut self, old: &str, new: &str) -> &mut Self {
        self.update.rename(old, new);
        self
    }

    /// `$inc` a pair or a map of pairs.
    pub fn inc(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.update.inc(fields);
        self
    }

    /// `$mul` a pair or a map of pairs.
    pub fn mul(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.update.mul(fields);
        self
    }

    /// `$min` a pair or a map of pairs.
    pub fn min(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.update.min(fields);
        self
    }

    /// `$max` a pair or a map of pairs.
    pub fn max(&mut self, fields: impl IntoFieldValues) -> &mut Self {
        self.update.max(fields);
        self
    }

    // ==================== Read configuration ====================

    /// Include `includes` and exclude `excludes` from returned documents.
    pub fn select(&mut self, includes: &[&str], excludes: &[&str]) -> &mut Self {
        for field in includes {
            self.selects.insert(*field, 1);
        }
        for field in excludes {
            self.selects.insert(*field, 0);
        }
        self
    }

    /// Project `field` through a projection expression such as `$slice`.
    pub fn select_expr(&mut self, field: &str, expression: Document) -> &mut Self {
        self.selects.insert(field, expression);
        self
    }

    /// Set the active collection.
    pub fn from(&mut self, collection: &str) -> MongoResult<&mut Self> {
        self.collection = require_collection(
            collection,
            "In order to retrieve documents from MongoDB, a collection name must be passed",
        )?;
        Ok(self)
    }

    /// Optionally switch collection and fix the projection for the next read.
    ///
    /// Nothing is sent until [`result`](Self::result) or [`row`](Self::row).
    pub fn get<'a>(&mut self, collection: impl Into<Option<&'a str>>) -> &mut Self {
        if let Some(collection) = collection.into().map(str::trim).filter(|c| !c.is_empty()) {
            self.collection = collection.to_string();
        }
        if self.projection.is_none() {
            self.projection = Some(self.selects.clone());
        }
        self
    }

    /// Merge `wheres` into the filter and [`get`](Self::get) `collection`.
    pub fn get_where(&mut self, collection: &str, wheres: Document) -> MongoResult<&mut Self> {
        if wheres.is_empty() {
            return Err(MongoError::validation(
                "Nothing passed to perform search or value is empty",
            ));
        }
        self.filter.merge(wheres);
        Ok(self.get(collection))
    }

    /// Make the next read return the number of matching documents.
    pub fn count(&mut self) -> &mut Self {
        self.projection = Some(doc! { "_id": 1 });
        self.count = true;
        self
    }

    /// [`count`](Self::count) then [`get`](Self::get) `collection`.
    pub fn count_all_results(&mut self, collection: &str) -> &mut Self {
        self.count();
        self.get(collection)
    }

    /// Make the next read return the distinct values of `field`.
    pub fn distinct(&mut self, field: &str) -> MongoResult<&mut Self> {
        let field = field.trim();
        if field.is_empty() {
            return Err(MongoError::validation(
                "Need Collection field information for performing distinct query",
            ));
        }
        self.distinct = Some(field.to_string());
        Ok(self)
    }

    /// Append sort keys; `-1`, `false` and `"desc"` sort descending.
    pub fn order_by(&mut self, fields: Document) -> &mut Self {
        for (field, value) in &fields {
            self.sorts.insert(field.clone(), types::direction(value));
        }
        self
    }

    /// Return at most `count` documents; non-positive values are ignored.
    pub fn limit(&mut self, count: i64) -> &mut Self {
        if count >= 1 {
            self.limit = count;
        }
        self
    }

    /// Skip the first `count` documents; non-positive values are ignored.
    pub fn offset(&mut self, count: i64) -> &mut Self {
        if count >= 1 {
            self.offset = count;
        }
        self
    }

    // ==================== Reads ====================

    /// Run the configured read with the configured output shape.
    pub async fn result(&mut self) -> MongoResult<QueryOutput> {
        self.result_as(self.return_as).await
    }

    /// Run the configured read, shaping documents as `shape`.
    ///
    /// In distinct mode this yields [`QueryOutput::Values`]; in count mode
    /// [`QueryOutput::Count`]. The builder is reset once output is produced.
    pub async fn result_as(&mut self, shape: ReturnAs) -> MongoResult<QueryOutput> {
        self.fetch(shape, self.limit).await
    }

    /// Run the configured read limited to one document and return it.
    ///
    /// Count and distinct reads have no first document; use
    /// [`result`](Self::result) for those.
    pub async fn row(&mut self) -> MongoResult<Option<Document>> {
        if self.count || self.distinct.is_some() {
            return Err(MongoError::validation(
                "A single row cannot be fetched from a count or distinct query",
            ));
        }

        let output = self.fetch(ReturnAs::Array, 1).await?;
        Ok(output.into_documents().and_then(|docs| docs.into_iter().next()))
    }

    async fn fetch(&mut self, shape: ReturnAs, limit: i64) -> MongoResult<QueryOutput> {
        if self.collection.is_empty() {
            return Err(MongoError::validation(
                "In order to retrieve documents from MongoDB, a collection name must be passed",
            ));
        }

        let outcome = self.read(shape, limit).await;
        let output = match outcome {
            Ok(output) => output,
            Err(e) => return Err(self.failure(Operation::Read, e)),
        };
        self.reset();
        Ok(output)
    }

    async fn read(&self, shape: ReturnAs, limit: i64) -> MongoResult<QueryOutput> {
        if let Some(field) = &self.distinct {
            debug!(collection = %self.collection, field = %field, "Executing distinct");
            let command = doc! {
                "distinct": self.collection.as_str(),
                "key": field.as_str(),
                "query": self.filter.as_document().clone(),
            };
            let reply = self.session.execute_command(&self.database, command).await?;
            let values = reply
                .get_array("values")
                .map_err(|_| MongoError::query("distinct reply carried no values array"))?;
            return Ok(QueryOutput::Values(values.clone()));
        }

        let namespace = Namespace::new(&self.database, &self.collection);
        let query = ReadQuery {
            filter: self.filter.as_document().clone(),
            projection: self.projection.clone().unwrap_or_else(|| self.selects.clone()),
            sort: self.sorts.clone(),
            skip: self.offset as u64,
            limit,
            read_concern: self.read_concern,
            read_preference: self.read_preference,
        };

        debug!(namespace = %namespace, filter = ?query.filter, count = self.count, "Executing read");
        let documents = self.session.execute_read(&namespace, query).await?;
        Ok(self.normalize(documents, shape))
    }

    // ==================== Writes ====================

    /// Insert one document, generating its `_id` when absent.
    ///
    /// Returns the stored document with its identifier normalized.
    pub async fn insert(&mut self, collection: &str, mut document: Document) -> MongoResult<Document> {
        let collection = require_collection(collection, "No Mongo collection provided")?;
        if document.is_empty() {
            return Err(MongoError::validation(
                "Nothing to insert into Mongo collection or insert is not an array",
            ));
        }

        document::ensure_id(&mut document);
        let mut bulk = BulkWrite::new();
        bulk.insert(document.clone());

        self.write(Operation::Insert, &collection, bulk).await?;
        Ok(document::convert_document_id(document, self.legacy_support))
    }

    /// Insert many documents in one bulk write.
    ///
    /// Every document without an `_id` gets a fresh one; the identifiers are
    /// reported in [`WriteResult::inserted_ids`] in batch order.
    pub async fn batch_insert(&mut self, collection: &str, documents: Vec<Document>) -> MongoResult<WriteResult> {
        let collection = require_collection(collection, "No Mongo collection selected to insert into")?;
        if documents.is_empty() {
            return Err(MongoError::validation(
                "Nothing to insert into Mongo collection or insert is not an array",
            ));
        }

        let mut bulk = BulkWrite::new();
        let mut ids = Vec::with_capacity(documents.len());
        for mut document in documents {
            ids.push(document::ensure_id(&mut document));
            bulk.insert(document);
        }

        let mut result = self.write(Operation::BatchInsert, &collection, bulk).await?;
        result.inserted_ids = ids;
        Ok(result)
    }

    /// Apply the accumulated update to documents matching the filter.
    ///
    /// Updates a single document unless `options` asks for `multi`.
    pub async fn update(&mut self, collection: &str, options: UpdateOptions) -> MongoResult<WriteResult> {
        let collection = require_collection(collection, "No Mongo collection selected for update")?;
        self.apply_update(collection, options).await
    }

    /// Fold `fragment` into the accumulated update and apply it to every
    /// matching document.
    ///
    /// Keys already accumulated take precedence over the fragment's keys.
    pub async fn update_all(
        &mut self,
        collection: &str,
        fragment: Document,
        options: UpdateOptions,
    ) -> MongoResult<WriteResult> {
        let collection = require_collection(collection, "No Mongo collection selected for update")?;
        if !fragment.is_empty() {
            self.update.merge_under(fragment)?;
        }
        self.apply_update(collection, options.multi(true)).await
    }

    async fn apply_update(&mut self, collection: String, options: UpdateOptions) -> MongoResult<WriteResult> {
        if self.update.is_empty() {
            return Err(MongoError::validation(
                "Nothing to update in Mongo collection or update is not an array",
            ));
        }

        let mut bulk = BulkWrite::new();
        bulk.update(self.filter.as_document().clone(), self.update.to_document(), options);
        self.write(Operation::Update, &collection, bulk).await
    }

    /// Delete the first document matching the filter.
    pub async fn delete(&mut self, collection: &str) -> MongoResult<WriteResult> {
        let collection = require_collection(collection, "No Mongo collection selected for delete")?;
        self.apply_delete(collection, true).await
    }

    /// Delete every document matching the filter.
    pub async fn delete_all(&mut self, collection: &str) -> MongoResult<WriteResult> {
        let collection = require_collection(collection, "No Mongo collection selected for delete")?;
        self.apply_delete(collection, false).await
    }

    async fn apply_delete(&mut self, collection: String, single: bool) -> MongoResult<WriteResult> {
        let mut bulk = BulkWrite::new();
        bulk.delete(self.filter.as_document().clone(), single);
        self.write(Operation::Delete, &collection, bulk).await
    }

    async fn write(&mut self, operation: Operation, collection: &str, bulk: BulkWrite) -> MongoResult<WriteResult> {
        let namespace = Namespace::new(&self.database, collection);
        debug!(namespace = %namespace, operation = %operation, operations = bulk.len(), "Executing write");

        let outcome = self.session.execute_write(&namespace, bulk, &self.write_concern).await;
        match outcome {
            Ok(result) => {
                self.reset();
                Ok(result)
            }
            Err(e) => Err(self.failure(operation, e)),
        }
    }

    // ==================== Commands ====================

    /// Run an aggregation pipeline against `collection`.
    pub async fn aggregate(&mut self, collection: &str, pipeline: Vec<Document>) -> MongoResult<QueryOutput> {
        let collection = require_collection(
            collection,
            "In order to retrieve documents from MongoDB, a collection name must be passed",
        )?;
        if pipeline.is_empty() {
            return Err(MongoError::validation("Operation must be an array to perform aggregate"));
        }

        let command = doc! {
            "aggregate": collection,
            "pipeline": pipeline,
            "cursor": {},
        };
        self.command(command, self.return_as).await
    }

    /// Run an arbitrary command against the builder's database.
    ///
    /// Cursor replies are flattened into their documents; any other reply is
    /// returned as a single document.
    pub async fn command(&mut self, request: Document, shape: ReturnAs) -> MongoResult<QueryOutput> {
        let database = self.database.clone();
        self.command_on(&database, request, shape).await
    }

    async fn command_on(&mut self, database: &str, request: Document, shape: ReturnAs) -> MongoResult<QueryOutput> {
        if request.is_empty() {
            return Err(MongoError::validation("Command must be a non-empty document"));
        }

        debug!(database = %database, command = ?request, "Executing command");
        let outcome = self.session.execute_command(database, request).await;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => return Err(self.failure(Operation::Command, e)),
        };

        let output = self.normalize(document::cursor_documents(reply), shape);
        self.reset();
        Ok(output)
    }

    /// Create an index on `collection`.
    ///
    /// Key directions follow the same rules as [`order_by`](Self::order_by).
    /// The index is named after its keys (`field_1_other_-1`) unless
    /// `options` carries a `name`.
    pub async fn add_index(&mut self, collection: &str, keys: Document, options: Document) -> MongoResult<QueryOutput> {
        let collection = require_collection(collection, "No Mongo collection specified to add index to")?;
        if keys.is_empty() {
            return Err(MongoError::validation(
                "Index could not be created to MongoDB Collection because no keys were specified",
            ));
        }

        let keys = types::normalize_directions(&keys);
        let mut index = doc! { "key": keys.clone(), "name": index_name(&keys) };
        for (option, value) in options {
            index.insert(option, value);
        }

        let command = doc! { "createIndexes": collection, "indexes": [index] };
        self.command(command, ReturnAs::Array).await
    }

    /// Drop the index called `name` from `collection`.
    pub async fn remove_index(&mut self, collection: &str, name: &str) -> MongoResult<QueryOutput> {
        let collection = require_collection(collection, "No Mongo collection specified to remove index from")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(MongoError::validation(
                "Index could not be removed from MongoDB Collection because no index name were specified",
            ));
        }

        let command = doc! { "dropIndexes": collection, "index": name };
        self.command(command, ReturnAs::Array).await
    }

    /// List the indexes of `collection`.
    pub async fn list_indexes(&mut self, collection: &str) -> MongoResult<QueryOutput> {
        let collection = require_collection(collection, "No Mongo collection specified to list all indexes from")?;
        self.command(doc! { "listIndexes": collection }, ReturnAs::Array).await
    }

    /// Drop the database called `database`.
    pub async fn drop_db(&mut self, database: &str) -> MongoResult<QueryOutput> {
        let database = require_collection(database, "Failed to drop MongoDB database because name is empty")?;
        self.command_on(&database, doc! { "dropDatabase": 1 }, ReturnAs::Array).await
    }

    /// Drop `collection` from the builder's database.
    pub async fn drop_collection(&mut self, collection: &str) -> MongoResult<QueryOutput> {
        let collection = require_collection(
            collection,
            "Failed to drop MongoDB collection because collection name is empty",
        )?;
        self.command(doc! { "drop": collection }, ReturnAs::Array).await
    }

    // ==================== State ====================

    /// Clear predicates, updates, projection, sort, paging and modes.
    ///
    /// The active collection is kept.
    pub fn reset(&mut self) {
        self.filter.clear();
        self.update.clear();
        self.selects = Document::new();
        self.projection = None;
        self.sorts = Document::new();
        self.limit = DEFAULT_LIMIT;
        self.offset = 0;
        self.distinct = None;
        self.count = false;
    }

    /// The current time, or `millis` since the epoch, as a BSON date-time.
    ///
    /// The value is a UTC instant; see [`document::timestamp`].
    pub fn timestamp(&self, millis: Option<i64>) -> MongoResult<bson::DateTime> {
        document::timestamp(millis)
    }

    /// The database this builder targets.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The active collection, empty if none was chosen.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The accumulated filter.
    pub fn filter(&self) -> &Document {
        self.filter.as_document()
    }

    /// The accumulated update document.
    pub fn update_document(&self) -> Document {
        self.update.to_document()
    }

    /// The projection the next read will use.
    pub fn projection(&self) -> Document {
        self.projection.clone().unwrap_or_else(|| self.selects.clone())
    }

    /// The accumulated sort order.
    pub fn sort(&self) -> &Document {
        &self.sorts
    }

    /// The current limit.
    pub fn current_limit(&self) -> i64 {
        self.limit
    }

    /// The current offset.
    pub fn current_offset(&self) -> i64 {
        self.offset
    }

    /// Check if the next read counts documents.
    pub fn is_count(&self) -> bool {
        self.count
    }

    /// The field the next read collects distinct values of.
    pub fn distinct_field(&self) -> Option<&str> {
        self.distinct.as_deref()
    }

    fn normalize(&self, documents: Vec<Document>, shape: ReturnAs) -> QueryOutput {
        let documents: Vec<Document> = documents
            .into_iter()
            .map(|doc| document::convert_document_id(doc, self.legacy_support))
            .collect();

        if self.count {
            QueryOutput::Count(documents.len() as u64)
        } else {
            QueryOutput::shaped(documents, shape)
        }
    }

    fn failure(&self, operation: Operation, error: MongoError) -> MongoError {
        let error = error.during(operation, self.debug);
        warn!(operation = %operation, collection = %self.collection, error = %error, "MongoDB operation failed");
        error
    }
}

fn require_collection(name: &str, message: &str) -> MongoResult<String> {
    let name = name.trim();
    if name.is_empty() {
        Err(MongoError::validation(message))
    } else {
        Ok(name.to_string())
    }
}

fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction))
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bson::oid::ObjectId;
    use pretty_assertions::assert_eq;

    use crate::bulk::WriteModel;
    use crate::error::ErrorKind;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Read(Namespace, ReadQuery),
        Write(Namespace, Vec<WriteModel>, Document),
        Command(String, Document),
    }

    #[derive(Default)]
    struct RecordingSession {
        calls: Mutex<Vec<Call>>,
        documents: Vec<Document>,
        reply: Document,
        fail: bool,
    }

    impl RecordingSession {
        fn returning(documents: Vec<Document>) -> Self {
            Self {
                documents,
                ..Self::default()
            }
        }

        fn replying(reply: Document) -> Self {
            Self {
                reply,
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) -> MongoResult<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail {
                Err(MongoError::connection("server selection timed out"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Session for RecordingSession {
        async fn execute_read(&self, namespace: &Namespace, query: ReadQuery) -> MongoResult<Vec<Document>> {
            let limit = query.limit as usize;
            self.record(Call::Read(namespace.clone(), query))?;
            Ok(self.documents.iter().take(limit).cloned().collect())
        }

        async fn execute_write(
            &self,
            namespace: &Namespace,
            bulk: BulkWrite,
            write_concern: &WriteConcern,
        ) -> MongoResult<WriteResult> {
            let inserted = bulk
                .models()
                .iter()
                .filter(|m| matches!(m, WriteModel::Insert { .. }))
                .count() as u64;
            self.record(Call::Write(
                namespace.clone(),
                bulk.models().to_vec(),
                write_concern.to_document(),
            ))?;
            Ok(WriteResult {
                inserted_count: inserted,
                ..WriteResult::default()
            })
        }

        async fn execute_command(&self, database: &str, command: Document) -> MongoResult<Document> {
            self.record(Call::Command(database.to_string(), command))?;
            Ok(self.reply.clone())
        }
    }

    fn config() -> MongoConfig {
        MongoConfig {
            database: "shop".to_string(),
            ..MongoConfig::default()
        }
    }

    fn builder(session: &Arc<RecordingSession>) -> QueryBuilder {
        QueryBuilder::new(session.clone(), &config())
    }

    #[test]
    fn test_predicates_on_one_field_merge() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);
        db.where_gt("age", 18).unwrap().where_lt("age", 65).unwrap();

        assert_eq!(db.filter(), &doc! { "age": { "$gt": 18, "$lt": 65 } });
    }

    #[test]
    fn test_where_eq_and_where_ne() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);
        db.where_eq("status", "open")
            .unwrap()
            .where_ne("owner", "bob")
            .unwrap()
            .where_eq("region", "eu")
            .unwrap()
            .where_ne("region", "us")
            .unwrap();

        assert_eq!(
            db.filter(),
            &doc! { "status": "open", "owner": { "$ne": "bob" }, "region": { "$ne": "us" } }
        );
        assert!(db.where_eq(" ", 1).unwrap_err().is_validation());
        assert!(db.where_ne("", 1).unwrap_err().is_validation());
    }

    #[test]
    fn test_where_map_overwrites_repeated_field() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);
        db.where_(doc! { "status": "open", "region": "eu" })
            .where_(doc! { "status": "closed" });

        assert_eq!(db.filter(), &doc! { "status": "closed", "region": "eu" });
    }

    #[test]
    fn test_where_or_appends_alternatives() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);
        db.where_or(doc! { "a": 1, "b": 2 })
            .unwrap()
            .where_or(doc! { "c": 3 })
            .unwrap();

        assert_eq!(
            db.filter(),
            &doc! { "$or": [{ "a": 1 }, { "b": 2 }, { "c": 3 }] }
        );
    }

    #[test]
    fn test_order_by_directions() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);
        db.order_by(doc! { "a": "desc", "b": -1, "c": false, "d": "asc", "e": 1 });

        assert_eq!(db.sort(), &doc! { "a": -1, "b": -1, "c": -1, "d": 1, "e": 1 });
    }

    #[test]
    fn test_limit_and_offset_ignore_non_positive() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        db.limit(0).limit(-5).offset(0).offset(-1);
        assert_eq!(db.current_limit(), DEFAULT_LIMIT);
        assert_eq!(db.current_offset(), 0);

        db.limit(10).offset(20).limit(0);
        assert_eq!(db.current_limit(), 10);
        assert_eq!(db.current_offset(), 20);
    }

    #[test]
    fn test_select_and_get_resolve_projection() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);
        db.select(&["name", "email"], &["password"])
            .select_expr("comments", doc! { "$slice": 5 })
            .get("users");

        assert_eq!(db.collection(), "users");
        assert_eq!(
            db.projection(),
            doc! { "name": 1, "email": 1, "password": 0, "comments": { "$slice": 5 } }
        );
    }

    #[test]
    fn test_count_forces_id_projection() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);
        db.select(&["name"], &[]).count_all_results("orders");

        assert!(db.is_count());
        assert_eq!(db.projection(), doc! { "_id": 1 });
    }

    #[test]
    fn test_usage_errors() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        assert!(db.from("").unwrap_err().is_validation());
        assert!(db.distinct("  ").unwrap_err().is_validation());
        assert!(db.where_gt("", 1).unwrap_err().is_validation());
        assert!(db.get_where("users", Document::new()).unwrap_err().is_validation());
        assert!(db.where_in("tags", Vec::<String>::new()).unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_read_sends_resolved_query() {
        let session = Arc::new(RecordingSession::returning(vec![doc! { "name": "Alice" }]));
        let mut db = builder(&session);

        let output = db
            .select(&["name"], &[])
            .where_eq("status", "active")
            .unwrap()
            .order_by(doc! { "name": "asc" })
            .limit(5)
            .offset(10)
            .get("users")
            .result()
            .await
            .unwrap();

        assert_eq!(output, QueryOutput::Documents(vec![doc! { "name": "Alice" }]));
        assert_eq!(
            session.calls(),
            vec![Call::Read(
                Namespace::new("shop", "users"),
                ReadQuery {
                    filter: doc! { "status": "active" },
                    projection: doc! { "name": 1 },
                    sort: doc! { "name": 1 },
                    skip: 10,
                    limit: 5,
                    read_concern: ReadConcern::Majority,
                    read_preference: ReadPreference::Primary,
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_read_without_collection_never_reaches_session() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        let err = db.result().await.unwrap_err();
        assert!(err.is_validation());
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_read_resets_state_but_keeps_collection() {
        let session = Arc::new(RecordingSession::returning(vec![doc! { "a": 1 }]));
        let mut db = builder(&session);

        db.where_eq("a", 1)
            .unwrap()
            .set(("b", 2))
            .select(&["a"], &[])
            .order_by(doc! { "a": -1 })
            .limit(3)
            .offset(1)
            .get("items");
        db.result().await.unwrap();

        assert!(db.filter().is_empty());
        assert!(db.update_document().is_empty());
        assert!(db.projection().is_empty());
        assert!(db.sort().is_empty());
        assert_eq!(db.current_limit(), DEFAULT_LIMIT);
        assert_eq!(db.current_offset(), 0);
        assert!(!db.is_count());
        assert_eq!(db.distinct_field(), None);
        assert_eq!(db.collection(), "items");
    }

    #[tokio::test]
    async fn test_count_mode_returns_integer() {
        let docs = vec![doc! { "_id": 1 }, doc! { "_id": 2 }, doc! { "_id": 3 }];
        let session = Arc::new(RecordingSession::returning(docs));
        let mut db = builder(&session);

        let output = db.count().get("orders").result().await.unwrap();
        assert_eq!(output, QueryOutput::Count(3));
    }

    #[test]
    fn test_empty_result_from_blocking_context() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        let output = tokio_test::block_on(db.get("empty").result()).unwrap();
        assert!(output.is_empty());
        assert_eq!(output, QueryOutput::Documents(Vec::new()));
    }

    #[tokio::test]
    async fn test_row_limits_to_one() {
        let docs = vec![doc! { "n": 1 }, doc! { "n": 2 }];
        let session = Arc::new(RecordingSession::returning(docs));
        let mut db = builder(&session);

        let row = db.get("numbers").row().await.unwrap();
        assert_eq!(row, Some(doc! { "n": 1 }));
        match &session.calls()[0] {
            Call::Read(_, query) => assert_eq!(query.limit, 1),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_row_keeps_limit_when_rejected() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);
        db.limit(25);

        assert!(db.row().await.unwrap_err().is_validation());
        assert_eq!(db.current_limit(), 25);

        db.from("orders").unwrap();
        db.row().await.unwrap();
        match &session.calls()[0] {
            Call::Read(_, query) => assert_eq!(query.limit, 1),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_row_rejects_count_and_distinct() {
        let docs = vec![doc! { "_id": 1 }, doc! { "_id": 2 }];
        let session = Arc::new(RecordingSession::returning(docs));
        let mut db = builder(&session);

        let err = db.count().get("orders").row().await.unwrap_err();
        assert!(err.is_validation());
        assert!(db.is_count());

        db.reset();
        let err = db.distinct("sku").unwrap().get("orders").row().await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(db.distinct_field(), Some("sku"));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_distinct_without_values_fails() {
        let session = Arc::new(RecordingSession::replying(doc! { "ok": 1 }));
        let mut db = builder(&session);

        let err = db
            .where_eq("state", "paid")
            .unwrap()
            .distinct("sku")
            .unwrap()
            .get("orders")
            .result()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Driver);
        assert_eq!(err.operation(), Some(Operation::Read));
        assert_eq!(db.distinct_field(), Some("sku"));
        assert_eq!(db.filter(), &doc! { "state": "paid" });
    }

    #[tokio::test]
    async fn test_distinct_issues_command() {
        let session = Arc::new(RecordingSession::replying(doc! { "values": ["a", "b"], "ok": 1 }));
        let mut db = builder(&session);

        let output = db
            .where_gt("qty", 0)
            .unwrap()
            .distinct("sku")
            .unwrap()
            .get("orders")
            .result()
            .await
            .unwrap();

        assert_eq!(output, QueryOutput::Values(vec!["a".into(), "b".into()]));
        assert_eq!(
            session.calls(),
            vec![Call::Command(
                "shop".to_string(),
                doc! { "distinct": "orders", "key": "sku", "query": { "qty": { "$gt": 0 } } }
            )]
        );
        assert_eq!(db.distinct_field(), None);
    }

    #[tokio::test]
    async fn test_insert_generates_id() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        let stored = db.insert("users", doc! { "name": "Bob" }).await.unwrap();
        assert!(matches!(stored.get("_id"), Some(Bson::ObjectId(_))));

        match &session.calls()[0] {
            Call::Write(ns, models, concern) => {
                assert_eq!(ns, &Namespace::new("shop", "users"));
                assert_eq!(models, &vec![WriteModel::Insert { document: stored.clone() }]);
                assert_eq!(concern, &doc! { "w": "majority", "wtimeout": 1000_i64 });
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_applies_legacy_ids() {
        let session = Arc::new(RecordingSession::default());
        let mut db = QueryBuilder::new(
            session.clone(),
            &MongoConfig {
                legacy_support: true,
                ..config()
            },
        );

        let oid = ObjectId::new();
        let stored = db.insert("users", doc! { "_id": oid, "name": "Bob" }).await.unwrap();
        assert_eq!(stored, doc! { "_id": { "$id": oid.to_hex() }, "name": "Bob" });
    }

    #[tokio::test]
    async fn test_batch_insert_generates_distinct_ids() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        let docs = vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "_id": "fixed", "n": 3 }];
        let result = db.batch_insert("numbers", docs).await.unwrap();

        assert_eq!(result.inserted_count, 3);
        assert_eq!(result.inserted_ids.len(), 3);
        assert_ne!(result.inserted_ids[0], result.inserted_ids[1]);
        assert_eq!(result.inserted_ids[2], Bson::String("fixed".into()));
    }

    #[tokio::test]
    async fn test_update_uses_filter_and_operators() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        db.where_eq("name", "Alice")
            .unwrap()
            .set(("status", "active"))
            .inc(("logins", 1))
            .update("users", UpdateOptions::new().upsert(true))
            .await
            .unwrap();

        match &session.calls()[0] {
            Call::Write(_, models, _) => assert_eq!(
                models,
                &vec![WriteModel::Update {
                    filter: doc! { "name": "Alice" },
                    update: doc! { "$set": { "status": "active" }, "$inc": { "logins": 1 } },
                    options: UpdateOptions { upsert: true, multi: false },
                }]
            ),
            other => panic!("unexpected call {:?}", other),
        }
        assert!(db.filter().is_empty());
        assert!(db.update_document().is_empty());
    }

    #[tokio::test]
    async fn test_update_all_merges_and_forces_multi() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        db.set(("status", "closed"))
            .update_all(
                "orders",
                doc! { "$set": { "status": "ignored" }, "$inc": { "revision": 1 } },
                UpdateOptions::new(),
            )
            .await
            .unwrap();

        match &session.calls()[0] {
            Call::Write(_, models, _) => assert_eq!(
                models,
                &vec![WriteModel::Update {
                    filter: Document::new(),
                    update: doc! { "$set": { "status": "closed" }, "$inc": { "revision": 1 } },
                    options: UpdateOptions { upsert: false, multi: true },
                }]
            ),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_all_rejects_empty_update() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        let err = db
            .update_all("orders", Document::new(), UpdateOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_single_and_all() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        db.where_eq("state", "void").unwrap();
        db.delete("orders").await.unwrap();
        db.where_eq("state", "void").unwrap();
        db.delete_all("orders").await.unwrap();

        let singles: Vec<bool> = session
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Write(_, models, _) => match &models[0] {
                    WriteModel::Delete { single, .. } => Some(*single),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(singles, vec![true, false]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_state_and_hides_detail() {
        let session = Arc::new(RecordingSession::failing());
        let mut db = builder(&session);

        db.where_eq("id", 1).unwrap().set(("a", 1));
        let err = db.update("items", UpdateOptions::new()).await.unwrap_err();

        assert_eq!(err.to_string(), "Update of data into MongoDB failed");
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert_eq!(err.operation(), Some(Operation::Update));
        assert_eq!(db.filter(), &doc! { "id": 1 });
    }

    #[tokio::test]
    async fn test_debug_flag_includes_detail() {
        let session = Arc::new(RecordingSession::failing());
        let mut db = QueryBuilder::new(
            session.clone(),
            &MongoConfig {
                debug: true,
                ..config()
            },
        );

        let err = db.get("items").result().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "MongoDB query failed: connection error: server selection timed out"
        );
    }

    #[tokio::test]
    async fn test_aggregate_flattens_cursor() {
        let reply = doc! {
            "cursor": { "id": 0_i64, "ns": "shop.orders", "firstBatch": [{ "_id": "a", "total": 3 }] },
            "ok": 1,
        };
        let session = Arc::new(RecordingSession::replying(reply));
        let mut db = builder(&session);

        let pipeline = vec![doc! { "$group": { "_id": "$sku", "total": { "$sum": 1 } } }];
        let output = db.aggregate("orders", pipeline.clone()).await.unwrap();

        assert_eq!(
            output,
            QueryOutput::Documents(vec![doc! { "_id": "a", "total": 3 }])
        );
        assert_eq!(
            session.calls(),
            vec![Call::Command(
                "shop".to_string(),
                doc! { "aggregate": "orders", "pipeline": pipeline, "cursor": {} }
            )]
        );
    }

    #[tokio::test]
    async fn test_aggregate_requires_pipeline() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        assert!(db.aggregate("orders", Vec::new()).await.unwrap_err().is_validation());
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_command_object_shape() {
        let session = Arc::new(RecordingSession::replying(doc! { "ok": 1, "n": 4 }));
        let mut db = builder(&session);

        let output = db
            .command(doc! { "count": "orders" }, ReturnAs::Object)
            .await
            .unwrap();
        assert_eq!(
            output,
            QueryOutput::Records(vec![serde_json::json!({ "ok": 1, "n": 4 })])
        );
    }

    #[tokio::test]
    async fn test_index_administration() {
        let session = Arc::new(RecordingSession::replying(doc! { "ok": 1 }));
        let mut db = builder(&session);

        db.add_index("users", doc! { "email": "asc", "created": "desc" }, doc! { "unique": true })
            .await
            .unwrap();
        db.remove_index("users", "email_1").await.unwrap();
        db.list_indexes("users").await.unwrap();
        db.drop_collection("users").await.unwrap();
        db.drop_db("archive").await.unwrap();

        assert_eq!(
            session.calls(),
            vec![
                Call::Command(
                    "shop".to_string(),
                    doc! {
                        "createIndexes": "users",
                        "indexes": [{
                            "key": { "email": 1, "created": -1 },
                            "name": "email_1_created_-1",
                            "unique": true,
                        }],
                    }
                ),
                Call::Command("shop".to_string(), doc! { "dropIndexes": "users", "index": "email_1" }),
                Call::Command("shop".to_string(), doc! { "listIndexes": "users" }),
                Call::Command("shop".to_string(), doc! { "drop": "users" }),
                Call::Command("archive".to_string(), doc! { "dropDatabase": 1 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_admin_usage_errors() {
        let session = Arc::new(RecordingSession::default());
        let mut db = builder(&session);

        assert!(db.add_index("users", Document::new(), Document::new()).await.is_err());
        assert!(db.remove_index("users", "").await.is_err());
        assert!(db.list_indexes("").await.is_err());
        assert!(db.drop_db("").await.is_err());
        assert!(db.drop_collection(" ").await.is_err());
        assert!(db.command(Document::new(), ReturnAs::Array).await.is_err());
        assert!(session.calls().is_empty());
    }
}
