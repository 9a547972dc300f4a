//! Driver-backed [`Session`] built on the official MongoDB client.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::options::{CollectionOptions, FindOptions};
use mongodb::{Client, Database};
use tracing::{debug, info};

use crate::bulk::{BulkWrite, WriteResult};
use crate::config::MongoConfig;
use crate::error::{MongoError, MongoResult, Operation};
use crate::session::{ReadQuery, Session};
use crate::types::{Namespace, WriteConcern};

/// A connected MongoDB session.
///
/// The driver pools connections internally, so a session is cheap to clone
/// and can back any number of builders.
#[derive(Clone)]
pub struct MongoSession {
    client: Client,
    database: Database,
    config: Arc<MongoConfig>,
}

impl MongoSession {
    /// Connect using a validated configuration.
    ///
    /// Failures are reported as [`Operation::Connect`] errors whose message
    /// honours the configuration's debug flag.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let verbose = config.debug;
        Self::open(config)
            .await
            .map_err(|e| e.during(Operation::Connect, verbose))
    }

    async fn open(config: MongoConfig) -> MongoResult<Self> {
        let options = config.to_client_options().await?;

        let client = Client::with_options(options)
            .map_err(|e| MongoError::connection(format!("failed to create client: {}", e)))?;

        let database = client.database(&config.database);

        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "MongoDB session created"
        );

        Ok(Self {
            client,
            database,
            config: Arc::new(config),
        })
    }

    /// Get the default database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Name of the default database.
    pub fn database_name(&self) -> &str {
        &self.config.database
    }

    /// Get the underlying MongoDB client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the configuration.
    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// Check if the deployment answers a ping.
    pub async fn is_healthy(&self) -> bool {
        self.database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .is_ok()
    }
}

#[async_trait]
impl Session for MongoSession {
    async fn execute_read(&self, namespace: &Namespace, query: ReadQuery) -> MongoResult<Vec<Document>> {
        debug!(namespace = %namespace, filter = ?query.filter, "Executing find");

        let mut collection_options = CollectionOptions::default();
        collection_options.read_concern = Some(query.read_concern.to_driver());
        collection_options.selection_criteria = Some(query.read_preference.to_selection_criteria());

        let collection = self
            .client
            .database(&namespace.database)
            .collection_with_options::<Document>(&namespace.collection, collection_options);

        let mut find_options = FindOptions::default();
        find_options.projection = Some(query.projection).filter(|p| !p.is_empty());
        find_options.sort = Some(query.sort).filter(|s| !s.is_empty());
        find_options.skip = Some(query.skip);
        find_options.limit = Some(query.limit);

        let cursor = collection.find(query.filter, find_options).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents)
    }

    async fn execute_write(
        &self,
        namespace: &Namespace,
        bulk: BulkWrite,
        write_concern: &WriteConcern,
    ) -> MongoResult<WriteResult> {
        debug!(namespace = %namespace, operations = bulk.len(), "Executing bulk write");

        let database = self.client.database(&namespace.database);
        let mut result = WriteResult::default();

        for (kind, command) in bulk.to_commands(&namespace.collection, write_concern) {
            let reply = database.run_command(command, None).await?;
            result.absorb_reply(kind, &reply)?;
        }

        Ok(result)
    }

    async fn execute_command(&self, database: &str, command: Document) -> MongoResult<Document> {
        debug!(database = %database, command = ?command, "Executing command");

        let database = self.client.database(database);
        let mut reply = database.run_command(command, None).await?;
        drain_cursor(&database, &mut reply).await?;
        Ok(reply)
    }
}

/// Follow an open command cursor with `getMore` until it is exhausted,
/// folding every batch into `cursor.firstBatch`.
async fn drain_cursor(database: &Database, reply: &mut Document) -> MongoResult<()> {
    let (mut cursor_id, collection, mut batch) = match reply.get_document_mut("cursor") {
        Ok(cursor) => {
            let collection = cursor
                .get_str("ns")
                .ok()
                .and_then(|ns| ns.split_once('.'))
                .map(|(_, collection)| collection.to_string())
                .unwrap_or_default();
            let batch = match cursor.remove("firstBatch") {
                Some(Bson::Array(batch)) => batch,
                _ => Vec::new(),
            };
            (cursor.get_i64("id").unwrap_or(0), collection, batch)
        }
        Err(_) => return Ok(()),
    };

    while cursor_id != 0 {
        let more = database
            .run_command(doc! { "getMore": cursor_id, "collection": &collection }, None)
            .await?;
        let Ok(cursor) = more.get_document("cursor") else {
            break;
        };
        if let Ok(next) = cursor.get_array("nextBatch") {
            batch.extend(next.iter().cloned());
        }
        cursor_id = cursor.get_i64("id").unwrap_or(0);
    }

    if let Ok(cursor) = reply.get_document_mut("cursor") {
        cursor.insert("id", 0_i64);
        cursor.insert("firstBatch", batch);
    }
    Ok(())
}
