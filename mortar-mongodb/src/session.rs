//! The boundary between the query builder and a connected deployment.

use async_trait::async_trait;
use bson::Document;

use crate::bulk::{BulkWrite, WriteResult};
use crate::error::MongoResult;
use crate::types::{Namespace, ReadConcern, ReadPreference, WriteConcern};

/// A find request, fully resolved from builder state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadQuery {
    /// Match criteria.
    pub filter: Document,
    /// Fields to return; empty returns every field.
    pub projection: Document,
    /// Sort order.
    pub sort: Document,
    /// Documents to skip.
    pub skip: u64,
    /// Maximum number of documents.
    pub limit: i64,
    /// Read concern for this read.
    pub read_concern: ReadConcern,
    /// Members the read may be served from.
    pub read_preference: ReadPreference,
}

/// An established connection to a deployment.
///
/// The builder only ever talks to the database through this trait. The
/// driver-backed implementation is [`MongoSession`](crate::client::MongoSession);
/// tests substitute an in-memory recorder.
#[async_trait]
pub trait Session: Send + Sync {
    /// Run a find against `namespace` and drain the cursor.
    async fn execute_read(&self, namespace: &Namespace, query: ReadQuery) -> MongoResult<Vec<Document>>;

    /// Apply a bulk write to `namespace`.
    async fn execute_write(
        &self,
        namespace: &Namespace,
        bulk: BulkWrite,
        write_concern: &WriteConcern,
    ) -> MongoResult<WriteResult>;

    /// Run an administrative command against `database` and return its reply.
    ///
    /// Replies carrying a cursor come back with every batch folded into
    /// `cursor.firstBatch`.
    async fn execute_command(&self, database: &str, command: Document) -> MongoResult<Document>;
}
