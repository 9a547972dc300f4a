//! Bulk write batches and their results.
//!
//! A [`BulkWrite`] is an ordered list of write models. It is translated into
//! the server's `insert`, `update` and `delete` commands, folding runs of the
//! same kind into one command so a homogeneous batch costs a single round trip.

use bson::{Bson, Document, doc};
use serde::Serialize;

use crate::error::{MongoError, MongoResult};
use crate::types::WriteConcern;

/// Options for an update model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document when nothing matches.
    pub upsert: bool,
    /// Apply to every matching document instead of the first.
    pub multi: bool,
}

impl UpdateOptions {
    /// Default options: single document, no upsert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable upsert.
    pub fn upsert(mut self, enabled: bool) -> Self {
        self.upsert = enabled;
        self
    }

    /// Enable or disable multi-document updates.
    pub fn multi(mut self, enabled: bool) -> Self {
        self.multi = enabled;
        self
    }
}

/// A single operation inside a [`BulkWrite`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    /// Insert one document.
    Insert {
        /// The document, including its `_id`.
        document: Document,
    },
    /// Update documents matching a filter.
    Update {
        /// Match criteria.
        filter: Document,
        /// Update operators.
        update: Document,
        /// Upsert / multi flags.
        options: UpdateOptions,
    },
    /// Delete documents matching a filter.
    Delete {
        /// Match criteria.
        filter: Document,
        /// Delete at most one document.
        single: bool,
    },
}

/// The command family a write model is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// `insert` command.
    Insert,
    /// `update` command.
    Update,
    /// `delete` command.
    Delete,
}

impl WriteKind {
    fn command_name(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    fn batch_field(self) -> &'static str {
        match self {
            Self::Insert => "documents",
            Self::Update => "updates",
            Self::Delete => "deletes",
        }
    }
}

impl WriteModel {
    /// The command family this model belongs to.
    pub fn kind(&self) -> WriteKind {
        match self {
            Self::Insert { .. } => WriteKind::Insert,
            Self::Update { .. } => WriteKind::Update,
            Self::Delete { .. } => WriteKind::Delete,
        }
    }

    fn to_statement(&self) -> Document {
        match self {
            Self::Insert { document } => document.clone(),
            Self::Update {
                filter,
                update,
                options,
            } => doc! {
                "q": filter.clone(),
                "u": update.clone(),
                "upsert": options.upsert,
                "multi": options.multi,
            },
            Self::Delete { filter, single } => doc! {
                "q": filter.clone(),
                "limit": if *single { 1 } else { 0 },
            },
        }
    }
}

/// An ordered batch of write models.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWrite {
    models: Vec<WriteModel>,
}

impl BulkWrite {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert.
    pub fn insert(&mut self, document: Document) -> &mut Self {
        self.models.push(WriteModel::Insert { document });
        self
    }

    /// Queue an update.
    pub fn update(&mut self, filter: Document, update: Document, options: UpdateOptions) -> &mut Self {
        self.models.push(WriteModel::Update {
            filter,
            update,
            options,
        });
        self
    }

    /// Queue a delete. `single` limits it to the first match.
    pub fn delete(&mut self, filter: Document, single: bool) -> &mut Self {
        self.models.push(WriteModel::Delete { filter, single });
        self
    }

    /// The queued models, in order.
    pub fn models(&self) -> &[WriteModel] {
        &self.models
    }

    /// Number of queued models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Translate the batch into write commands for `collection`.
    ///
    /// Consecutive models of the same kind share one command. Commands are
    /// ordered, so the server stops at the first rejected statement.
    pub fn to_commands(&self, collection: &str, write_concern: &WriteConcern) -> Vec<(WriteKind, Document)> {
        let mut commands: Vec<(WriteKind, Vec<Bson>)> = Vec::new();

        for model in &self.models {
            let kind = model.kind();
            let statement = Bson::Document(model.to_statement());
            match commands.last_mut() {
                Some((last, statements)) if *last == kind => statements.push(statement),
                _ => commands.push((kind, vec![statement])),
            }
        }

        commands
            .into_iter()
            .map(|(kind, statements)| {
                let mut command = Document::new();
                command.insert(kind.command_name(), collection);
                command.insert(kind.batch_field(), statements);
                command.insert("ordered", true);
                command.insert("writeConcern", write_concern.to_document());
                (kind, command)
            })
            .collect()
    }
}

/// Outcome of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteResult {
    /// Documents inserted.
    pub inserted_count: u64,
    /// Documents matched by update filters.
    pub matched_count: u64,
    /// Documents actually modified.
    pub modified_count: u64,
    /// Documents deleted.
    pub deleted_count: u64,
    /// Identifiers created by upserts.
    pub upserted_ids: Vec<Bson>,
    /// Identifiers of the inserted documents, in batch order.
    pub inserted_ids: Vec<Bson>,
}

impl WriteResult {
    /// Fold one write command reply into this result.
    ///
    /// Returns [`MongoError::Write`] when the reply lists rejected statements
    /// and [`MongoError::WriteConcern`] when durability was not confirmed;
    /// both carry everything accumulated so far.
    pub fn absorb_reply(&mut self, kind: WriteKind, reply: &Document) -> MongoResult<()> {
        if matches!(reply.get("ok"), Some(ok) if as_count(ok) == 0) {
            let message = reply.get_str("errmsg").unwrap_or("command failed");
            return Err(MongoError::query(message));
        }

        let n = reply.get("n").map(as_count).unwrap_or(0);
        match kind {
            WriteKind::Insert => self.inserted_count += n,
            WriteKind::Delete => self.deleted_count += n,
            WriteKind::Update => {
                let upserted = reply.get_array("upserted").map(Vec::len).unwrap_or(0) as u64;
                self.matched_count += n.saturating_sub(upserted);
                self.modified_count += reply.get("nModified").map(as_count).unwrap_or(0);
                if let Ok(entries) = reply.get_array("upserted") {
                    self.upserted_ids.extend(
                        entries
                            .iter()
                            .filter_map(Bson::as_document)
                            .filter_map(|entry| entry.get("_id").cloned()),
                    );
                }
            }
        }

        if let Some(first) = reply
            .get_array("writeErrors")
            .ok()
            .and_then(|errors| errors.first())
            .and_then(Bson::as_document)
        {
            return Err(MongoError::Write {
                message: first.get_str("errmsg").unwrap_or("write error").to_string(),
                result: Box::new(self.clone()),
            });
        }

        if let Ok(concern) = reply.get_document("writeConcernError") {
            return Err(MongoError::WriteConcern {
                message: concern
                    .get_str("errmsg")
                    .unwrap_or("write concern error")
                    .to_string(),
                result: Box::new(self.clone()),
            });
        }

        Ok(())
    }
}

fn as_count(value: &Bson) -> u64 {
    match value {
        Bson::Int32(n) => (*n).max(0) as u64,
        Bson::Int64(n) => (*n).max(0) as u64,
        Bson::Double(n) if *n > 0.0 => *n as u64,
        _ => 0,
    }
}
