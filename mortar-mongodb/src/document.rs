//! Result normalization and document conversion utilities.

use bson::{Bson, Document, oid::ObjectId};
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;

use crate::error::{MongoError, MongoResult};
use crate::types::ReturnAs;

/// Key under which the legacy wrapper exposes an identifier's hex string.
pub const LEGACY_ID_KEY: &str = "$id";

/// Output of a terminal read or command.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Loosely typed key/value maps.
    Documents(Vec<Document>),
    /// Record-like values, rendered as relaxed extended JSON objects.
    Records(Vec<serde_json::Value>),
    /// Number of matched documents, produced in count mode.
    Count(u64),
    /// Raw values, produced by distinct.
    Values(Vec<Bson>),
}

impl QueryOutput {
    /// Shape normalized documents as requested by the caller.
    pub fn shaped(documents: Vec<Document>, shape: ReturnAs) -> Self {
        match shape {
            ReturnAs::Array => Self::Documents(documents),
            ReturnAs::Object => Self::Records(
                documents
                    .into_iter()
                    .map(|doc| Bson::Document(doc).into_relaxed_extjson())
                    .collect(),
            ),
        }
    }

    /// Number of entries, or the count itself in count mode.
    pub fn count(&self) -> u64 {
        match self {
            Self::Documents(docs) => docs.len() as u64,
            Self::Records(records) => records.len() as u64,
            Self::Count(n) => *n,
            Self::Values(values) => values.len() as u64,
        }
    }

    /// Check if nothing was returned.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Take the documents out, if this output holds documents.
    pub fn into_documents(self) -> Option<Vec<Document>> {
        match self {
            Self::Documents(docs) => Some(docs),
            _ => None,
        }
    }

    /// Take the distinct values out, if this output holds values.
    pub fn into_values(self) -> Option<Vec<Bson>> {
        match self {
            Self::Values(values) => Some(values),
            _ => None,
        }
    }

    /// Deserialize every entry into `T`.
    pub fn deserialize<T: DeserializeOwned>(self) -> MongoResult<Vec<T>> {
        match self {
            Self::Documents(docs) => docs.into_iter().map(from_document).collect(),
            Self::Records(records) => records
                .into_iter()
                .map(|record| {
                    serde_json::from_value(record)
                        .map_err(|e| MongoError::serialization(e.to_string()))
                })
                .collect(),
            Self::Values(values) => values
                .into_iter()
                .map(|value| bson::from_bson(value).map_err(MongoError::from))
                .collect(),
            Self::Count(_) => Err(MongoError::serialization(
                "a count result has no entries to deserialize",
            )),
        }
    }
}

/// Rewrite a document's ObjectId `_id` as `{ "$id": "<hex>" }` when the
/// legacy policy is on. Other identifier types pass through unchanged.
pub fn convert_document_id(mut document: Document, legacy: bool) -> Document {
    if legacy {
        if let Ok(id) = document.get_object_id("_id") {
            let mut wrapper = Document::new();
            wrapper.insert(LEGACY_ID_KEY, id.to_hex());
            document.insert("_id", wrapper);
        }
    }
    document
}

/// Documents carried by a command reply.
///
/// A reply with `cursor.firstBatch` yields the batch; any other reply is a
/// single document.
pub fn cursor_documents(mut reply: Document) -> Vec<Document> {
    let batch = match reply.get_document_mut("cursor") {
        Ok(cursor) => cursor.remove("firstBatch"),
        Err(_) => None,
    };

    match batch {
        Some(Bson::Array(batch)) => batch
            .into_iter()
            .filter_map(|entry| match entry {
                Bson::Document(doc) => Some(doc),
                _ => None,
            })
            .collect(),
        _ => vec![reply],
    }
}

/// Ensure a document carries an `_id`, generating an ObjectId if absent.
///
/// Returns the identifier now stored in the document.
pub fn ensure_id(document: &mut Document) -> Bson {
    match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            document.insert("_id", id.clone());
            id
        }
    }
}

/// The current time, or the given epoch milliseconds, as a BSON date-time.
///
/// BSON date-times are UTC instants and carry no time zone, so none is
/// taken here. Render in a local zone with
/// `bson::DateTime::to_chrono().with_timezone(..)`.
pub fn timestamp(millis: Option<i64>) -> MongoResult<bson::DateTime> {
    match millis {
        None => Ok(bson::DateTime::from_chrono(Utc::now())),
        Some(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(bson::DateTime::from_chrono)
            .ok_or_else(|| MongoError::validation(format!("timestamp {} is out of range", ms))),
    }
}

/// Convert a BSON document to a struct.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> MongoResult<T> {
    Ok(bson::from_document(doc)?)
}
