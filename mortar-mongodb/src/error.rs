//! Error types for MongoDB operations.

use std::fmt;

use thiserror::Error;

use crate::bulk::WriteResult;

/// Result type for MongoDB operations.
pub type MongoResult<T> = Result<T, MongoError>;

/// Errors that can occur during MongoDB operations.
#[derive(Error, Debug)]
pub enum MongoError {
    /// A builder method was called with a missing or malformed argument.
    ///
    /// Always raised before anything is sent to the server.
    #[error("{0}")]
    Validation(String),

    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// BSON deserialization error.
    #[error("bson deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The write reached the server but did not satisfy the requested durability.
    #[error("{message}")]
    WriteConcern {
        /// Server supplied description.
        message: String,
        /// What the server reports as applied before the failure.
        result: Box<WriteResult>,
    },

    /// The server rejected one or more operations of a bulk write.
    #[error("{message}")]
    Write {
        /// Server supplied description of the first rejected operation.
        message: String,
        /// What the server reports as applied before the failure.
        result: Box<WriteResult>,
    },

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Document serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A terminal operation failed.
    ///
    /// The rendered message depends on `verbose`; the wrapped error is always
    /// available through [`std::error::Error::source`] and [`MongoError::kind`].
    #[error("{}", failure_message(*.operation, .source, *.verbose))]
    Failed {
        /// The operation that was running.
        operation: Operation,
        /// The underlying failure.
        source: Box<MongoError>,
        /// Whether the underlying detail is part of the message.
        verbose: bool,
    },
}

/// The terminal operation a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Establishing the session.
    Connect,
    /// Single document insert.
    Insert,
    /// Multi document insert.
    BatchInsert,
    /// Single or multi document update.
    Update,
    /// Single or multi document delete.
    Delete,
    /// Find or distinct.
    Read,
    /// Administrative command, aggregate and index administration.
    Command,
}

impl Operation {
    fn failure_text(self) -> &'static str {
        match self {
            Self::Connect => "Unable to connect to MongoDB",
            Self::Insert | Self::BatchInsert => "Insert of data into MongoDB failed",
            Self::Update => "Update of data into MongoDB failed",
            Self::Delete => "Delete of data into MongoDB failed",
            Self::Read | Self::Command => "MongoDB query failed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Insert => "insert",
            Self::BatchInsert => "batch_insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
            Self::Command => "command",
        };
        f.write_str(name)
    }
}

fn failure_message(operation: Operation, source: &MongoError, verbose: bool) -> String {
    let headline = match source.kind() {
        ErrorKind::WriteConcern => "WriteConcern failure",
        _ => operation.failure_text(),
    };

    if verbose {
        format!("{}: {}", headline, source)
    } else {
        headline.to_string()
    }
}

/// Coarse classification of a [`MongoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid builder usage; nothing was sent.
    Usage,
    /// The session could not be established or used.
    Connectivity,
    /// Write applied but durability was not confirmed.
    WriteConcern,
    /// The server rejected part of a write.
    Write,
    /// Any other failure reported by the driver or server.
    Driver,
}

impl MongoError {
    /// Create a validation (usage) error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Attribute this error to a terminal operation.
    ///
    /// Usage errors pass through untouched; they already carry a
    /// caller-facing message.
    pub fn during(self, operation: Operation, verbose: bool) -> Self {
        match self {
            Self::Validation(_) | Self::Failed { .. } => self,
            other => Self::Failed {
                operation,
                source: Box::new(other),
                verbose,
            },
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::Usage,
            Self::Connection(_) => ErrorKind::Connectivity,
            Self::WriteConcern { .. } => ErrorKind::WriteConcern,
            Self::Write { .. } => ErrorKind::Write,
            Self::Driver(e) => driver_kind(e),
            Self::Failed { source, .. } => source.kind(),
            Self::BsonDe(_) | Self::Query(_) | Self::Serialization(_) => ErrorKind::Driver,
        }
    }

    /// The operation a terminal failure is attributed to.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Failed { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// What a failed write managed to apply, when the server reported it.
    pub fn partial_result(&self) -> Option<&WriteResult> {
        match self {
            Self::WriteConcern { result, .. } | Self::Write { result, .. } => Some(result),
            Self::Failed { source, .. } => source.partial_result(),
            _ => None,
        }
    }

    /// Check if this is a usage error.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Usage
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }

    /// Check if this is a write concern error.
    pub fn is_write_concern(&self) -> bool {
        self.kind() == ErrorKind::WriteConcern
    }
}

fn driver_kind(err: &mongodb::error::Error) -> ErrorKind {
    use mongodb::error::ErrorKind as Driver;

    match err.kind.as_ref() {
        Driver::Authentication { .. }
        | Driver::ServerSelection { .. }
        | Driver::Io(_)
        | Driver::ConnectionPoolCleared { .. }
        | Driver::DnsResolve { .. } => ErrorKind::Connectivity,
        Driver::Write(mongodb::error::WriteFailure::WriteConcernError(_)) => {
            ErrorKind::WriteConcern
        }
        Driver::Write(_) | Driver::BulkWrite(_) => ErrorKind::Write,
        Driver::InvalidArgument { .. } => ErrorKind::Usage,
        _ => ErrorKind::Driver,
    }
}
