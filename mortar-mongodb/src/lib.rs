//! # mortar-mongodb
//!
//! A fluent query builder and command translator for MongoDB.
//!
//! This crate provides:
//! - A stateful [`QueryBuilder`] that accumulates filters, update operators,
//!   projection, sort order and paging across chained calls
//! - Translation of terminal calls into finds, bulk writes and database
//!   commands with the configured read/write concern and read preference
//! - Result normalization, including the legacy `{ "$id": "<hex>" }`
//!   identifier shape
//! - Configuration from code or from grouped TOML files
//!
//! ## Example
//!
//! ```rust,ignore
//! use mortar_mongodb::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MongoConfig::builder()
//!         .host("localhost")
//!         .database("shop")
//!         .build()?;
//!
//!     let mut db = QueryBuilder::connect(config).await?;
//!
//!     db.insert("users", doc! { "name": "Alice", "age": 30 }).await?;
//!
//!     let adults = db
//!         .where_gte("age", 18)?
//!         .get("users")
//!         .result()
//!         .await?;
//!     println!("{} adults", adults.count());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! The builder talks to the server only through the [`Session`] trait.
//! [`MongoSession`] implements it with the official driver; any other
//! implementation (for instance an in-memory recorder in tests) can be passed
//! to [`QueryBuilder::new`].

pub mod builder;
pub mod bulk;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod filter;
pub mod logging;
pub mod session;
pub mod types;
pub mod update;

pub use bson::oid::ObjectId;
pub use bson::{Bson, Document, doc};
pub use builder::{DEFAULT_LIMIT, QueryBuilder};
pub use bulk::{BulkWrite, UpdateOptions, WriteKind, WriteModel, WriteResult};
pub use client::MongoSession;
pub use config::{MongoConfig, MongoConfigBuilder, MongoConfigFile};
pub use document::QueryOutput;
pub use error::{ErrorKind, MongoError, MongoResult, Operation};
pub use filter::{FilterBuilder, LikeOptions};
pub use session::{ReadQuery, Session};
pub use types::{
    Namespace, ReadConcern, ReadPreference, ReturnAs, WriteConcern, WriteConcernLevel,
};
pub use update::{IntoFieldNames, IntoFieldValues, UpdateBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::QueryBuilder;
    pub use crate::bulk::{UpdateOptions, WriteResult};
    pub use crate::client::MongoSession;
    pub use crate::config::{MongoConfig, MongoConfigBuilder, MongoConfigFile};
    pub use crate::document::QueryOutput;
    pub use crate::error::{ErrorKind, MongoError, MongoResult};
    pub use crate::filter::LikeOptions;
    pub use crate::session::Session;
    pub use crate::types::{ReadConcern, ReadPreference, ReturnAs, WriteConcernLevel};
    pub use bson::oid::ObjectId;
    pub use bson::{Bson, Document, doc};
}
