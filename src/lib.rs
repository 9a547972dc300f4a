//! # Mortar
//!
//! A fluent query builder and command translator for MongoDB.
//!
//! Mortar provides:
//! - Chained filter predicates and update operators that accumulate in a
//!   single builder
//! - Terminal reads, bulk writes, aggregation and administrative commands
//!   with configured read/write concern
//! - Result normalization with optional legacy identifier wrapping
//! - Async-first design built on Tokio and the official MongoDB driver
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mortar::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MongoError> {
//!     let config = MongoConfigFile::from_file("mortar.toml")?.resolve(None)?;
//!     let mut db = QueryBuilder::connect(config).await?;
//!
//!     let open_orders = db
//!         .where_eq("status", "open")?
//!         .where_gte("total", 100)?
//!         .order_by(doc! { "created": "desc" })
//!         .limit(20)
//!         .get("orders")
//!         .result()
//!         .await?;
//!
//!     db.where_eq("status", "stale")?
//!         .set(("status", "archived"))
//!         .update_all("orders", Document::new(), UpdateOptions::new())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The MongoDB query builder.
pub mod mongodb {
    pub use mortar_mongodb::*;
}

/// Logging setup.
pub use mortar_mongodb::logging;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use mortar_mongodb::prelude::*;
}

// Re-export key types at the crate root
pub use mortar_mongodb::{
    MongoConfig, MongoConfigFile, MongoError, MongoResult, MongoSession, QueryBuilder, QueryOutput,
    Session,
};
