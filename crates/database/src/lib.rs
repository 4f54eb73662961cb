//! Relational storage for binstore.
//!
//! This crate keeps binary payloads in a single database table:
//! - Dialect-scoped statement catalogs loaded from properties files
//! - Table creation and column limit discovery
//! - Content insertion, lookup, lifecycle and metadata operations
//! - Streaming readers that own the connection they were read from
//!
//! Connections are always supplied by the caller. The store never opens,
//! commits or rolls back anything on its own.

pub mod catalog;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod reader;
pub mod schema;
pub mod store;

pub use catalog::{StatementCatalog, StatementKey, StatementSources};
pub use connection::OwnedConnection;
pub use dialect::Dialect;
pub use error::{DatabaseError, DatabaseResult};
pub use reader::ContentReader;
pub use schema::{SchemaInitializer, TableStatus};
pub use store::ContentStore;
