//! Core domain types for binstore, a content-addressed binary store backed
//! by a relational database.
//!
//! This crate defines the data model shared by the storage crates:
//! - Content keys derived from payload hashes
//! - Record lifecycle state (active, unused, deleted)
//! - Store configuration

pub mod config;
pub mod error;
pub mod key;
pub mod record;

pub use config::{ProbeStrictness, StoreConfig};
pub use error::{Error, Result};
pub use key::{ContentKey, ContentKeyHasher};
pub use record::RecordState;
