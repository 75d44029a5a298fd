//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for imported mail:
//! a queryable metadata store (message records + sync cursors) and a
//! key-addressed content store (body documents + attachment bytes). The
//! trait-based design allows swapping between in-memory and persistent
//! backends.

mod content;
mod content_file;
mod memory;
mod sqlite;
mod traits;

pub use content::{ContentKey, ContentStore};
pub use content_file::FileContentStore;
pub use memory::{InMemoryContentStore, InMemoryMetadataStore};
pub use sqlite::SqliteMetadataStore;
pub use traits::MetadataStore;
