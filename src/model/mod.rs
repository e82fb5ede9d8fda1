//! Models - Storage-backed records that bulk writes and hooks operate on.
//!
//! A `Model` is a serde-serializable record with a collection name and a
//! string identity. The `ModelStore` trait abstracts the persistence layer
//! the hook-aware repository writes through; `InMemoryModelStore` is a
//! HashMap-backed implementation for testing and development.
//!
//! ## Example
//!
//! ```ignore
//! use bulk_hooks::{HookModel, InMemoryModelStore};
//!
//! #[derive(Clone, Serialize, Deserialize, HookModel)]
//! #[hook_model(collection = "accounts")]
//! struct Account {
//!     pub id: String,
//!     pub balance: i64,
//! }
//!
//! let store = InMemoryModelStore::new();
//! store.insert_many(&[account])?;
//! ```

mod in_memory;
mod store;

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Trait for record types that can be stored and hooked.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The collection name for this model type (e.g., "accounts").
    /// Maps to a table in SQL, a collection in MongoDB, a key prefix in KV
    /// stores, etc.
    const COLLECTION: &'static str;

    /// Returns the unique identifier for this record. An empty string means
    /// the record has no persisted identity yet (a CREATE-shaped record).
    fn id(&self) -> &str;

    /// Assigns an identity. Called by stores that generate keys on insert.
    fn set_id(&mut self, id: String);

    /// Explicit persistence flag, when the record carries one. `None` means
    /// unknown; the save path then falls back to an identity check plus an
    /// existence probe.
    fn is_persisted(&self) -> Option<bool> {
        None
    }
}

/// A versioned wrapper around record data for optimistic concurrency control.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub data: T,
    pub version: u64,
}

/// Error type for model store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Insert collided with an existing row.
    AlreadyExists { collection: String, id: String },
    /// Serialization/deserialization error.
    Serde(String),
    /// Storage-level error.
    Storage(String),
    /// Record not found.
    NotFound { collection: String, id: String },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::AlreadyExists { collection, id } => {
                write!(f, "record already exists: {}:{}", collection, id)
            }
            ModelError::Serde(msg) => write!(f, "model serialization error: {}", msg),
            ModelError::Storage(msg) => write!(f, "model storage error: {}", msg),
            ModelError::NotFound { collection, id } => {
                write!(f, "record not found: {}:{}", collection, id)
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub use in_memory::InMemoryModelStore;
pub use store::ModelStore;
