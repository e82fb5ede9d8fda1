//! ModelStore - Abstract bulk-capable storage for models.

use super::{Model, ModelError, Versioned};

/// Abstract storage the hook-aware repository writes through.
///
/// The repository drives hook phases around these calls; implementations
/// only move bytes. `insert_many` must reject every record before writing
/// any, so a conflicting batch persists nothing.
pub trait ModelStore: Send + Sync {
    /// Get a record by ID. Returns None if not found.
    fn get_model<M: Model>(&self, id: &str) -> Result<Option<Versioned<M>>, ModelError>;

    /// Fetch the current persisted state for the given IDs. Missing IDs are
    /// skipped; the result order is unspecified (callers pair by identity,
    /// never by position).
    fn get_models<M: Model>(&self, ids: &[&str]) -> Result<Vec<M>, ModelError>;

    /// Insert a batch of records. Records without an identity are assigned
    /// a generated one. Returns the inserted records, identities included.
    fn insert_many<M: Model>(&self, records: &[M]) -> Result<Vec<M>, ModelError>;

    /// Apply only the named top-level fields of each record over its stored
    /// row. Rows that no longer exist are skipped. Returns the number of
    /// rows written.
    fn update_fields_many<M: Model>(
        &self,
        records: &[M],
        fields: &[String],
    ) -> Result<usize, ModelError>;

    /// Delete records by ID. Returns the number of rows that existed.
    fn delete_many<M: Model>(&self, ids: &[&str]) -> Result<usize, ModelError>;

    /// Find records matching a predicate.
    fn find_models<M: Model>(
        &self,
        predicate: &dyn Fn(&M) -> bool,
    ) -> Result<Vec<Versioned<M>>, ModelError>;
}
