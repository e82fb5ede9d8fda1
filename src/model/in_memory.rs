//! InMemoryModelStore - HashMap-backed model store for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::{Model, ModelError, ModelStore, Versioned};

/// Internal stored representation of a record.
struct StoredModel {
    bytes: Vec<u8>,
    version: u64,
}

/// In-memory model store backed by a HashMap.
///
/// Storage key is `"COLLECTION:id"`. Clone-friendly via Arc. Records
/// inserted without an identity get a generated sequential one.
#[derive(Clone)]
pub struct InMemoryModelStore {
    storage: Arc<RwLock<HashMap<String, StoredModel>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for InMemoryModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryModelStore {
    /// Create a new empty model store.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn make_key(collection: &str, id: &str) -> String {
        format!("{}:{}", collection, id)
    }

    fn generate_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

impl ModelStore for InMemoryModelStore {
    fn get_model<M: Model>(&self, id: &str) -> Result<Option<Versioned<M>>, ModelError> {
        let key = Self::make_key(M::COLLECTION, id);
        let storage = self
            .storage
            .read()
            .map_err(|_| ModelError::Storage("lock poisoned".into()))?;

        match storage.get(&key) {
            Some(stored) => {
                let data: M = serde_json::from_slice(&stored.bytes)
                    .map_err(|e| ModelError::Serde(e.to_string()))?;
                Ok(Some(Versioned {
                    data,
                    version: stored.version,
                }))
            }
            None => Ok(None),
        }
    }

    fn get_models<M: Model>(&self, ids: &[&str]) -> Result<Vec<M>, ModelError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| ModelError::Storage("lock poisoned".into()))?;

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let key = Self::make_key(M::COLLECTION, id);
            if let Some(stored) = storage.get(&key) {
                let data: M = serde_json::from_slice(&stored.bytes)
                    .map_err(|e| ModelError::Serde(e.to_string()))?;
                results.push(data);
            }
        }
        Ok(results)
    }

    fn insert_many<M: Model>(&self, records: &[M]) -> Result<Vec<M>, ModelError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| ModelError::Storage("lock poisoned".into()))?;

        let mut prepared: Vec<M> = Vec::with_capacity(records.len());
        for record in records {
            let mut record = record.clone();
            if record.id().is_empty() {
                record.set_id(self.generate_id());
            }
            let key = Self::make_key(M::COLLECTION, record.id());
            if storage.contains_key(&key) {
                return Err(ModelError::AlreadyExists {
                    collection: M::COLLECTION.to_string(),
                    id: record.id().to_string(),
                });
            }
            prepared.push(record);
        }

        // Conflict checks passed for the whole batch; now write.
        for record in &prepared {
            let bytes =
                serde_json::to_vec(record).map_err(|e| ModelError::Serde(e.to_string()))?;
            storage.insert(
                Self::make_key(M::COLLECTION, record.id()),
                StoredModel { bytes, version: 1 },
            );
        }

        Ok(prepared)
    }

    fn update_fields_many<M: Model>(
        &self,
        records: &[M],
        fields: &[String],
    ) -> Result<usize, ModelError> {
        if fields.is_empty() {
            return Ok(0);
        }

        let mut storage = self
            .storage
            .write()
            .map_err(|_| ModelError::Storage("lock poisoned".into()))?;

        let mut written = 0;
        for record in records {
            if record.id().is_empty() {
                continue;
            }
            let key = Self::make_key(M::COLLECTION, record.id());
            let stored = match storage.get(&key) {
                Some(stored) => stored,
                None => continue,
            };

            let mut row: Value = serde_json::from_slice(&stored.bytes)
                .map_err(|e| ModelError::Serde(e.to_string()))?;
            let incoming = serde_json::to_value(record)
                .map_err(|e| ModelError::Serde(e.to_string()))?;

            if let (Value::Object(row_map), Value::Object(incoming_map)) =
                (&mut row, &incoming)
            {
                for field in fields {
                    if let Some(value) = incoming_map.get(field) {
                        row_map.insert(field.clone(), value.clone());
                    }
                }
            }

            let bytes =
                serde_json::to_vec(&row).map_err(|e| ModelError::Serde(e.to_string()))?;
            let version = stored.version + 1;
            storage.insert(key, StoredModel { bytes, version });
            written += 1;
        }

        Ok(written)
    }

    fn delete_many<M: Model>(&self, ids: &[&str]) -> Result<usize, ModelError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| ModelError::Storage("lock poisoned".into()))?;

        let mut removed = 0;
        for id in ids {
            let key = Self::make_key(M::COLLECTION, id);
            if storage.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn find_models<M: Model>(
        &self,
        predicate: &dyn Fn(&M) -> bool,
    ) -> Result<Vec<Versioned<M>>, ModelError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| ModelError::Storage("lock poisoned".into()))?;

        let prefix = format!("{}:", M::COLLECTION);
        let mut results = Vec::new();

        for (key, stored) in storage.iter() {
            if key.starts_with(&prefix) {
                if let Ok(data) = serde_json::from_slice::<M>(&stored.bytes) {
                    if predicate(&data) {
                        results.push(Versioned {
                            data,
                            version: stored.version,
                        });
                    }
                }
            }
        }

        Ok(results)
    }
}
