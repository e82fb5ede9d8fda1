//! HookedRepository - the hook-aware write surface over a ModelStore.
//!
//! Every bulk entry point fires VALIDATE, then BEFORE, then delegates to the
//! store, then fires AFTER only on success. A VALIDATE/BEFORE failure
//! therefore aborts the operation with nothing written. Filter-level
//! `update`/`delete` and single-instance `save`/`delete_one` route through
//! the same bulk paths, so one set of hooks covers every way a record can
//! change.
//!
//! Hook visibility is whole-batch: `batch_size` chunks the physical store
//! writes only, and pairing, conditions, ordering, and handler invocation
//! are identical whether the write takes one chunk or many.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::dispatch::{DispatchEngine, OldRecordSource};
use crate::error::HookError;
use crate::event::Event;
use crate::model::{Model, ModelError, ModelStore};
use crate::registry::HookRegistry;

/// Default physical write chunk size.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Per-call switches for the bulk entry points.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Skip all hook phases. The write still happens.
    pub bypass_hooks: bool,
    /// Skip the VALIDATE phase only.
    pub bypass_validation: bool,
    /// Chunk size for the physical write.
    pub batch_size: usize,
    /// Free-form metadata handed to every handler through
    /// `HookContext::metadata` for this write.
    pub metadata: HashMap<String, Value>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            bypass_hooks: false,
            bypass_validation: false,
            batch_size: DEFAULT_BATCH_SIZE,
            metadata: HashMap::new(),
        }
    }
}

/// Hook-aware typed repository over a store.
///
/// Clones share the store handle and the dispatch engine, so a handler can
/// hold a clone and issue nested writes; the engine's in-flight guard keeps
/// those from re-firing hooks for records already mid-dispatch.
pub struct HookedRepository<S: ModelStore, M: Model> {
    store: S,
    engine: DispatchEngine<M>,
}

impl<S: ModelStore + Clone, M: Model> Clone for HookedRepository<S, M> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<S: ModelStore, M: Model> OldRecordSource<M> for HookedRepository<S, M> {
    fn fetch_current(&self, ids: &[&str]) -> Result<Vec<M>, HookError> {
        Ok(self.store.get_models::<M>(ids)?)
    }
}

impl<S: ModelStore, M: Model> HookedRepository<S, M> {
    pub fn new(store: S, registry: HookRegistry<M>) -> Self {
        Self {
            store,
            engine: DispatchEngine::new(registry),
        }
    }

    /// Build around an existing engine (shared in-flight state).
    pub fn with_engine(store: S, engine: DispatchEngine<M>) -> Self {
        Self { store, engine }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &DispatchEngine<M> {
        &self.engine
    }

    pub fn registry(&self) -> &HookRegistry<M> {
        self.engine.registry()
    }

    /// Insert a batch. Fires ValidateCreate, BeforeCreate, writes in
    /// chunks, then AfterCreate with the inserted records (identities
    /// assigned).
    pub fn bulk_create(&self, records: Vec<M>) -> Result<Vec<M>, HookError> {
        self.bulk_create_with(records, WriteOptions::default())
    }

    pub fn bulk_create_with(
        &self,
        mut records: Vec<M>,
        options: WriteOptions,
    ) -> Result<Vec<M>, HookError> {
        if records.is_empty() {
            return Ok(records);
        }

        if !options.bypass_hooks {
            if !options.bypass_validation {
                self.engine.fire_with_metadata(
                    Event::ValidateCreate,
                    &mut records,
                    None,
                    self,
                    &options.metadata,
                )?;
            }
            self.engine.fire_with_metadata(
                Event::BeforeCreate,
                &mut records,
                None,
                self,
                &options.metadata,
            )?;
        }

        let mut created = Vec::with_capacity(records.len());
        for chunk in records.chunks(options.batch_size.max(1)) {
            created.extend(self.store.insert_many(chunk)?);
        }

        if !options.bypass_hooks {
            self.engine.fire_with_metadata(
                Event::AfterCreate,
                &mut created,
                None,
                self,
                &options.metadata,
            )?;
        }
        Ok(created)
    }

    /// Update a batch, writing only `fields` (plus any fields a BEFORE
    /// handler modified, detected automatically). Old state is fetched once
    /// up front and shared across all three phases.
    pub fn bulk_update(&self, records: Vec<M>, fields: &[&str]) -> Result<Vec<M>, HookError> {
        self.bulk_update_with(records, fields, WriteOptions::default())
    }

    pub fn bulk_update_with(
        &self,
        mut records: Vec<M>,
        fields: &[&str],
        options: WriteOptions,
    ) -> Result<Vec<M>, HookError> {
        if records.is_empty() {
            return Ok(records);
        }

        let ids: Vec<&str> = records
            .iter()
            .map(|record| record.id())
            .filter(|id| !id.is_empty())
            .collect();
        let originals = self.store.get_models::<M>(&ids)?;

        let mut field_set: BTreeSet<String> =
            fields.iter().map(|field| field.to_string()).collect();

        if !options.bypass_hooks {
            if !options.bypass_validation {
                self.engine.fire_with_metadata(
                    Event::ValidateUpdate,
                    &mut records,
                    Some(originals.clone()),
                    self,
                    &options.metadata,
                )?;
            }
            self.engine.fire_with_metadata(
                Event::BeforeUpdate,
                &mut records,
                Some(originals.clone()),
                self,
                &options.metadata,
            )?;
            // BEFORE handlers may have set computed fields the caller did
            // not name; those changes must reach the write as well.
            field_set.extend(detect_modified_fields(&records, &originals));
        }

        let field_list: Vec<String> = field_set.into_iter().collect();
        for chunk in records.chunks(options.batch_size.max(1)) {
            self.store.update_fields_many(chunk, &field_list)?;
        }

        if !options.bypass_hooks {
            self.engine.fire_with_metadata(
                Event::AfterUpdate,
                &mut records,
                Some(originals),
                self,
                &options.metadata,
            )?;
        }
        Ok(records)
    }

    /// Delete a batch. Old state is captured before the rows disappear so
    /// AfterDelete handlers still see it.
    pub fn bulk_delete(&self, records: Vec<M>) -> Result<Vec<M>, HookError> {
        self.bulk_delete_with(records, WriteOptions::default())
    }

    pub fn bulk_delete_with(
        &self,
        mut records: Vec<M>,
        options: WriteOptions,
    ) -> Result<Vec<M>, HookError> {
        if records.is_empty() {
            return Ok(records);
        }

        // Owned ids: the id list outlives the hook firings, which borrow
        // the records mutably.
        let ids: Vec<String> = records
            .iter()
            .map(|record| record.id().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let originals = self.store.get_models::<M>(&id_refs)?;

        if !options.bypass_hooks {
            if !options.bypass_validation {
                self.engine.fire_with_metadata(
                    Event::ValidateDelete,
                    &mut records,
                    Some(originals.clone()),
                    self,
                    &options.metadata,
                )?;
            }
            self.engine.fire_with_metadata(
                Event::BeforeDelete,
                &mut records,
                Some(originals.clone()),
                self,
                &options.metadata,
            )?;
        }

        for chunk in id_refs.chunks(options.batch_size.max(1)) {
            self.store.delete_many::<M>(chunk)?;
        }

        if !options.bypass_hooks {
            self.engine.fire_with_metadata(
                Event::AfterDelete,
                &mut records,
                Some(originals),
                self,
                &options.metadata,
            )?;
        }
        Ok(records)
    }

    /// Filter-level update: load matching rows, apply the named field
    /// changes, and route through `bulk_update` so the full hook pipeline
    /// fires. Returns the number of records updated.
    pub fn update(
        &self,
        filter: impl Fn(&M) -> bool,
        changes: &[(&str, Value)],
    ) -> Result<usize, HookError> {
        let mut records: Vec<M> = self
            .store
            .find_models::<M>(&filter)?
            .into_iter()
            .map(|versioned| versioned.data)
            .collect();
        if records.is_empty() {
            return Ok(0);
        }

        for record in records.iter_mut() {
            apply_changes(record, changes)?;
        }

        let fields: Vec<&str> = changes.iter().map(|(field, _)| *field).collect();
        let count = records.len();
        self.bulk_update(records, &fields)?;
        Ok(count)
    }

    /// Filter-level delete through `bulk_delete`. Returns the number of
    /// records deleted.
    pub fn delete(&self, filter: impl Fn(&M) -> bool) -> Result<usize, HookError> {
        let records: Vec<M> = self
            .store
            .find_models::<M>(&filter)?
            .into_iter()
            .map(|versioned| versioned.data)
            .collect();
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();
        self.bulk_delete(records)?;
        Ok(count)
    }

    /// Single-instance save: routes to the CREATE or UPDATE pipeline.
    ///
    /// Create-vs-update is decided without an extra query when the record
    /// carries an explicit persistence flag; otherwise an empty identity
    /// means create, and a set identity falls back to an existence probe.
    pub fn save(&self, record: M) -> Result<M, HookError> {
        let is_new = match record.is_persisted() {
            Some(persisted) => !persisted,
            None => {
                record.id().is_empty() || self.store.get_model::<M>(record.id())?.is_none()
            }
        };

        let mut written = if is_new {
            self.bulk_create(vec![record])?
        } else {
            let fields = all_fields(&record)?;
            let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            self.bulk_update(vec![record], &field_refs)?
        };
        written
            .pop()
            .ok_or_else(|| ModelError::Storage("write returned an empty batch".into()).into())
    }

    /// Single-instance delete through the full DELETE pipeline. Returns the
    /// deleted record as the AFTER hooks saw it.
    pub fn delete_one(&self, record: M) -> Result<M, HookError> {
        let mut removed = self.bulk_delete(vec![record])?;
        removed
            .pop()
            .ok_or_else(|| ModelError::Storage("delete returned an empty batch".into()).into())
    }
}

/// Fields whose values differ between the (possibly hook-mutated) records
/// and their originals. Compared on JSON snapshots, so it works for any
/// model shape; records with no original are skipped.
fn detect_modified_fields<M: Model>(records: &[M], originals: &[M]) -> BTreeSet<String> {
    let paired = crate::pair::pair_records(records, originals.to_vec());
    let mut modified = BTreeSet::new();

    for (record, original) in records.iter().zip(paired.iter()) {
        let original = match original {
            Some(original) => original,
            None => continue,
        };
        let new_snap = match serde_json::to_value(record) {
            Ok(Value::Object(map)) => map,
            _ => continue,
        };
        let old_snap = match serde_json::to_value(original) {
            Ok(Value::Object(map)) => map,
            _ => continue,
        };
        for (field, value) in &new_snap {
            if old_snap.get(field) != Some(value) {
                modified.insert(field.clone());
            }
        }
    }
    modified
}

/// Set named top-level fields on a record via its JSON representation.
fn apply_changes<M: Model>(record: &mut M, changes: &[(&str, Value)]) -> Result<(), HookError> {
    let mut snap =
        serde_json::to_value(&*record).map_err(|e| ModelError::Serde(e.to_string()))?;
    if let Value::Object(map) = &mut snap {
        for (field, value) in changes {
            map.insert(field.to_string(), value.clone());
        }
    }
    *record = serde_json::from_value(snap).map_err(|e| ModelError::Serde(e.to_string()))?;
    Ok(())
}

/// Every top-level field name of a record, for whole-record saves.
fn all_fields<M: Model>(record: &M) -> Result<Vec<String>, HookError> {
    let snap = serde_json::to_value(record).map_err(|e| ModelError::Serde(e.to_string()))?;
    match snap {
        Value::Object(map) => Ok(map.keys().cloned().collect()),
        _ => Ok(Vec::new()),
    }
}
