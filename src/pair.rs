//! Pairing - order-independent association of old and new record states.
//!
//! Bulk entry points receive "new" records in caller order and fetch "old"
//! (pre-write) rows from storage in whatever order the store returns them.
//! Pairing aligns the two by identity so that handler-visible old/new
//! sequences are parallel: index i always refers to the same logical record.

use std::collections::HashMap;

use crate::model::Model;

/// Align fetched old rows to the caller-supplied order of `new`.
///
/// The output has exactly `new.len()` entries, in `new`'s order, for any
/// permutation of `fetched_old`. Records with no resolvable identity (empty
/// id) and identities with no previously persisted row pair with None.
pub fn pair_records<M: Model>(new: &[M], fetched_old: Vec<M>) -> Vec<Option<M>> {
    let by_id: HashMap<String, M> = fetched_old
        .into_iter()
        .map(|record| (record.id().to_string(), record))
        .collect();

    new.iter()
        .map(|record| {
            if record.id().is_empty() {
                None
            } else {
                by_id.get(record.id()).cloned()
            }
        })
        .collect()
}
