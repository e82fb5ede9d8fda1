//! DispatchEngine - orchestrates one hook firing for one event and batch.
//!
//! For a `fire` call the engine resolves registrations, pairs old/new
//! states, filters records per-registration through conditions, and invokes
//! handlers in (priority, registration order) with the matched records as
//! parallel sequences. Records already mid-dispatch in an outer call are
//! excluded via an in-flight guard, so a handler that triggers a nested
//! write on the same model never re-fires the same event for the same
//! records.
//!
//! The engine performs no I/O except the one old-record fetch, delegated to
//! its host through [`OldRecordSource`]. Transaction boundaries belong to
//! the host: the repository arranges for VALIDATE/BEFORE to run before the
//! physical write and AFTER only once it succeeded.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, trace};

use crate::condition::snapshot;
use crate::context::HookContext;
use crate::error::HookError;
use crate::event::Event;
use crate::model::Model;
use crate::pair::pair_records;
use crate::registry::HookRegistry;

/// The engine's one external collaborator: fetches current persisted state
/// for the given identities when the host did not supply old records.
pub trait OldRecordSource<M: Model> {
    fn fetch_current(&self, ids: &[&str]) -> Result<Vec<M>, HookError>;
}

/// Source for dispatches that never need old state (CREATE-only firing).
pub struct NoOldRecords;

impl<M: Model> OldRecordSource<M> for NoOldRecords {
    fn fetch_current(&self, _ids: &[&str]) -> Result<Vec<M>, HookError> {
        Ok(Vec::new())
    }
}

/// Dispatches hook firings for one model type.
///
/// Cheap to clone; clones share the registry and the in-flight guard, which
/// is what makes nested dispatch from inside a handler observable.
pub struct DispatchEngine<M: Model> {
    registry: HookRegistry<M>,
    in_flight: Arc<Mutex<HashSet<(Event, String)>>>,
}

impl<M: Model> Clone for DispatchEngine<M> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<M: Model> DispatchEngine<M> {
    pub fn new(registry: HookRegistry<M>) -> Self {
        Self {
            registry,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> &HookRegistry<M> {
        &self.registry
    }

    /// Fire one event for one batch.
    ///
    /// `old` carries pre-fetched old rows in any order; when `None` and the
    /// event's operation needs old state (UPDATE/DELETE), the engine fetches
    /// through `source`. Models with no registrations for `event` return
    /// immediately, before any fetch.
    ///
    /// Handlers run in (priority, registration order); each sees only the
    /// records its condition matched, as parallel old/new sequences, and may
    /// mutate `new` elements in place. Mutations are written back to the
    /// caller's batch and are visible to later handlers' conditions in the
    /// same firing.
    pub fn fire(
        &self,
        event: Event,
        new: &mut [M],
        old: Option<Vec<M>>,
        source: &dyn OldRecordSource<M>,
    ) -> Result<(), HookError> {
        self.fire_with_metadata(event, new, old, source, &HashMap::new())
    }

    /// Like [`DispatchEngine::fire`], with caller-supplied metadata made
    /// available to every handler through `HookContext::metadata`.
    pub fn fire_with_metadata(
        &self,
        event: Event,
        new: &mut [M],
        old: Option<Vec<M>>,
        source: &dyn OldRecordSource<M>,
        metadata: &HashMap<String, Value>,
    ) -> Result<(), HookError> {
        let registrations = self.registry.get(event)?;
        if registrations.is_empty() || new.is_empty() {
            return Ok(());
        }

        let fetched = match old {
            Some(rows) => rows,
            None if event.operation().needs_old() => {
                let ids: Vec<&str> = new
                    .iter()
                    .map(|record| record.id())
                    .filter(|id| !id.is_empty())
                    .collect();
                source.fetch_current(&ids)?
            }
            None => Vec::new(),
        };

        let old_paired = pair_records(new, fetched);
        let old_snaps: Vec<Option<Value>> =
            old_paired.iter().map(|o| o.as_ref().map(snapshot)).collect();

        let (guard, admitted) = InFlightGuard::claim(&self.in_flight, event, new);
        if !admitted.iter().any(|&a| a) {
            trace!(event = %event, "entire batch already mid-dispatch, skipping");
            return Ok(());
        }
        debug!(
            event = %event,
            batch = new.len(),
            hooks = registrations.len(),
            "dispatching"
        );

        let ctx = HookContext::new(event, M::COLLECTION).with_metadata(metadata.clone());

        for registration in &registrations {
            // Snapshots are taken fresh per registration so a later
            // handler's condition sees an earlier handler's mutations.
            let matched: Vec<usize> = (0..new.len())
                .filter(|&i| {
                    admitted[i]
                        && match registration.condition() {
                            Some(condition) => {
                                condition.evaluate(&snapshot(&new[i]), old_snaps[i].as_ref())
                            }
                            None => true,
                        }
                })
                .collect();

            if matched.is_empty() {
                trace!(event = %event, hook = registration.key(), "no records matched");
                continue;
            }

            let mut sub_new: Vec<M> = matched.iter().map(|&i| new[i].clone()).collect();
            let sub_old: Vec<Option<M>> =
                matched.iter().map(|&i| old_paired[i].clone()).collect();

            registration
                .invoke(&mut sub_new, &sub_old, &ctx)
                .map_err(|err| HookError::from_handler(registration.key(), err))?;

            for (i, updated) in matched.into_iter().zip(sub_new.into_iter()) {
                new[i] = updated;
            }
        }

        drop(guard);
        Ok(())
    }
}

/// Scoped claim on (event, record identity) pairs. Claims are released on
/// drop, which covers every exit path out of `fire`, handler errors
/// included.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<(Event, String)>>>,
    claimed: Vec<(Event, String)>,
}

impl InFlightGuard {
    fn claim<M: Model>(
        set: &Arc<Mutex<HashSet<(Event, String)>>>,
        event: Event,
        new: &[M],
    ) -> (InFlightGuard, Vec<bool>) {
        let mut admitted = vec![false; new.len()];
        let mut claimed: Vec<(Event, String)> = Vec::new();

        match set.lock() {
            Ok(mut in_flight) => {
                for (i, record) in new.iter().enumerate() {
                    let id = record.id();
                    if id.is_empty() {
                        // No identity to guard on.
                        admitted[i] = true;
                        continue;
                    }
                    let key = (event, id.to_string());
                    if in_flight.insert(key.clone()) {
                        admitted[i] = true;
                        claimed.push(key);
                    } else if claimed.contains(&key) {
                        // Duplicate identity within this same batch.
                        admitted[i] = true;
                    }
                }
            }
            Err(_) => {
                // Guard state unusable; dispatch everything rather than
                // silently dropping hooks.
                admitted.iter_mut().for_each(|a| *a = true);
            }
        }

        (
            InFlightGuard {
                set: set.clone(),
                claimed,
            },
            admitted,
        )
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.set.lock() {
            for key in &self.claimed {
                in_flight.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::error::BoxError;
    use crate::registry::DEFAULT_PRIORITY;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: String,
        balance: i64,
        status: String,
    }

    impl Model for Account {
        const COLLECTION: &'static str = "accounts";
        fn id(&self) -> &str {
            &self.id
        }
        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    fn account(id: &str, balance: i64, status: &str) -> Account {
        Account {
            id: id.into(),
            balance,
            status: status.into(),
        }
    }

    /// Source that counts fetches and serves a fixed set of rows.
    struct FixedSource {
        rows: Vec<Account>,
        fetches: AtomicUsize,
    }

    impl FixedSource {
        fn new(rows: Vec<Account>) -> Self {
            Self {
                rows,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    impl OldRecordSource<Account> for FixedSource {
        fn fetch_current(&self, ids: &[&str]) -> Result<Vec<Account>, HookError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rows
                .iter()
                .filter(|row| ids.contains(&row.id()))
                .cloned()
                .collect())
        }
    }

    fn engine() -> DispatchEngine<Account> {
        DispatchEngine::new(HookRegistry::new())
    }

    #[test]
    fn unhooked_event_returns_before_any_fetch() {
        let engine = engine();
        let source = FixedSource::new(vec![account("1", 5, "active")]);
        let mut batch = vec![account("1", 7, "active")];

        engine
            .fire(Event::BeforeUpdate, &mut batch, None, &source)
            .unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn engine_fetches_old_state_when_not_supplied() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        engine
            .registry()
            .register_fn(
                Event::BeforeUpdate,
                "t::record_old",
                None,
                DEFAULT_PRIORITY,
                move |new: &mut [Account], old: &[Option<Account>], _ctx: &HookContext| {
                    assert_eq!(new.len(), old.len());
                    seen_hook
                        .lock()
                        .unwrap()
                        .extend(old.iter().map(|o| o.as_ref().map(|a| a.balance)));
                    Ok(())
                },
            )
            .unwrap();

        let source = FixedSource::new(vec![account("1", 5, "active")]);
        let mut batch = vec![account("1", 7, "active")];
        engine
            .fire(Event::BeforeUpdate, &mut batch, None, &source)
            .unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![Some(5)]);
    }

    #[test]
    fn handlers_see_only_matched_records_in_input_order() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        engine
            .registry()
            .register_fn(
                Event::BeforeUpdate,
                "t::active_only",
                Some(Condition::equals("status", "active")),
                DEFAULT_PRIORITY,
                move |new: &mut [Account], old: &[Option<Account>], _ctx: &HookContext| {
                    assert_eq!(new.len(), old.len());
                    seen_hook
                        .lock()
                        .unwrap()
                        .extend(new.iter().map(|a| a.id.clone()));
                    Ok(())
                },
            )
            .unwrap();

        let mut batch = vec![
            account("3", 1, "active"),
            account("1", 2, "closed"),
            account("2", 3, "active"),
        ];
        let old = vec![
            account("1", 2, "closed"),
            account("2", 3, "active"),
            account("3", 1, "active"),
        ];
        engine
            .fire(Event::BeforeUpdate, &mut batch, Some(old), &NoOldRecords)
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["3", "2"]);
    }

    #[test]
    fn priority_one_runs_before_priority_ten() {
        let engine = engine();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_late = order.clone();
        engine
            .registry()
            .register_fn(
                Event::AfterCreate,
                "t::late",
                None,
                10,
                move |_new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    order_late.lock().unwrap().push("late");
                    Ok(())
                },
            )
            .unwrap();
        let order_early = order.clone();
        engine
            .registry()
            .register_fn(
                Event::AfterCreate,
                "t::early",
                None,
                1,
                move |_new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    order_early.lock().unwrap().push("early");
                    Ok(())
                },
            )
            .unwrap();

        let mut batch = vec![account("1", 0, "new")];
        engine
            .fire(Event::AfterCreate, &mut batch, None, &NoOldRecords)
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["early", "late"]);
    }

    #[test]
    fn before_mutations_reach_the_caller_and_later_conditions() {
        let engine = engine();
        engine
            .registry()
            .register_fn(
                Event::BeforeUpdate,
                "t::promote",
                None,
                1,
                |new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    for record in new.iter_mut() {
                        record.status = "premium".into();
                    }
                    Ok(())
                },
            )
            .unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_hook = fired.clone();
        engine
            .registry()
            .register_fn(
                Event::BeforeUpdate,
                "t::sees_promotion",
                Some(Condition::equals("status", "premium")),
                10,
                move |_new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    fired_hook.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();

        let mut batch = vec![account("1", 5, "basic")];
        let old = vec![account("1", 5, "basic")];
        engine
            .fire(Event::BeforeUpdate, &mut batch, Some(old), &NoOldRecords)
            .unwrap();

        assert_eq!(batch[0].status, "premium");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn validation_error_aborts_remaining_handlers() {
        let engine = engine();
        engine
            .registry()
            .register_fn(
                Event::ValidateCreate,
                "t::reject",
                None,
                1,
                |_new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    Err(Box::new(HookError::validation("balance below zero")) as BoxError)
                },
            )
            .unwrap();
        let reached = Arc::new(AtomicUsize::new(0));
        let reached_hook = reached.clone();
        engine
            .registry()
            .register_fn(
                Event::ValidateCreate,
                "t::never",
                None,
                10,
                move |_new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    reached_hook.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();

        let mut batch = vec![account("", -1, "new")];
        let err = engine
            .fire(Event::ValidateCreate, &mut batch, None, &NoOldRecords)
            .unwrap_err();

        assert!(matches!(err, HookError::Validation { .. }));
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_fire_for_records_mid_dispatch_is_skipped() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_hook = calls.clone();
        let nested_engine = engine.clone();
        engine
            .registry()
            .register_fn(
                Event::BeforeUpdate,
                "t::reentrant",
                None,
                DEFAULT_PRIORITY,
                move |new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    calls_hook.fetch_add(1, Ordering::SeqCst);
                    // A handler triggering a nested write on the same
                    // records must not re-fire this same hook.
                    let mut nested: Vec<Account> = new.to_vec();
                    let old: Vec<Account> = new.to_vec();
                    nested_engine.fire(Event::BeforeUpdate, &mut nested, Some(old), &NoOldRecords)?;
                    Ok(())
                },
            )
            .unwrap();

        let mut batch = vec![account("1", 5, "active")];
        let old = vec![account("1", 5, "active")];
        engine
            .fire(Event::BeforeUpdate, &mut batch, Some(old), &NoOldRecords)
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn in_flight_claims_release_after_fire_even_on_error() {
        let engine = engine();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_hook = attempts.clone();
        engine
            .registry()
            .register_fn(
                Event::BeforeDelete,
                "t::fail_once",
                None,
                DEFAULT_PRIORITY,
                move |_new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    if attempts_hook.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("transient".into())
                    } else {
                        Ok(())
                    }
                },
            )
            .unwrap();

        let old = vec![account("1", 5, "active")];
        let mut batch = vec![account("1", 5, "active")];
        let err = engine
            .fire(
                Event::BeforeDelete,
                &mut batch,
                Some(old.clone()),
                &NoOldRecords,
            )
            .unwrap_err();
        assert!(matches!(err, HookError::Handler { .. }));

        // Claims released: the same records dispatch again.
        engine
            .fire(Event::BeforeDelete, &mut batch, Some(old), &NoOldRecords)
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn repeat_firing_is_idempotent() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        engine
            .registry()
            .register_fn(
                Event::AfterUpdate,
                "t::trace",
                Some(Condition::changed("balance")),
                DEFAULT_PRIORITY,
                move |new: &mut [Account], _old: &[Option<Account>], _ctx: &HookContext| {
                    seen_hook
                        .lock()
                        .unwrap()
                        .push(new.iter().map(|a| a.id.clone()).collect::<Vec<_>>());
                    Ok(())
                },
            )
            .unwrap();

        let old = vec![account("1", 5, "active"), account("2", 9, "active")];
        for _ in 0..2 {
            let mut batch = vec![account("1", 7, "active"), account("2", 9, "active")];
            engine
                .fire(
                    Event::AfterUpdate,
                    &mut batch,
                    Some(old.clone()),
                    &NoOldRecords,
                )
                .unwrap();
        }

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert_eq!(calls[0], vec!["1"]);
    }
}
