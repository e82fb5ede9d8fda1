//! HookRegistry - per-model registration table for lifecycle hooks.
//!
//! Registrations are made at setup time (before any write traffic) and are
//! effectively read-only during dispatch. The registry is Arc-shared so a
//! repository, a dispatch engine, and a test can all hold the same table;
//! `reset` exists for test isolation.

use std::sync::{Arc, RwLock};

use crate::condition::Condition;
use crate::context::HookContext;
use crate::error::{BoxError, HookError};
use crate::event::Event;
use crate::model::Model;

/// Priority assigned when a registration does not specify one.
/// Lower priorities run first.
pub const DEFAULT_PRIORITY: i32 = 50;

/// A hook handler: invoked once per firing with the matched records as two
/// parallel, equal-length sequences. `new` may be mutated in place during
/// BEFORE phases; mutations reach the physical write.
pub trait Hook<M: Model>: Send + Sync {
    fn call(&self, new: &mut [M], old: &[Option<M>], ctx: &HookContext) -> Result<(), BoxError>;
}

impl<M, F> Hook<M> for F
where
    M: Model,
    F: Fn(&mut [M], &[Option<M>], &HookContext) -> Result<(), BoxError> + Send + Sync,
{
    fn call(&self, new: &mut [M], old: &[Option<M>], ctx: &HookContext) -> Result<(), BoxError> {
        self(new, old, ctx)
    }
}

/// One registered handler for one event. Immutable once registered.
#[derive(Clone)]
pub struct HookRegistration<M: Model> {
    event: Event,
    key: String,
    hook: Arc<dyn Hook<M>>,
    condition: Option<Condition>,
    priority: i32,
    seq: usize,
}

impl<M: Model> HookRegistration<M> {
    pub fn event(&self) -> Event {
        self.event
    }

    /// Stable handler identity, e.g. `"AccountHooks::validate_balance"`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn invoke(
        &self,
        new: &mut [M],
        old: &[Option<M>],
        ctx: &HookContext,
    ) -> Result<(), BoxError> {
        self.hook.call(new, old, ctx)
    }
}

struct Inner<M: Model> {
    hooks: Vec<HookRegistration<M>>,
    next_seq: usize,
}

/// Process-lifetime registration table for one model type.
pub struct HookRegistry<M: Model> {
    inner: Arc<RwLock<Inner<M>>>,
}

impl<M: Model> Clone for HookRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Model> Default for HookRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> HookRegistry<M> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                hooks: Vec::new(),
                next_seq: 0,
            })),
        }
    }

    /// Store a registration. Registering the same (event, key, condition)
    /// triple twice is a no-op, so stacking the same marker accidentally
    /// never double-fires a handler.
    pub fn register(
        &self,
        event: Event,
        key: impl Into<String>,
        hook: Arc<dyn Hook<M>>,
        condition: Option<Condition>,
        priority: i32,
    ) -> Result<(), HookError> {
        let key = key.into();
        let mut inner = self
            .inner
            .write()
            .map_err(|_| HookError::configuration("hook registry lock poisoned"))?;

        let duplicate = inner.hooks.iter().any(|existing| {
            existing.event == event
                && existing.key == key
                && condition_identity(&existing.condition) == condition_identity(&condition)
        });
        if duplicate {
            return Ok(());
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.hooks.push(HookRegistration {
            event,
            key,
            hook,
            condition,
            priority,
            seq,
        });
        Ok(())
    }

    /// Convenience for registering a closure handler.
    pub fn register_fn<F>(
        &self,
        event: Event,
        key: impl Into<String>,
        condition: Option<Condition>,
        priority: i32,
        handler: F,
    ) -> Result<(), HookError>
    where
        F: Fn(&mut [M], &[Option<M>], &HookContext) -> Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.register(event, key, Arc::new(handler), condition, priority)
    }

    /// Registrations for an event, sorted by (priority ascending,
    /// registration order ascending) for deterministic dispatch.
    pub fn get(&self, event: Event) -> Result<Vec<HookRegistration<M>>, HookError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| HookError::configuration("hook registry lock poisoned"))?;

        let mut matching: Vec<HookRegistration<M>> = inner
            .hooks
            .iter()
            .filter(|r| r.event == event)
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.priority, r.seq));
        Ok(matching)
    }

    /// Total registration count across all events.
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.hooks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration. Test isolation only; registrations are
    /// never removed during normal operation.
    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.hooks.clear();
            inner.next_seq = 0;
        }
    }
}

fn condition_identity(condition: &Option<Condition>) -> String {
    match condition {
        Some(c) => c.identity(),
        None => String::new(),
    }
}

/// A set of hooks registered together, typically generated by the
/// `bulk_hooks::hooks!` macro over a handler struct. The handler instance
/// is supplied explicitly, so dependency-injected handlers construct
/// themselves however they like before wiring.
pub trait HookSet<M: Model>: Send + Sync + Sized {
    fn register_all(handler: Arc<Self>, registry: &HookRegistry<M>) -> Result<(), HookError>;
}
