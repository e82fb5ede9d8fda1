//! Conditions - predicate trees over paired (old, new) record states.
//!
//! A condition decides, per record, whether a hook handler applies. Leaves
//! close over a dotted field path (see [`path`]) and a comparison; trees
//! compose with `and`/`or`/`negate` (or the `&`, `|`, `!` operators).
//! Records are snapshotted to `serde_json::Value` for evaluation, so
//! related-object traversal works uniformly and absence never panics.
//!
//! Evaluation never fails: a condition that cannot be resolved against a
//! record is false, and the record is simply excluded from the handler's
//! batch.

pub mod path;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::model::Model;

/// Arbitrary predicate over the (new, old) record snapshots.
pub type Predicate = Arc<dyn Fn(&Value, Option<&Value>) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Condition {
    /// New value at `path` equals `value`.
    Equals { path: String, value: Value },
    /// New value at `path` resolves and differs from `value`.
    NotEquals { path: String, value: Value },
    /// Old value at `path` equals `value`. False for CREATE pairs.
    WasEqual { path: String, value: Value },
    /// Value at `path` differs between old and new. For CREATE pairs the
    /// result is `on_create` (default false: creation is not a change).
    Changed { path: String, on_create: bool },
    /// Value at `path` changed and the new value equals `value`.
    ChangesTo { path: String, value: Value },
    /// New value at `path` compares against `value` with one of the
    /// orderings in `accept`. Non-comparable values are false.
    Compare {
        path: String,
        value: Value,
        accept: &'static [Ordering],
    },
    /// Escape hatch: arbitrary predicate over the snapshots.
    Custom(Predicate),
    /// All branches hold (short-circuits left to right).
    All(Vec<Condition>),
    /// Any branch holds (short-circuits left to right).
    Any(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
}

impl Condition {
    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::NotEquals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn was_equal(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::WasEqual {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Field changed between old and new. On CREATE pairs this is false;
    /// see [`Condition::changed_treating_create`] to opt in.
    pub fn changed(path: impl Into<String>) -> Self {
        Condition::Changed {
            path: path.into(),
            on_create: false,
        }
    }

    /// Like [`Condition::changed`], with an explicit policy for CREATE
    /// pairs: `on_create` is the result when there is no old record.
    pub fn changed_treating_create(path: impl Into<String>, on_create: bool) -> Self {
        Condition::Changed {
            path: path.into(),
            on_create,
        }
    }

    pub fn changes_to(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::ChangesTo {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn greater_than(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Compare {
            path: path.into(),
            value: value.into(),
            accept: &[Ordering::Greater],
        }
    }

    pub fn greater_or_equal(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Compare {
            path: path.into(),
            value: value.into(),
            accept: &[Ordering::Greater, Ordering::Equal],
        }
    }

    pub fn less_than(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Compare {
            path: path.into(),
            value: value.into(),
            accept: &[Ordering::Less],
        }
    }

    pub fn less_or_equal(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Compare {
            path: path.into(),
            value: value.into(),
            accept: &[Ordering::Less, Ordering::Equal],
        }
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Value, Option<&Value>) -> bool + Send + Sync + 'static,
    {
        Condition::Custom(Arc::new(predicate))
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::All(vec![self, other])
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Any(vec![self, other])
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Evaluate against record snapshots. `old` is None for CREATE pairs.
    pub fn evaluate(&self, new: &Value, old: Option<&Value>) -> bool {
        match self {
            Condition::Equals { path, value } => path::resolve(new, path) == Some(value),
            Condition::NotEquals { path, value } => match path::resolve(new, path) {
                Some(resolved) => resolved != value,
                None => false,
            },
            Condition::WasEqual { path, value } => {
                old.and_then(|o| path::resolve(o, path)) == Some(value)
            }
            Condition::Changed { path, on_create } => match old {
                Some(o) => path::resolve(new, path) != path::resolve(o, path),
                None => *on_create,
            },
            Condition::ChangesTo { path, value } => {
                path::resolve(new, path) == Some(value)
                    && match old {
                        Some(o) => path::resolve(o, path) != Some(value),
                        None => false,
                    }
            }
            Condition::Compare {
                path,
                value,
                accept,
            } => match path::resolve(new, path) {
                Some(resolved) => match compare(resolved, value) {
                    Some(ordering) => accept.contains(&ordering),
                    None => false,
                },
                None => false,
            },
            Condition::Custom(predicate) => predicate(new, old),
            Condition::All(branches) => branches.iter().all(|c| c.evaluate(new, old)),
            Condition::Any(branches) => branches.iter().any(|c| c.evaluate(new, old)),
            Condition::Not(inner) => !inner.evaluate(new, old),
        }
    }

    /// Evaluate against typed records, snapshotting them first.
    pub fn matches<M: Model>(&self, new: &M, old: Option<&M>) -> bool {
        let new_snap = snapshot(new);
        let old_snap = old.map(snapshot);
        self.evaluate(&new_snap, old_snap.as_ref())
    }

    /// Stable identity string used for registration deduplication.
    /// Structurally equal trees share an identity; custom predicates are
    /// identified by allocation.
    pub fn identity(&self) -> String {
        match self {
            Condition::Custom(predicate) => {
                format!("custom@{:p}", Arc::as_ptr(predicate))
            }
            other => format!("{:?}", other),
        }
    }
}

/// Snapshot a record for condition evaluation. A record that cannot be
/// serialized snapshots to null, which resolves every path to absent.
pub(crate) fn snapshot<M: serde::Serialize>(record: &M) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

/// Ordering between two JSON values: numbers compare numerically, strings
/// lexicographically. Anything else is non-comparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Equals { path, value } => write!(f, "equals({}, {})", path, value),
            Condition::NotEquals { path, value } => {
                write!(f, "not_equals({}, {})", path, value)
            }
            Condition::WasEqual { path, value } => {
                write!(f, "was_equal({}, {})", path, value)
            }
            Condition::Changed { path, on_create } => {
                write!(f, "changed({}, on_create={})", path, on_create)
            }
            Condition::ChangesTo { path, value } => {
                write!(f, "changes_to({}, {})", path, value)
            }
            Condition::Compare {
                path,
                value,
                accept,
            } => write!(f, "compare({}, {}, {:?})", path, value, accept),
            Condition::Custom(_) => write!(f, "custom(..)"),
            Condition::All(branches) => write!(f, "all({:?})", branches),
            Condition::Any(branches) => write!(f, "any({:?})", branches),
            Condition::Not(inner) => write!(f, "not({:?})", inner),
        }
    }
}

impl std::ops::BitAnd for Condition {
    type Output = Condition;
    fn bitand(self, rhs: Condition) -> Condition {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Condition {
    type Output = Condition;
    fn bitor(self, rhs: Condition) -> Condition {
        self.or(rhs)
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;
    fn not(self) -> Condition {
        self.negate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn changed_is_true_when_value_differs() {
        let cond = Condition::changed("balance");
        assert!(cond.evaluate(&json!({"balance": 7}), Some(&json!({"balance": 5}))));
        assert!(!cond.evaluate(&json!({"balance": 5}), Some(&json!({"balance": 5}))));
    }

    #[test]
    fn changed_defaults_to_false_on_create() {
        let cond = Condition::changed("balance");
        assert!(!cond.evaluate(&json!({"balance": 7}), None));
    }

    #[test]
    fn changed_on_create_is_configurable() {
        let cond = Condition::changed_treating_create("balance", true);
        assert!(cond.evaluate(&json!({"balance": 7}), None));
    }

    #[test]
    fn changes_to_requires_an_actual_transition() {
        let cond = Condition::changes_to("status", "inactive");
        let new = json!({"status": "inactive"});
        assert!(cond.evaluate(&new, Some(&json!({"status": "active"}))));
        assert!(!cond.evaluate(&new, Some(&json!({"status": "inactive"}))));
        assert!(!cond.evaluate(&new, None));
    }

    #[test]
    fn equals_traverses_related_objects() {
        let cond = Condition::equals("status.name", "ACTIVE");
        assert!(cond.evaluate(&json!({"status": {"name": "ACTIVE"}}), None));
        assert!(!cond.evaluate(&json!({"status": null}), None));
    }

    #[test]
    fn not_equals_is_false_when_unresolvable() {
        let cond = Condition::not_equals("owner.name", "bob");
        assert!(!cond.evaluate(&json!({"owner": null}), None));
        assert!(cond.evaluate(&json!({"owner": {"name": "alice"}}), None));
    }

    #[test]
    fn was_equal_reads_the_old_record() {
        let cond = Condition::was_equal("status", "pending");
        let new = json!({"status": "active"});
        assert!(cond.evaluate(&new, Some(&json!({"status": "pending"}))));
        assert!(!cond.evaluate(&new, Some(&json!({"status": "active"}))));
        assert!(!cond.evaluate(&new, None));
    }

    #[test]
    fn ordering_comparisons_are_numeric_aware() {
        assert!(Condition::greater_than("balance", 1000)
            .evaluate(&json!({"balance": 1000.5}), None));
        assert!(!Condition::greater_than("balance", 1000)
            .evaluate(&json!({"balance": 1000}), None));
        assert!(Condition::greater_or_equal("balance", 1000)
            .evaluate(&json!({"balance": 1000}), None));
        assert!(Condition::less_or_equal("priority", 5).evaluate(&json!({"priority": 5}), None));
    }

    #[test]
    fn non_comparable_values_are_false() {
        let cond = Condition::greater_than("balance", 10);
        assert!(!cond.evaluate(&json!({"balance": "lots"}), None));
        assert!(!cond.evaluate(&json!({}), None));
    }

    #[test]
    fn combinators_compose_and_short_circuit() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_probe = calls.clone();
        let probe = Condition::custom(move |_, _| {
            calls_probe.fetch_add(1, AtomicOrdering::SeqCst);
            true
        });

        let cond = Condition::equals("status", "active") & probe;
        // Left branch fails: the right branch must not be consulted.
        assert!(!cond.evaluate(&json!({"status": "closed"}), None));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

        assert!(cond.evaluate(&json!({"status": "active"}), None));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn or_and_not_operators() {
        let premium_or_vip =
            Condition::equals("tier", "premium") | Condition::equals("tier", "vip");
        assert!(premium_or_vip.evaluate(&json!({"tier": "vip"}), None));
        assert!(!premium_or_vip.evaluate(&json!({"tier": "basic"}), None));

        let not_active = !Condition::equals("status", "active");
        assert!(not_active.evaluate(&json!({"status": "closed"}), None));
    }

    #[test]
    fn identity_is_structural_except_for_custom() {
        assert_eq!(
            Condition::changed("status").identity(),
            Condition::changed("status").identity()
        );
        let a = Condition::custom(|_, _| true);
        let b = Condition::custom(|_, _| true);
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.identity(), a.clone().identity());
    }
}
