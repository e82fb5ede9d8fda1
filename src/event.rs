use std::fmt;

use crate::error::HookError;

/// Where in the write pipeline a hook runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Validate,
    Before,
    After,
}

/// The logical write a hook is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Whether dispatch for this operation needs the pre-write ("old")
    /// record state. CREATE has no old state by definition.
    pub fn needs_old(self) -> bool {
        !matches!(self, Operation::Create)
    }
}

/// Closed set of lifecycle events.
///
/// For one logical operation the ordering invariant is:
/// VALIDATE fires before BEFORE, BEFORE fires before the underlying write,
/// AFTER fires after the write returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    ValidateCreate,
    BeforeCreate,
    AfterCreate,
    ValidateUpdate,
    BeforeUpdate,
    AfterUpdate,
    ValidateDelete,
    BeforeDelete,
    AfterDelete,
}

impl Event {
    pub const ALL: [Event; 9] = [
        Event::ValidateCreate,
        Event::BeforeCreate,
        Event::AfterCreate,
        Event::ValidateUpdate,
        Event::BeforeUpdate,
        Event::AfterUpdate,
        Event::ValidateDelete,
        Event::BeforeDelete,
        Event::AfterDelete,
    ];

    pub fn phase(self) -> Phase {
        match self {
            Event::ValidateCreate | Event::ValidateUpdate | Event::ValidateDelete => {
                Phase::Validate
            }
            Event::BeforeCreate | Event::BeforeUpdate | Event::BeforeDelete => Phase::Before,
            Event::AfterCreate | Event::AfterUpdate | Event::AfterDelete => Phase::After,
        }
    }

    pub fn operation(self) -> Operation {
        match self {
            Event::ValidateCreate | Event::BeforeCreate | Event::AfterCreate => Operation::Create,
            Event::ValidateUpdate | Event::BeforeUpdate | Event::AfterUpdate => Operation::Update,
            Event::ValidateDelete | Event::BeforeDelete | Event::AfterDelete => Operation::Delete,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Event::ValidateCreate => "validate_create",
            Event::BeforeCreate => "before_create",
            Event::AfterCreate => "after_create",
            Event::ValidateUpdate => "validate_update",
            Event::BeforeUpdate => "before_update",
            Event::AfterUpdate => "after_update",
            Event::ValidateDelete => "validate_delete",
            Event::BeforeDelete => "before_delete",
            Event::AfterDelete => "after_delete",
        }
    }

    /// Parse an event name. Unknown names are a configuration error,
    /// rejected before anything is registered against them.
    pub fn parse(name: &str) -> Result<Event, HookError> {
        Event::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == name)
            .ok_or_else(|| HookError::configuration(format!("unknown event '{}'", name)))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_event() {
        for event in Event::ALL {
            assert_eq!(Event::parse(event.as_str()).unwrap(), event);
        }
    }

    #[test]
    fn parse_rejects_unknown_event() {
        let err = Event::parse("around_update").unwrap_err();
        assert!(matches!(err, HookError::Configuration(_)));
    }

    #[test]
    fn only_create_skips_old_state() {
        assert!(!Event::ValidateCreate.operation().needs_old());
        assert!(Event::BeforeUpdate.operation().needs_old());
        assert!(Event::AfterDelete.operation().needs_old());
    }

    #[test]
    fn phases_group_as_expected() {
        assert_eq!(Event::ValidateDelete.phase(), Phase::Validate);
        assert_eq!(Event::BeforeCreate.phase(), Phase::Before);
        assert_eq!(Event::AfterUpdate.phase(), Phase::After);
    }
}
