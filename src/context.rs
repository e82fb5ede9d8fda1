use std::collections::HashMap;

use serde_json::Value;

use crate::event::{Event, Operation, Phase};

/// Per-dispatch context handed to every handler invocation.
///
/// Carries the event being fired, the model's collection name, and
/// free-form metadata for callers that want to thread extra information
/// through to their handlers.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub event: Event,
    pub collection: &'static str,
    pub metadata: HashMap<String, Value>,
}

impl HookContext {
    pub fn new(event: Event, collection: &'static str) -> Self {
        Self {
            event,
            collection,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_validate(&self) -> bool {
        self.event.phase() == Phase::Validate
    }

    pub fn is_before(&self) -> bool {
        self.event.phase() == Phase::Before
    }

    pub fn is_after(&self) -> bool {
        self.event.phase() == Phase::After
    }

    pub fn is_create(&self) -> bool {
        self.event.operation() == Operation::Create
    }

    pub fn is_update(&self) -> bool {
        self.event.operation() == Operation::Update
    }

    pub fn is_delete(&self) -> bool {
        self.event.operation() == Operation::Delete
    }
}
