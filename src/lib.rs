mod condition;
mod context;
mod dispatch;
mod error;
mod event;
mod model;
mod pair;
mod registry;
mod repository;

pub use condition::{path, Condition, Predicate};
pub use context::HookContext;
pub use dispatch::{DispatchEngine, NoOldRecords, OldRecordSource};
pub use error::{BoxError, HookError};
pub use event::{Event, Operation, Phase};
pub use model::{InMemoryModelStore, Model, ModelError, ModelStore, Versioned};
pub use pair::pair_records;
pub use registry::{Hook, HookRegistration, HookRegistry, HookSet, DEFAULT_PRIORITY};
pub use repository::{HookedRepository, WriteOptions, DEFAULT_BATCH_SIZE};

// Re-export the declarative macros from the companion proc-macro crate.
pub use bulk_hooks_macros::{hooks, HookModel};
