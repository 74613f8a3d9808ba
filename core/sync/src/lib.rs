//! envsync store
//!
//! This crate holds the synchronized environment store and everything it is
//! built from:
//! - `SyncAction`, the tagged union of mutations, and its `ActionHasher`
//! - Conflict filtering over a bounded per-environment action log
//! - A pure reducer delegating document changes to a `MutationLibrary`
//! - `SyncStore`, which serializes writes, publishes events and flushes to
//!   a persistence adapter on a debounce, a timer, on demand and on close

pub mod action;
pub mod conflict;
pub mod events;
pub mod hash;
pub mod mutations;
pub mod reducer;
pub mod scheduler;
pub mod state;
pub mod store;

pub use action::{ReorderAction, ReorderType, SyncAction};
pub use conflict::{
    ConflictFilter, PassThroughFilter, RecentAction, RecentActions, RecentActionsFilter,
    RecentActionsStore,
};
pub use events::{EventBus, StoreEvent};
pub use hash::{ActionHash, ActionHasher};
pub use mutations::{JsonMutations, MutationLibrary};
pub use reducer::reduce;
pub use scheduler::{FlushOutcome, FlushScheduler, FlushSchedulerHandle, FlushTrigger};
pub use state::StoreState;
pub use store::{StoreConfig, SyncStore};
