//! Persistence adapters for envsync.
//!
//! This module provides the trait the sync store persists through, plus the
//! bundled bindings and a registry for picking one by name.
//!
//! # Bindings
//! - `memory`: hard delete, instrumented; the test double for the store
//! - `sqlite`: soft delete with restore and permanent delete

pub mod adapter;
pub mod memory;
pub mod registry;
pub mod sqlite;

pub use adapter::{PersistenceAdapter, SoftDeleteAdapter};
pub use memory::{AdapterCalls, MemoryAdapter};
pub use registry::{AdapterFactory, AdapterRegistry};
pub use sqlite::SqliteAdapter;
