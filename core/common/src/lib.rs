//! Common utilities and types shared across the envsync crates.
//!
//! This module provides the error type and the persisted environment record
//! that both the storage adapters and the sync store speak in terms of.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{document_uuid, now_millis, EnvironmentRecord, EnvironmentUuid, OpaqueDocument};
