//! Model records, scalar values and the type registry.
//!
//! # Responsibility
//! - Define the data shapes loaders produce and caches store.
//! - Resolve type identifiers to descriptors at row-mapping time.
//!
//! # Invariants
//! - Every model has exactly one key field.
//! - Cached data is a plain field mapping, never a behaviour-carrying object.

pub mod factory;
pub mod record;
pub mod value;
