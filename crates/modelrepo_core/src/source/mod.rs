//! Query criteria and SQL fragment generation.
//!
//! # Responsibility
//! - Hold the criteria a loader accumulates (`criteria`).
//! - Turn criteria into SQL fragments for one table (`sql`).
//!
//! # Invariants
//! - Fragment builders never execute SQL; loaders own execution.

pub mod criteria;
pub mod sql;
