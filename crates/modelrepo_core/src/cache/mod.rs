//! Key-value cache pool contract.
//!
//! # Responsibility
//! - Define the item-oriented pool API loaders read through and write to.
//! - Keep payloads opaque strings so pools never see model behaviour.
//!
//! # Invariants
//! - Pools are shared across loaders and threads (`Send + Sync`).
//! - A saved item is visible to every later `get_item` on the same pool
//!   until it expires or is deleted.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory;

pub use memory::{CacheStats, MemoryCachePool};

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug)]
pub enum CacheError {
    InvalidKey(String),
    /// A stored payload could not be encoded or decoded.
    Payload(String),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "invalid cache key `{key}`"),
            Self::Payload(message) => write!(f, "invalid cache payload: {message}"),
        }
    }
}

impl Error for CacheError {}

/// One cache slot as returned by `CachePool::get_item`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    key: String,
    value: Option<String>,
    hit: bool,
}

impl CacheItem {
    pub fn hit(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            hit: true,
        }
    }

    pub fn miss(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            hit: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_hit(&self) -> bool {
        self.hit
    }

    /// Cached payload; `None` on a miss or before `set`.
    pub fn get(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Replaces the payload. The pool is unchanged until `save`.
    pub fn set(&mut self, value: impl Into<String>) -> &mut Self {
        self.value = Some(value.into());
        self
    }
}

/// Shared key-value store consulted by cached loaders.
pub trait CachePool: Send + Sync {
    fn get_item(&self, key: &str) -> CacheResult<CacheItem>;
    fn save(&self, item: CacheItem) -> CacheResult<()>;
    /// Removes `key`. Returns whether an entry existed.
    fn delete_item(&self, key: &str) -> CacheResult<bool>;
    fn clear(&self) -> CacheResult<()>;
}

pub(crate) fn validate_key(key: &str) -> CacheResult<()> {
    if key.trim().is_empty() || key.chars().any(char::is_control) {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}
