//! Loader runtime configuration.
//!
//! # Responsibility
//! - Carry cache and pagination defaults shared by loaders built at runtime.
//! - Read overrides from `MODELREPO_*` environment variables.
//!
//! # Invariants
//! - Unset variables keep their defaults; invalid values are rejected, never
//!   silently replaced.

use crate::cache::MemoryCachePool;
use crate::loader::cached::DEFAULT_CACHE_NAMESPACE;
use crate::logging::{default_log_level, normalize_level};
use std::time::Duration;

pub const ENV_CACHE_NAMESPACE: &str = "MODELREPO_CACHE_NAMESPACE";
pub const ENV_CACHE_TTL_SECS: &str = "MODELREPO_CACHE_TTL_SECS";
pub const ENV_PAGE_SIZE: &str = "MODELREPO_PAGE_SIZE";
pub const ENV_LOG_LEVEL: &str = "MODELREPO_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Cache key namespace.
    pub cache_namespace: String,
    /// Entry lifetime; `None` keeps entries until evicted.
    pub cache_ttl: Option<Duration>,
    /// Page size applied when a caller asks for a page without a size.
    pub default_page_size: u32,
    pub log_level: &'static str,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            cache_ttl: None,
            default_page_size: 20,
            log_level: default_log_level(),
        }
    }
}

impl LoaderConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`, which maps variable names to values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(namespace) = read(ENV_CACHE_NAMESPACE) {
            if namespace.contains('/') {
                return Err(format!(
                    "{ENV_CACHE_NAMESPACE} must not contain `/`, got `{namespace}`"
                ));
            }
            config.cache_namespace = namespace;
        }

        if let Some(ttl) = read(ENV_CACHE_TTL_SECS) {
            let seconds = ttl.parse::<u64>().map_err(|err| {
                format!("{ENV_CACHE_TTL_SECS} must be a whole number of seconds, got `{ttl}`: {err}")
            })?;
            config.cache_ttl = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        if let Some(size) = read(ENV_PAGE_SIZE) {
            config.default_page_size = size
                .parse::<u32>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| format!("{ENV_PAGE_SIZE} must be a positive integer, got `{size}`"))?;
        }

        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = normalize_level(&level)?;
        }

        Ok(config)
    }

    /// A fresh in-memory pool honoring `cache_ttl`.
    pub fn memory_pool(&self) -> MemoryCachePool {
        match self.cache_ttl {
            Some(ttl) => MemoryCachePool::with_ttl(ttl),
            None => MemoryCachePool::new(),
        }
    }
}
