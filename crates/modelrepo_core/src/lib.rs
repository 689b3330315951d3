//! Collection loaders for SQLite-backed models.
//! Criteria become SQL, rows become models, and an optional cache pool sits
//! in front of identifier lookups.

pub mod cache;
pub mod config;
pub mod db;
pub mod loader;
pub mod logging;
pub mod model;
pub mod source;

pub use cache::{CacheError, CacheItem, CachePool, CacheResult, CacheStats, MemoryCachePool};
pub use config::LoaderConfig;
pub use db::{open_db, open_db_in_memory, prepare_connection, DbError, DbResult};
pub use loader::cached::{CachedCollectionLoader, ModelCache, DEFAULT_CACHE_NAMESPACE};
pub use loader::collection::{CollectionLoader, Cursor, ModelSink, Models};
pub use loader::model_loader::{CloneWith, ModelCollectionLoader};
pub use loader::{
    Hooks, LoaderCriteria, LoaderError, LoaderResult, ModelCollection, ParamType, Query,
};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::factory::{ModelDescriptor, ModelFactory, DEFAULT_KEY_FIELD};
pub use model::record::{Model, ModelData};
pub use model::value::Value;
pub use source::criteria::{
    Criteria, Filter, Keyword, ModelCallback, Operand, Operator, Order, OrderMode, Pagination,
    QuerySpec,
};
pub use source::sql::{quote_identifier, SqlSource};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
