//! Cache-aside loader.
//!
//! # Responsibility
//! - Serve identifier loads from a shared `CachePool` before touching SQL.
//! - Write every model the wrapped loader maps back to the pool.
//!
//! # Invariants
//! - Cache keys are `<namespace>/<type>.<key-field>.<id>` with `/` in the
//!   type and id replaced by `.`; the prefix is computed once per instance.
//! - A partially cached `load_many` runs exactly one query, for the
//!   missing identifiers only.
//! - Entries are never invalidated here; callers evict through the pool.

use super::collection::{Cursor, ModelSink};
use super::model_loader::{CloneWith, ModelCollectionLoader};
use super::{Hooks, LoaderCriteria, LoaderError, LoaderResult, ModelCollection, Query};
use crate::cache::{CacheError, CachePool};
use crate::model::factory::{ModelDescriptor, ModelFactory};
use crate::model::record::{Model, ModelData};
use crate::model::value::Value;
use crate::source::criteria::{Criteria, Filter};
use log::debug;
use once_cell::unsync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

pub const DEFAULT_CACHE_NAMESPACE: &str = "object";

/// Pool handle plus key scheme for one cached loader.
pub struct ModelCache {
    pool: Arc<dyn CachePool>,
    namespace: String,
    prefix: OnceCell<String>,
}

impl ModelCache {
    pub fn new(pool: Arc<dyn CachePool>, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            prefix: OnceCell::new(),
        }
    }

    pub fn pool(&self) -> &Arc<dyn CachePool> {
        &self.pool
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key_for(&self, bound: &ModelDescriptor, id: &Value) -> String {
        let prefix = self.prefix.get_or_init(|| {
            let scope = format!("{}.{}", bound.obj_type(), bound.key());
            format!("{}/{}", self.namespace, scope.replace('/', "."))
        });
        format!("{prefix}.{}", id.to_string().replace('/', "."))
    }

    /// Cached field data for `key`, if any.
    pub fn fetch(&self, key: &str) -> LoaderResult<Option<ModelData>> {
        let item = self.pool.get_item(key)?;
        let Some(payload) = item.get().filter(|_| item.is_hit()) else {
            debug!("event=cache_lookup module=cached_loader status=miss key={key}");
            return Ok(None);
        };

        let data = serde_json::from_str::<ModelData>(payload).map_err(|err| {
            CacheError::Payload(format!("entry `{key}` is not a model dataset: {err}"))
        })?;
        debug!("event=cache_lookup module=cached_loader status=hit key={key}");
        Ok(Some(data))
    }

    pub fn contains(&self, key: &str) -> LoaderResult<bool> {
        Ok(self.pool.get_item(key)?.is_hit())
    }

    /// Stores `model`'s data under its identifier.
    pub fn store(&self, bound: &ModelDescriptor, model: &Model) -> LoaderResult<()> {
        let Some(id) = model.id() else {
            return Err(LoaderError::InvalidArgument(
                "model must have an ID".to_string(),
            ));
        };
        let payload = serde_json::to_string(model.data()).map_err(|err| {
            LoaderError::InvalidArgument(format!("model must return a dataset: {err}"))
        })?;

        let key = self.key_for(bound, id);
        let mut item = self.pool.get_item(&key)?;
        item.set(payload);
        self.pool.save(item)?;
        debug!("event=cache_store module=cached_loader status=ok key={key}");
        Ok(())
    }
}

impl ModelSink for ModelCache {
    fn model_loaded(&self, bound: &ModelDescriptor, model: &Model) -> LoaderResult<()> {
        self.store(bound, model)
    }
}

/// `ModelCollectionLoader` consulting a cache pool per identifier.
pub struct CachedCollectionLoader<'conn> {
    inner: ModelCollectionLoader<'conn>,
    cache: Rc<ModelCache>,
}

impl<'conn> CachedCollectionLoader<'conn> {
    pub fn new(inner: ModelCollectionLoader<'conn>, pool: Arc<dyn CachePool>) -> Self {
        let mut loader = Self {
            inner,
            cache: Rc::new(ModelCache::new(pool, DEFAULT_CACHE_NAMESPACE)),
        };
        loader.install_cache();
        loader
    }

    /// Replaces the key namespace. Entries stored under the old one are
    /// left in the pool.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.cache = Rc::new(ModelCache::new(Arc::clone(self.cache.pool()), namespace));
        self.install_cache();
        self
    }

    fn install_cache(&mut self) {
        let sink = Rc::clone(&self.cache);
        self.inner.base_mut().set_sink(sink);
    }

    pub fn inner(&self) -> &ModelCollectionLoader<'conn> {
        &self.inner
    }

    pub fn pool(&self) -> &Arc<dyn CachePool> {
        self.cache.pool()
    }

    pub fn namespace(&self) -> &str {
        self.cache.namespace()
    }

    pub fn set_model(&mut self, obj_type: &str) -> LoaderResult<&mut Self> {
        self.inner.set_model(obj_type)?;
        Ok(self)
    }

    pub fn has_model(&self) -> bool {
        self.inner.has_model()
    }

    pub fn model(&self) -> LoaderResult<&ModelDescriptor> {
        self.inner.model()
    }

    pub fn factory(&self) -> &Arc<ModelFactory> {
        self.inner.factory()
    }

    pub fn criteria(&self) -> &Criteria {
        self.inner.criteria()
    }

    pub fn create_model(&self) -> LoaderResult<Model> {
        self.inner.create_model()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    pub fn reset(&mut self) -> &mut Self {
        self.inner.reset();
        self
    }

    pub fn found_rows(&mut self) -> LoaderResult<u64> {
        self.inner.found_rows()
    }

    pub fn load_count(&self) -> LoaderResult<u64> {
        self.inner.load_count()
    }

    pub fn load_found(&self) -> LoaderResult<u64> {
        self.inner.load_found()
    }

    pub fn load(&mut self) -> LoaderResult<ModelCollection> {
        self.inner.load()
    }

    /// Loads one model when `ident` is given, going through the cache.
    pub fn load_with(&mut self, ident: Option<Value>, hooks: Hooks<'_>) -> LoaderResult<ModelCollection> {
        match ident {
            Some(ident) => {
                let model = self.load_one_with(ident, hooks)?;
                Ok(ModelCollection::new(model.into_iter().collect(), None))
            }
            None => self.inner.load_with(None, hooks),
        }
    }

    pub fn find_by<I>(&mut self, filters: I, hooks: Hooks<'_>) -> LoaderResult<ModelCollection>
    where
        I: IntoIterator<Item = Filter>,
    {
        self.inner.find_by(filters, hooks)
    }

    pub fn load_from_query(&mut self, query: impl Into<Query>, hooks: Hooks<'_>) -> LoaderResult<ModelCollection> {
        self.inner.load_from_query(query, hooks)
    }

    pub fn cursor<'a>(&'a mut self, hooks: Hooks<'a>) -> LoaderResult<Cursor<'a, 'conn>> {
        self.inner.cursor(hooks)
    }

    pub fn load_one(&self, id: impl Into<Value>) -> LoaderResult<Option<Model>> {
        self.load_one_with(id, Hooks::none())
    }

    /// Cache hit: rebuilds the model from cached data without hooks.
    /// Miss: loads from the database and caches the result.
    pub fn load_one_with(&self, id: impl Into<Value>, hooks: Hooks<'_>) -> LoaderResult<Option<Model>> {
        let id = id.into();
        if id.is_empty() {
            return Err(LoaderError::InvalidArgument(
                "one model ID is required".to_string(),
            ));
        }

        if let Some(model) = self.get_model_from_cache(&id)? {
            return Ok(Some(model));
        }
        self.inner.load_one_with(id, hooks)
    }

    pub fn load_many<I, V>(&self, ids: I) -> LoaderResult<HashMap<String, Model>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.load_many_with(ids, Hooks::none())
    }

    /// Loads models keyed by rendered identifier. Cached models are served
    /// from the pool; the rest are fetched in one query.
    pub fn load_many_with<I, V>(&self, ids: I, hooks: Hooks<'_>) -> LoaderResult<HashMap<String, Model>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &Value| !id.is_empty())
            .filter(|id| seen.insert(id.to_string()))
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Err(LoaderError::InvalidArgument(
                "at least one model ID is required".to_string(),
            ));
        }

        let mut models = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.get_model_from_cache(&id)? {
                Some(model) => {
                    models.insert(id.to_string(), model);
                }
                None => missing.push(id),
            }
        }

        debug!(
            "event=cache_load_many module=cached_loader status=partition cached={} missing={}",
            models.len(),
            missing.len()
        );
        if missing.is_empty() {
            return Ok(models);
        }

        for model in self.inner.load_many_with(missing, hooks)? {
            if let Some(id) = model.id() {
                models.insert(id.to_string(), model);
            }
        }
        Ok(models)
    }

    /// Rebuilds a model from the cache, resolving its dynamic type.
    pub fn get_model_from_cache(&self, id: &Value) -> LoaderResult<Option<Model>> {
        let key = self.model_cache_key(id)?;
        let Some(data) = self.cache.fetch(&key)? else {
            return Ok(None);
        };

        let mut model = self.inner.base().create_model_from_data(&data)?;
        model.set_data(data);
        Ok(Some(model))
    }

    pub fn add_model_to_cache(&self, model: &Model) -> LoaderResult<()> {
        self.cache.store(self.inner.model()?, model)
    }

    pub fn has_model_in_cache(&self, id: impl Into<Value>) -> LoaderResult<bool> {
        let key = self.model_cache_key(&id.into())?;
        self.cache.contains(&key)
    }

    pub fn model_cache_key(&self, id: &Value) -> LoaderResult<String> {
        Ok(self.cache.key_for(self.inner.model()?, id))
    }

    /// A new cached loader sharing this one's pool and namespace.
    pub fn clone_with<'o>(&self, overrides: impl Into<CloneWith<'o>>) -> LoaderResult<Self>
    where
        'o: 'conn,
    {
        let inner = self.inner.clone_with(overrides)?;
        Ok(Self::new(inner, Arc::clone(self.cache.pool())).with_namespace(self.cache.namespace()))
    }
}

impl LoaderCriteria for CachedCollectionLoader<'_> {
    fn criteria_mut(&mut self) -> &mut Criteria {
        self.inner.base_mut().criteria_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::{CachedCollectionLoader, ModelCache, DEFAULT_CACHE_NAMESPACE};
    use crate::cache::{CacheError, CacheItem, CachePool, MemoryCachePool};
    use crate::loader::model_loader::ModelCollectionLoader;
    use crate::loader::LoaderError;
    use crate::model::factory::{ModelDescriptor, ModelFactory};
    use crate::model::record::Model;
    use crate::model::value::Value;
    use std::sync::Arc;

    fn cached_loader(pool: Arc<MemoryCachePool>) -> CachedCollectionLoader<'static> {
        let factory = Arc::new(
            ModelFactory::new().with(ModelDescriptor::new("blog/article", "articles")),
        );
        let mut inner = ModelCollectionLoader::without_connection(factory);
        inner.set_model("blog/article").expect("bind");
        CachedCollectionLoader::new(inner, pool)
    }

    #[test]
    fn cache_keys_normalize_slashes() {
        let loader = cached_loader(Arc::new(MemoryCachePool::new()));
        assert_eq!(
            loader.model_cache_key(&Value::from("2024/07")).expect("key"),
            "object/blog.article.id.2024.07"
        );
        assert_eq!(loader.namespace(), DEFAULT_CACHE_NAMESPACE);

        let loader = loader.with_namespace("tenant-a");
        assert_eq!(
            loader.model_cache_key(&Value::from(42_i64)).expect("key"),
            "tenant-a/blog.article.id.42"
        );
    }

    #[test]
    fn cached_models_load_without_a_connection() {
        let pool = Arc::new(MemoryCachePool::new());
        let loader = cached_loader(Arc::clone(&pool));

        let mut model = Model::new("blog/article", "id");
        model.set("id", 7_i64).set("title", "Cached");
        loader.add_model_to_cache(&model).expect("store");
        assert!(loader.has_model_in_cache(7_i64).expect("lookup"));

        let loaded = loader.load_one(7_i64).expect("load").expect("hit");
        assert_eq!(loaded.data(), model.data());
        assert!(loaded.is_loaded());

        let err = loader.load_one(8_i64).expect_err("miss needs a connection");
        assert!(matches!(err, LoaderError::Connection));
    }

    #[test]
    fn fully_cached_load_many_skips_the_database() {
        let pool = Arc::new(MemoryCachePool::new());
        let loader = cached_loader(Arc::clone(&pool));
        for id in [1_i64, 2] {
            let mut model = Model::new("blog/article", "id");
            model.set("id", id);
            loader.add_model_to_cache(&model).expect("store");
        }

        let models = loader.load_many([1_i64, 2, 1]).expect("all cached");
        assert_eq!(models.len(), 2);
        assert!(models.contains_key("1") && models.contains_key("2"));
    }

    #[test]
    fn models_without_id_are_rejected() {
        let loader = cached_loader(Arc::new(MemoryCachePool::new()));
        let model = Model::new("blog/article", "id");
        assert!(matches!(
            loader.add_model_to_cache(&model),
            Err(LoaderError::InvalidArgument(_))
        ));
        assert!(matches!(
            loader.load_many(Vec::<Value>::new()),
            Err(LoaderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn corrupt_entries_are_payload_errors() {
        let pool = Arc::new(MemoryCachePool::new());
        let cache = ModelCache::new(pool.clone(), "object");
        pool.save(CacheItem::hit("object/article.id.1", "not json"))
            .expect("save");
        assert!(matches!(
            cache.fetch("object/article.id.1"),
            Err(LoaderError::Cache(CacheError::Payload(_)))
        ));
        assert_eq!(pool.len(), 1);
    }
}
