//! SQL-driving model loader.
//!
//! # Responsibility
//! - Assemble SELECT statements from the accumulated criteria and run them.
//! - Count rows per page (`load_count`) and across pages (`load_found`,
//!   `found_rows`), tracking found rows on paginated loads.
//! - Load single and multiple models by identifier.
//!
//! # Invariants
//! - A loader is bound to at most one model type; rebinding requires
//!   `clone_with`.
//! - The found-rows modifier is only emitted when a LIMIT is present, and
//!   the follow-up statement always runs on the connection that ran the
//!   tracked statement.
//! - `reset()` is a no-op unless criteria changed since the last reset.
//! - Identifier loads never mutate the loader's criteria.

use super::collection::{CollectionLoader, Cursor};
use super::{Hooks, LoaderCriteria, LoaderError, LoaderResult, ModelCollection, Query};
use crate::db::found_rows::{read_found_rows, record_found_rows, split_tracked, CALC_FOUND_ROWS};
use crate::model::factory::{ModelDescriptor, ModelFactory};
use crate::model::record::Model;
use crate::model::value::Value;
use crate::source::criteria::{Criteria, Filter, Order, Pagination};
use log::debug;
use rusqlite::Connection;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

/// Overrides applied by `clone_with`; unset fields keep the source loader's.
#[derive(Debug, Clone, Default)]
pub struct CloneWith<'conn> {
    pub model: Option<String>,
    pub factory: Option<Arc<ModelFactory>>,
    pub connection: Option<&'conn Connection>,
}

impl From<&str> for CloneWith<'_> {
    fn from(model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            ..Self::default()
        }
    }
}

impl From<String> for CloneWith<'_> {
    fn from(model: String) -> Self {
        Self {
            model: Some(model),
            ..Self::default()
        }
    }
}

/// Primary loader with found-rows counting and dirty-gated reset.
pub struct ModelCollectionLoader<'conn> {
    base: CollectionLoader<'conn>,
    found_rows: Option<u64>,
}

impl<'conn> ModelCollectionLoader<'conn> {
    pub fn new(conn: &'conn Connection, factory: Arc<ModelFactory>) -> Self {
        Self::from_parts(Some(conn), factory)
    }

    /// A loader without a database handle; every query fails with
    /// `LoaderError::Connection`.
    pub fn without_connection(factory: Arc<ModelFactory>) -> Self {
        Self::from_parts(None, factory)
    }

    /// `new` with `obj_type` bound. The loader starts clean.
    pub fn for_model(
        conn: &'conn Connection,
        factory: Arc<ModelFactory>,
        obj_type: &str,
    ) -> LoaderResult<Self> {
        let mut loader = Self::new(conn, factory);
        loader.bind(obj_type)?;
        Ok(loader)
    }

    fn from_parts(conn: Option<&'conn Connection>, factory: Arc<ModelFactory>) -> Self {
        Self {
            base: CollectionLoader::new(conn, factory),
            found_rows: None,
        }
    }

    pub(crate) fn base(&self) -> &CollectionLoader<'conn> {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut CollectionLoader<'conn> {
        &mut self.base
    }

    /// Binds the model type and marks the loader dirty. Fails when a model
    /// is already bound.
    pub fn set_model(&mut self, obj_type: &str) -> LoaderResult<&mut Self> {
        self.bind(obj_type)?;
        self.base.criteria_mut().edit();
        Ok(self)
    }

    fn bind(&mut self, obj_type: &str) -> LoaderResult<()> {
        if let Ok(bound) = self.base.model() {
            return Err(LoaderError::InvalidState(format!(
                "a model is already assigned to this collection loader: {}",
                bound.obj_type()
            )));
        }
        self.base.bind_model(obj_type)
    }

    pub fn has_model(&self) -> bool {
        self.base.has_model()
    }

    pub fn model(&self) -> LoaderResult<&ModelDescriptor> {
        self.base.model()
    }

    pub fn factory(&self) -> &Arc<ModelFactory> {
        self.base.factory()
    }

    pub fn criteria(&self) -> &Criteria {
        self.base.criteria()
    }

    pub fn create_model(&self) -> LoaderResult<Model> {
        self.base.create_model()
    }

    pub fn is_dirty(&self) -> bool {
        self.base.criteria().is_dirty()
    }

    /// Clears criteria and the found-rows memo when dirty. The model stays bound.
    pub fn reset(&mut self) -> &mut Self {
        if self.base.criteria_mut().reset() {
            self.found_rows = None;
            debug!("event=loader_reset module=loader status=ok");
        }
        self
    }

    /// Total rows matching the filters, memoized until a dirty `reset()`.
    pub fn found_rows(&mut self) -> LoaderResult<u64> {
        if let Some(found_rows) = self.found_rows {
            return Ok(found_rows);
        }
        let found_rows = self.load_found()?;
        self.found_rows = Some(found_rows);
        Ok(found_rows)
    }

    /// Number of rows on the current page.
    pub fn load_count(&self) -> LoaderResult<u64> {
        let source = self.base.source()?;
        let conn = self.base.db()?;
        let spec = self.base.criteria().spec();

        let sql = format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM {}{}{})",
            source.sql_from(),
            source.sql_filters(spec),
            source.sql_pagination(spec)
        );
        query_count(conn, &sql)
    }

    /// Number of rows matching the filters, ignoring pagination.
    pub fn load_found(&self) -> LoaderResult<u64> {
        let source = self.base.source()?;
        let conn = self.base.db()?;
        let sql = source.sql_load_count(self.base.criteria().spec());
        query_count(conn, &sql)
    }

    /// Loads every model matching the current criteria.
    pub fn load(&mut self) -> LoaderResult<ModelCollection> {
        self.load_with(None, Hooks::none())
    }

    /// Loads one model when `ident` is given, otherwise the current page.
    pub fn load_with(&mut self, ident: Option<Value>, hooks: Hooks<'_>) -> LoaderResult<ModelCollection> {
        if let Some(ident) = ident {
            let model = self.load_one_with(ident, hooks)?;
            return Ok(ModelCollection::new(model.into_iter().collect(), None));
        }

        let sql = self.select_sql()?;
        self.load_from_query(sql, hooks)
    }

    /// Adds `filters` to the criteria, then loads.
    pub fn find_by<I>(&mut self, filters: I, hooks: Hooks<'_>) -> LoaderResult<ModelCollection>
    where
        I: IntoIterator<Item = Filter>,
    {
        self.add_filters(filters);
        self.load_with(None, hooks)
    }

    /// Lazy variant of `load`.
    pub fn cursor<'a>(&'a mut self, hooks: Hooks<'a>) -> LoaderResult<Cursor<'a, 'conn>> {
        self.cursor_with(None, hooks)
    }

    /// Lazy variant of `load_with`: with `ident` the cursor yields at most
    /// the `load_one` result.
    pub fn cursor_with<'a>(&'a mut self, ident: Option<Value>, hooks: Hooks<'a>) -> LoaderResult<Cursor<'a, 'conn>> {
        let conn = self.base.db()?;
        let (sql, found_rows) = match ident {
            Some(id) => (self.load_one_sql(id)?, None),
            None => {
                let sql = self.select_sql()?;
                self.track_found_rows(conn, sql, &[])?
            }
        };

        debug!("event=loader_query module=loader status=start mode=cursor sql={sql}");
        let stmt = self.base.source()?.db_query(&sql)?;

        let this: &'a Self = self;
        let stored = this.base.criteria().callback().map(|callback| &**callback);
        Ok(this.base.cursor(stmt, Vec::new(), hooks.or_after(stored), found_rows))
    }

    /// Loads one model by primary key.
    pub fn load_one(&self, id: impl Into<Value>) -> LoaderResult<Option<Model>> {
        self.load_one_with(id, Hooks::none())
    }

    pub fn load_one_with(&self, id: impl Into<Value>, hooks: Hooks<'_>) -> LoaderResult<Option<Model>> {
        let sql = self.load_one_sql(id.into())?;
        debug!("event=loader_query module=loader status=start mode=one sql={sql}");

        let mut stmt = self.base.source()?.db_query(&sql)?;
        let stored = self.base.criteria().callback().cloned();
        let mut models = self
            .base
            .process_collection(&mut stmt, &[], hooks.or_after(stored.as_deref()))?;
        Ok(models.pop())
    }

    /// Single-row select scoped by the current filters and keywords.
    fn load_one_sql(&self, id: Value) -> LoaderResult<String> {
        if id.is_empty() {
            return Err(LoaderError::InvalidArgument(
                "one model ID is required".to_string(),
            ));
        }

        let source = self.base.source()?;
        let spec = self
            .base
            .criteria()
            .spec()
            .clone()
            .with_filter(Filter::eq(source.key(), id))
            .with_orders(Vec::new())
            .with_pagination(Pagination::default());

        Ok(format!(
            "SELECT {} FROM {}{} LIMIT 1",
            source.sql_select(&spec),
            source.sql_from(),
            source.sql_filters(&spec)
        ))
    }

    /// Loads models by primary key, ordered like `ids`.
    pub fn load_many<I, V>(&self, ids: I) -> LoaderResult<Vec<Model>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.load_many_with(ids, Hooks::none())
    }

    pub fn load_many_with<I, V>(&self, ids: I, hooks: Hooks<'_>) -> LoaderResult<Vec<Model>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids = distinct_ids(ids);
        if ids.is_empty() {
            return Err(LoaderError::InvalidArgument(
                "at least one model ID is required".to_string(),
            ));
        }

        let source = self.base.source()?;
        let key = source.key().to_string();
        let spec = self
            .base
            .criteria()
            .spec()
            .clone()
            .with_filter(Filter::is_in(key.as_str(), ids.iter()))
            .with_orders(vec![Order::by_values(key.as_str(), ids.iter())])
            .with_pagination(Pagination::default());

        let sql = format!(
            "SELECT {} FROM {}{}{} LIMIT {}",
            source.sql_select(&spec),
            source.sql_from(),
            source.sql_filters(&spec),
            source.sql_orders(&spec),
            ids.len()
        );
        self.run_query(sql, &[], hooks)
    }

    /// Runs a raw or structured statement and maps its rows.
    ///
    /// Statements starting with `SELECT SQL_CALC_FOUND_ROWS` also record the
    /// total row count, returned on the collection and memoized.
    pub fn load_from_query(&mut self, query: impl Into<Query>, hooks: Hooks<'_>) -> LoaderResult<ModelCollection> {
        let conn = self.base.db()?;
        let (sql, binds) = query.into().into_parts()?;
        let (sql, found_rows) = self.track_found_rows(conn, sql, &binds)?;
        let models = self.run_query(sql, &binds, hooks)?;
        Ok(ModelCollection::new(models, found_rows))
    }

    /// A new loader sharing this one's connection, factory, model, dynamic
    /// type field and callback, with empty criteria.
    pub fn clone_with<'o>(&self, overrides: impl Into<CloneWith<'o>>) -> LoaderResult<Self>
    where
        'o: 'conn,
    {
        let overrides = overrides.into();
        let factory = overrides
            .factory
            .unwrap_or_else(|| Arc::clone(self.base.factory()));
        let conn = overrides
            .connection
            .map(|conn| conn as &'conn Connection)
            .or(self.base.connection());

        let mut clone = Self::from_parts(conn, factory);
        let model = overrides
            .model
            .or_else(|| self.base.model().ok().map(|bound| bound.obj_type().to_string()));
        if let Some(model) = model {
            clone.bind(&model)?;
        }

        let criteria = self.base.criteria();
        if let Some(field) = criteria.dynamic_type_field() {
            clone.set_dynamic_type_field(field);
        }
        if let Some(callback) = criteria.callback() {
            clone.base.criteria_mut().set_callback(Rc::clone(callback));
        }

        Ok(clone)
    }

    fn select_sql(&self) -> LoaderResult<String> {
        let source = self.base.source()?;
        let spec = self.base.criteria().spec();
        let limits = source.sql_pagination(spec);
        let modifier = if limits.is_empty() {
            String::new()
        } else {
            format!("{CALC_FOUND_ROWS} ")
        };

        Ok(format!(
            "SELECT {modifier}{} FROM {}{}{}{limits}",
            source.sql_select(spec),
            source.sql_from(),
            source.sql_filters(spec),
            source.sql_orders(spec)
        ))
    }

    fn track_found_rows(
        &mut self,
        conn: &Connection,
        sql: String,
        binds: &[Value],
    ) -> LoaderResult<(String, Option<u64>)> {
        let Some(tracked) = split_tracked(&sql)? else {
            return Ok((sql, None));
        };

        record_found_rows(conn, &tracked, binds)?;
        let found_rows = read_found_rows(conn)?;
        self.found_rows = Some(found_rows);
        Ok((tracked.select_sql, Some(found_rows)))
    }

    fn run_query(&self, sql: String, binds: &[Value], hooks: Hooks<'_>) -> LoaderResult<Vec<Model>> {
        debug!("event=loader_query module=loader status=start sql={sql}");
        let mut stmt = self.base.source()?.db_query(&sql)?;
        let stored = self.base.criteria().callback().cloned();
        let models = self
            .base
            .process_collection(&mut stmt, binds, hooks.or_after(stored.as_deref()))?;
        debug!(
            "event=loader_query module=loader status=ok rows={}",
            models.len()
        );
        Ok(models)
    }
}

impl LoaderCriteria for ModelCollectionLoader<'_> {
    fn criteria_mut(&mut self) -> &mut Criteria {
        self.base.criteria_mut()
    }
}

fn query_count(conn: &Connection, sql: &str) -> LoaderResult<u64> {
    debug!("event=loader_count module=loader status=start sql={sql}");
    let count = conn.query_row(sql, [], |row| row.get::<_, i64>(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Drops empty identifiers and repeats, keeping first-seen order.
fn distinct_ids<I, V>(ids: I) -> Vec<Value>
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(Into::into)
        .filter(|id: &Value| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{distinct_ids, ModelCollectionLoader};
    use crate::loader::{LoaderCriteria, LoaderError};
    use crate::model::factory::{ModelDescriptor, ModelFactory};
    use crate::model::value::Value;
    use crate::source::criteria::Filter;
    use std::sync::Arc;

    fn factory() -> Arc<ModelFactory> {
        Arc::new(
            ModelFactory::new()
                .with(ModelDescriptor::new("article", "articles"))
                .with(ModelDescriptor::new("author", "authors")),
        )
    }

    #[test]
    fn distinct_ids_drop_empty_and_repeated_values() {
        let ids = distinct_ids(vec![
            Value::from("3"),
            Value::from(""),
            Value::Null,
            Value::from("1"),
            Value::from(3_i64),
        ]);
        assert_eq!(ids, vec![Value::from("3"), Value::from("1")]);
    }

    #[test]
    fn model_can_only_be_bound_once() {
        let mut loader = ModelCollectionLoader::without_connection(factory());
        loader.set_model("article").expect("first binding");
        assert!(loader.is_dirty());

        let err = loader
            .set_model("author")
            .err()
            .expect("second binding must fail");
        assert!(matches!(err, LoaderError::InvalidState(message) if message.contains("article")));
    }

    #[test]
    fn missing_connection_is_a_connection_error() {
        let mut loader = ModelCollectionLoader::without_connection(factory());
        loader.set_model("article").expect("bind");

        assert!(matches!(loader.load(), Err(LoaderError::Connection)));
        assert!(matches!(loader.load_count(), Err(LoaderError::Connection)));
        assert!(matches!(loader.load_found(), Err(LoaderError::Connection)));
        assert!(matches!(loader.load_one("1"), Err(LoaderError::Connection)));
        assert!(matches!(
            loader.load_from_query("SELECT 1", Default::default()),
            Err(LoaderError::Connection)
        ));
    }

    #[test]
    fn select_sql_adds_found_rows_modifier_only_when_paginated() {
        let mut loader = ModelCollectionLoader::without_connection(factory());
        loader.set_model("article").expect("bind");
        loader.add_filter(Filter::eq("status", "active"));
        assert_eq!(
            loader.select_sql().expect("sql"),
            "SELECT \"articles\".* FROM \"articles\" WHERE \"status\" = 'active'"
        );

        loader.set_num_per_page(10).set_page(2);
        assert_eq!(
            loader.select_sql().expect("sql"),
            "SELECT SQL_CALC_FOUND_ROWS \"articles\".* FROM \"articles\" \
             WHERE \"status\" = 'active' LIMIT 10 OFFSET 10"
        );
    }

    #[test]
    fn reset_is_gated_by_dirty_flag() {
        let mut loader = ModelCollectionLoader::without_connection(factory());
        loader.bind("article").expect("bind");
        assert!(!loader.is_dirty());

        loader.found_rows = Some(5);
        loader.reset();
        assert_eq!(loader.found_rows, Some(5));

        loader.add_order(crate::source::criteria::Order::asc("title"));
        assert!(loader.is_dirty());
        loader.reset();
        assert_eq!(loader.found_rows, None);
        assert!(!loader.is_dirty());
        assert!(loader.criteria().spec().orders.is_empty());
        assert!(loader.has_model());
    }
}
