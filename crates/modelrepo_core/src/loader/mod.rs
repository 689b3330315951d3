//! Collection loaders: criteria → SQL → models, with optional cache-aside.
//!
//! # Responsibility
//! - Define the loader error taxonomy and shared result shapes.
//! - Expose fluent criteria mutators common to every loader flavour.
//!
//! # Invariants
//! - Errors propagate to the immediate caller; nothing is retried.
//! - Every criteria mutator marks the loader dirty.

use crate::cache::CacheError;
use crate::db::DbError;
use crate::model::record::{Model, ModelData};
use crate::model::value::Value;
use crate::source::criteria::{Criteria, Filter, Keyword, Order, Pagination};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

pub mod cached;
pub mod collection;
pub mod model_loader;

pub type LoaderResult<T> = Result<T, LoaderError>;

/// Loader error taxonomy.
#[derive(Debug)]
pub enum LoaderError {
    /// The source has no usable database handle.
    Connection,
    InvalidArgument(String),
    InvalidState(String),
    UnknownModelType(String),
    /// A row or cache entry could not be mapped to a model.
    InvalidData(String),
    Db(DbError),
    Cache(CacheError),
}

impl Display for LoaderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection => write!(f, "could not instantiate a database connection"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::UnknownModelType(obj_type) => write!(f, "unknown model type `{obj_type}`"),
            Self::InvalidData(message) => write!(f, "invalid model data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Cache(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LoaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Cache(err) => Some(err),
            Self::Connection
            | Self::InvalidArgument(_)
            | Self::InvalidState(_)
            | Self::UnknownModelType(_)
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for LoaderError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for LoaderError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<CacheError> for LoaderError {
    fn from(value: CacheError) -> Self {
        Self::Cache(value)
    }
}

/// Per-call row processing hooks.
///
/// `before` edits raw row data before a model is built from it; `after`
/// edits the populated model. A loader's stored callback stands in for
/// `after` when none is given.
#[derive(Clone, Copy, Default)]
pub struct Hooks<'a> {
    pub before: Option<&'a dyn Fn(&mut ModelData)>,
    pub after: Option<&'a dyn Fn(&mut Model)>,
}

impl<'a> Hooks<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn before(mut self, before: &'a dyn Fn(&mut ModelData)) -> Self {
        self.before = Some(before);
        self
    }

    pub fn after(mut self, after: &'a dyn Fn(&mut Model)) -> Self {
        self.after = Some(after);
        self
    }

    pub(crate) fn or_after<'b>(self, fallback: Option<&'b dyn Fn(&mut Model)>) -> Hooks<'b>
    where
        'a: 'b,
    {
        Hooks {
            before: self.before,
            after: self.after.or(fallback),
        }
    }
}

/// Models returned by an eager load, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelCollection {
    models: Vec<Model>,
    found_rows: Option<u64>,
}

impl ModelCollection {
    pub fn new(models: Vec<Model>, found_rows: Option<u64>) -> Self {
        Self { models, found_rows }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Model> {
        self.models.iter()
    }

    pub fn first(&self) -> Option<&Model> {
        self.models.first()
    }

    /// Finds a model by identifier, comparing the rendered id.
    pub fn get(&self, id: impl Into<Value>) -> Option<&Model> {
        let wanted = id.into().to_string();
        self.models
            .iter()
            .find(|model| model.id().is_some_and(|value| value.to_string() == wanted))
    }

    pub fn ids(&self) -> Vec<&Value> {
        self.models.iter().filter_map(Model::id).collect()
    }

    /// Total rows matching the filters when the query tracked found rows.
    pub fn found_rows(&self) -> Option<u64> {
        self.found_rows
    }

    pub fn into_models(self) -> Vec<Model> {
        self.models
    }

    /// Re-keys the collection by rendered identifier.
    pub fn into_keyed(self) -> HashMap<String, Model> {
        self.models
            .into_iter()
            .filter_map(|model| {
                let id = model.id()?.to_string();
                Some((id, model))
            })
            .collect()
    }
}

impl IntoIterator for ModelCollection {
    type Item = Model;
    type IntoIter = std::vec::IntoIter<Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.into_iter()
    }
}

impl<'a> IntoIterator for &'a ModelCollection {
    type Item = &'a Model;
    type IntoIter = std::slice::Iter<'a, Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}

/// Bind type hint for structured queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Null,
    Integer,
    Real,
    Text,
    Bool,
}

impl ParamType {
    fn coerce(self, value: Value) -> LoaderResult<Value> {
        let invalid = |value: &Value| {
            LoaderError::InvalidArgument(format!("cannot bind `{value}` as {self:?}"))
        };
        match (self, value) {
            (Self::Null, _) => Ok(Value::Null),
            (_, Value::Null) => Ok(Value::Null),
            (Self::Text, value) => Ok(Value::Text(value.to_string())),
            (Self::Integer, Value::Real(real)) if real.fract() == 0.0 => Ok(Value::Integer(real as i64)),
            (Self::Integer, Value::Text(text)) => text
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| invalid(&Value::Text(text.clone()))),
            (Self::Integer, Value::Integer(value)) => Ok(Value::Integer(value)),
            (Self::Real, Value::Integer(value)) => Ok(Value::Real(value as f64)),
            (Self::Real, Value::Text(text)) => text
                .trim()
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| invalid(&Value::Text(text.clone()))),
            (Self::Real, Value::Real(value)) => Ok(Value::Real(value)),
            (Self::Bool, Value::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Value::Integer(1)),
                "0" | "false" | "no" | "off" | "" => Ok(Value::Integer(0)),
                _ => Err(invalid(&Value::Text(text.clone()))),
            },
            (Self::Bool, Value::Integer(value)) => Ok(Value::Integer(i64::from(value != 0))),
            (Self::Bool, Value::Real(value)) => Ok(Value::Integer(i64::from(value != 0.0))),
            (_, value) => Err(invalid(&value)),
        }
    }
}

/// Statement accepted by `load_from_query`.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Raw(String),
    Prepared {
        sql: String,
        binds: Vec<Value>,
        types: Vec<ParamType>,
    },
}

impl Query {
    /// Validates the query shape and applies bind type hints.
    pub fn into_parts(self) -> LoaderResult<(String, Vec<Value>)> {
        let (sql, binds) = match self {
            Self::Raw(sql) => (sql, Vec::new()),
            Self::Prepared { sql, binds, types } => {
                if types.len() > binds.len() {
                    return Err(LoaderError::InvalidArgument(format!(
                        "the SQL query must be [sql, binds, types] with at most one type per bind; \
                         received {} binds and {} types",
                        binds.len(),
                        types.len()
                    )));
                }
                let mut types = types.into_iter();
                let binds = binds
                    .into_iter()
                    .map(|value| match types.next() {
                        Some(kind) => kind.coerce(value),
                        None => Ok(value),
                    })
                    .collect::<LoaderResult<Vec<_>>>()?;
                (sql, binds)
            }
        };

        let sql = sql.trim().to_string();
        if sql.is_empty() {
            return Err(LoaderError::InvalidArgument(
                "the SQL query must not be empty".to_string(),
            ));
        }
        Ok((sql, binds))
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Self::Raw(value.to_string())
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Self::Raw(value)
    }
}

impl<S: Into<String>> From<(S, Vec<Value>)> for Query {
    fn from((sql, binds): (S, Vec<Value>)) -> Self {
        Self::Prepared {
            sql: sql.into(),
            binds,
            types: Vec::new(),
        }
    }
}

impl<S: Into<String>> From<(S, Vec<Value>, Vec<ParamType>)> for Query {
    fn from((sql, binds, types): (S, Vec<Value>, Vec<ParamType>)) -> Self {
        Self::Prepared {
            sql: sql.into(),
            binds,
            types,
        }
    }
}

/// Fluent criteria mutators shared by every loader flavour.
///
/// Each mutator marks the loader dirty, so a later `reset()` clears it.
pub trait LoaderCriteria {
    fn criteria_mut(&mut self) -> &mut Criteria;

    fn add_filter(&mut self, filter: Filter) -> &mut Self {
        self.criteria_mut().edit().filters.push(filter);
        self
    }

    fn add_filters<I>(&mut self, filters: I) -> &mut Self
    where
        I: IntoIterator<Item = Filter>,
    {
        self.criteria_mut().edit().filters.extend(filters);
        self
    }

    fn add_order(&mut self, order: Order) -> &mut Self {
        self.criteria_mut().edit().orders.push(order);
        self
    }

    fn set_pagination(&mut self, pagination: Pagination) -> &mut Self {
        self.criteria_mut().edit().pagination = pagination;
        self
    }

    fn set_page(&mut self, page: u32) -> &mut Self {
        self.criteria_mut().edit().pagination.page = page;
        self
    }

    fn set_num_per_page(&mut self, num_per_page: u32) -> &mut Self {
        self.criteria_mut().edit().pagination.num_per_page = num_per_page;
        self
    }

    fn set_properties<I, S>(&mut self, properties: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.criteria_mut().edit().properties = properties.into_iter().map(Into::into).collect();
        self
    }

    fn add_property(&mut self, property: impl Into<String>) -> &mut Self {
        let property = property.into();
        let spec = self.criteria_mut().edit();
        if !spec.properties.contains(&property) {
            spec.properties.push(property);
        }
        self
    }

    /// Matches `keyword` against the model's known properties.
    fn add_keyword(&mut self, keyword: impl Into<String>) -> &mut Self {
        self.add_keyword_in(keyword, Vec::<String>::new())
    }

    fn add_keyword_in<I, S>(&mut self, keyword: impl Into<String>, properties: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keyword = Keyword {
            text: keyword.into(),
            properties: properties.into_iter().map(Into::into).collect(),
        };
        self.criteria_mut().edit().keywords.push(keyword);
        self
    }

    fn set_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&mut Model) + 'static,
    {
        self.criteria_mut().set_callback(Rc::new(callback));
        self
    }

    /// Row field whose value selects the model type per row.
    fn set_dynamic_type_field(&mut self, field: impl Into<String>) -> &mut Self {
        self.criteria_mut().set_dynamic_type_field(field);
        self
    }
}
