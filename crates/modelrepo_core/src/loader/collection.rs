//! Row-to-model mapping core shared by every loader.
//!
//! # Responsibility
//! - Hold the bound model type, factory, connection and criteria.
//! - Map rows to models (`process_model`) eagerly or through a `Cursor`.
//!
//! # Invariants
//! - Rows whose key field is empty never become models.
//! - An installed `ModelSink` observes every mapped model exactly once.
//! - A cursor is single-pass; it never re-runs its statement.

use super::{Hooks, LoaderError, LoaderResult};
use crate::model::factory::{ModelDescriptor, ModelFactory};
use crate::model::record::{Model, ModelData};
use crate::model::value::Value;
use crate::source::criteria::Criteria;
use crate::source::sql::SqlSource;
use log::debug;
use rusqlite::{params_from_iter, Connection, Row, Rows, Statement};
use std::rc::Rc;
use std::sync::Arc;

/// Receives every model a loader maps from a row.
pub trait ModelSink {
    fn model_loaded(&self, bound: &ModelDescriptor, model: &Model) -> LoaderResult<()>;
}

/// State and mapping machinery underneath the public loaders.
pub struct CollectionLoader<'conn> {
    conn: Option<&'conn Connection>,
    factory: Arc<ModelFactory>,
    model: Option<ModelDescriptor>,
    criteria: Criteria,
    sink: Option<Rc<dyn ModelSink + 'conn>>,
}

impl<'conn> CollectionLoader<'conn> {
    pub fn new(conn: Option<&'conn Connection>, factory: Arc<ModelFactory>) -> Self {
        Self {
            conn,
            factory,
            model: None,
            criteria: Criteria::default(),
            sink: None,
        }
    }

    pub fn connection(&self) -> Option<&'conn Connection> {
        self.conn
    }

    pub fn factory(&self) -> &Arc<ModelFactory> {
        &self.factory
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// The bound model descriptor.
    pub fn model(&self) -> LoaderResult<&ModelDescriptor> {
        self.model.as_ref().ok_or_else(|| {
            LoaderError::InvalidState("no model is assigned to this collection loader".to_string())
        })
    }

    pub(crate) fn bind_model(&mut self, obj_type: &str) -> LoaderResult<()> {
        let descriptor = self.factory.descriptor(obj_type)?.clone();
        self.model = Some(descriptor);
        Ok(())
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn criteria_mut(&mut self) -> &mut Criteria {
        &mut self.criteria
    }

    pub(crate) fn set_sink(&mut self, sink: Rc<dyn ModelSink + 'conn>) {
        self.sink = Some(sink);
    }

    /// Fragment builder for the bound model.
    pub fn source(&self) -> LoaderResult<SqlSource<'conn>> {
        Ok(SqlSource::new(self.conn, self.model()?))
    }

    /// The database handle, or a connection error.
    pub fn db(&self) -> LoaderResult<&'conn Connection> {
        self.conn.ok_or(LoaderError::Connection)
    }

    /// Creates an empty model of the bound type.
    pub fn create_model(&self) -> LoaderResult<Model> {
        self.factory.create(self.model()?.obj_type())
    }

    /// Creates an empty model whose type may come from `data`'s dynamic type field.
    pub fn create_model_from_data(&self, data: &ModelData) -> LoaderResult<Model> {
        let dynamic_type = self
            .criteria
            .dynamic_type_field()
            .and_then(|field| data.get(field))
            .and_then(Value::as_text)
            .map(str::trim)
            .filter(|obj_type| !obj_type.is_empty());

        match dynamic_type {
            Some(obj_type) => self.factory.create(obj_type),
            None => self.create_model(),
        }
    }

    /// Maps one row to a model. Returns `None` when the row has no id.
    pub fn process_model(&self, mut data: ModelData, hooks: Hooks<'_>) -> LoaderResult<Option<Model>> {
        if let Some(before) = hooks.before {
            before(&mut data);
        }

        let mut model = self.create_model_from_data(&data)?;
        model.set_data(data);
        if model.id().is_none() {
            debug!(
                "event=process_model module=loader status=skipped reason=empty_id obj_type={}",
                model.obj_type()
            );
            return Ok(None);
        }

        if let Some(after) = hooks.after {
            after(&mut model);
        }

        if let Some(sink) = &self.sink {
            sink.model_loaded(self.model()?, &model)?;
        }

        Ok(Some(model))
    }

    /// Runs `stmt` and maps every row.
    pub fn process_collection(
        &self,
        stmt: &mut Statement<'_>,
        binds: &[Value],
        hooks: Hooks<'_>,
    ) -> LoaderResult<Vec<Model>> {
        map_rows(self, stmt, binds, hooks)?.collect()
    }

    pub(crate) fn cursor<'a>(
        &'a self,
        stmt: Statement<'conn>,
        binds: Vec<Value>,
        hooks: Hooks<'a>,
        found_rows: Option<u64>,
    ) -> Cursor<'a, 'conn> {
        Cursor {
            loader: self,
            stmt,
            binds,
            hooks,
            found_rows,
            consumed: false,
        }
    }
}

/// Lazily mapped result set of one statement.
///
/// ```ignore
/// let mut cursor = loader.cursor(Hooks::none())?;
/// for model in cursor.models()? {
///     let model = model?;
/// }
/// ```
pub struct Cursor<'a, 'conn> {
    loader: &'a CollectionLoader<'conn>,
    stmt: Statement<'conn>,
    binds: Vec<Value>,
    hooks: Hooks<'a>,
    found_rows: Option<u64>,
    consumed: bool,
}

impl<'conn> Cursor<'_, 'conn> {
    /// Total matching rows when the statement tracked found rows.
    pub fn found_rows(&self) -> Option<u64> {
        self.found_rows
    }

    /// Starts pulling rows. Fails on a second call.
    pub fn models(&mut self) -> LoaderResult<Models<'_, 'conn>> {
        if self.consumed {
            return Err(LoaderError::InvalidState(
                "cursor already consumed; issue a new query".to_string(),
            ));
        }
        self.consumed = true;
        map_rows(self.loader, &mut self.stmt, &self.binds, self.hooks)
    }
}

/// Iterator mapping rows to models one at a time.
pub struct Models<'c, 'conn> {
    loader: &'c CollectionLoader<'conn>,
    rows: Rows<'c>,
    columns: Vec<String>,
    hooks: Hooks<'c>,
    finished: bool,
}

impl Iterator for Models<'_, '_> {
    type Item = LoaderResult<Model>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let data = match self.rows.next() {
                Ok(Some(row)) => row_data(row, &self.columns),
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => Err(err.into()),
            };

            let processed = data.and_then(|data| self.loader.process_model(data, self.hooks));
            match processed {
                Ok(Some(model)) => return Some(Ok(model)),
                Ok(None) => continue,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

fn map_rows<'c, 'conn>(
    loader: &'c CollectionLoader<'conn>,
    stmt: &'c mut Statement<'_>,
    binds: &'c [Value],
    hooks: Hooks<'c>,
) -> LoaderResult<Models<'c, 'conn>> {
    let columns = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    let rows = stmt.query(params_from_iter(binds))?;
    Ok(Models {
        loader,
        rows,
        columns,
        hooks,
        finished: false,
    })
}

fn row_data(row: &Row<'_>, columns: &[String]) -> LoaderResult<ModelData> {
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let value = Value::from_value_ref(row.get_ref(index)?)
                .map_err(|message| LoaderError::InvalidData(format!("column `{column}`: {message}")))?;
            Ok((column.clone(), value))
        })
        .collect()
}
