//! Identifiable model record.
//!
//! # Responsibility
//! - Hold one record's field mapping together with its type and key field.
//! - Track whether the record was populated from a row or cache entry.
//!
//! # Invariants
//! - `id()` never returns an empty value.
//! - A model is `loaded` only after `set_data` populated it.

use super::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;

/// Field name → value mapping carried by a model and stored in caches.
pub type ModelData = BTreeMap<String, Value>;

/// A typed record keyed by a single scalar identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    obj_type: String,
    key: String,
    data: ModelData,
    #[serde(skip)]
    loaded: bool,
}

impl Model {
    /// Creates an empty, unloaded model.
    pub fn new(obj_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            obj_type: obj_type.into(),
            key: key.into(),
            data: ModelData::new(),
            loaded: false,
        }
    }

    pub fn obj_type(&self) -> &str {
        &self.obj_type
    }

    /// Name of the primary key field.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the primary identifier, or `None` when missing or empty.
    pub fn id(&self) -> Option<&Value> {
        self.data.get(&self.key).filter(|value| !value.is_empty())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.data.insert(field.into(), value.into());
        self
    }

    /// Merges `data` into this model and marks it as loaded.
    pub fn set_data(&mut self, data: ModelData) -> &mut Self {
        self.data.extend(data);
        self.loaded = true;
        self
    }

    pub fn data(&self) -> &ModelData {
        &self.data
    }

    pub fn into_data(self) -> ModelData {
        self.data
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}
