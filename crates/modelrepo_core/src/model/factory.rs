//! Model type registry.
//!
//! # Responsibility
//! - Map type identifiers to descriptors (table, key field, properties).
//! - Instantiate empty models for a type, including types picked from row
//!   data through a dynamic type field.
//!
//! # Invariants
//! - Type identifiers are unique within one factory.
//! - Unknown identifiers fail instead of falling back to another type.

use super::record::Model;
use crate::loader::{LoaderError, LoaderResult};
use std::collections::HashMap;

pub const DEFAULT_KEY_FIELD: &str = "id";

/// Static description of one model type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    obj_type: String,
    table: String,
    key: String,
    properties: Vec<String>,
}

impl ModelDescriptor {
    /// Describes a model stored in `table`, keyed by `id`.
    pub fn new(obj_type: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            obj_type: obj_type.into(),
            table: table.into(),
            key: DEFAULT_KEY_FIELD.to_string(),
            properties: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Known properties; keyword searches without explicit properties use these.
    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn obj_type(&self) -> &str {
        &self.obj_type
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }
}

/// Registry resolving type identifiers to empty model instances.
#[derive(Debug, Clone, Default)]
pub struct ModelFactory {
    descriptors: HashMap<String, ModelDescriptor>,
}

impl ModelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the descriptor for its type identifier.
    pub fn register(&mut self, descriptor: ModelDescriptor) -> &mut Self {
        self.descriptors
            .insert(descriptor.obj_type().to_string(), descriptor);
        self
    }

    pub fn with(mut self, descriptor: ModelDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn descriptor(&self, obj_type: &str) -> LoaderResult<&ModelDescriptor> {
        self.descriptors
            .get(obj_type)
            .ok_or_else(|| LoaderError::UnknownModelType(obj_type.to_string()))
    }

    pub fn is_registered(&self, obj_type: &str) -> bool {
        self.descriptors.contains_key(obj_type)
    }

    /// Instantiates an empty model of `obj_type`.
    pub fn create(&self, obj_type: &str) -> LoaderResult<Model> {
        let descriptor = self.descriptor(obj_type)?;
        Ok(Model::new(descriptor.obj_type(), descriptor.key()))
    }
}
