//! Query criteria value and its dirty-tracking builder.
//!
//! # Responsibility
//! - Describe filters, keywords, orders, pagination and selected properties
//!   as one immutable `QuerySpec` value.
//! - Track whether a loader's criteria changed since the last reset.
//!
//! # Invariants
//! - Every mutation goes through `Criteria::edit()` (or the callback and
//!   dynamic type setters), which marks the builder dirty.
//! - `Criteria::reset()` only clears state when dirty.

use crate::model::record::Model;
use crate::model::value::Value;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// Comparison operator applied by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Parses the operator spellings accepted by query parameters.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "LIKE" => Some(Self::Like),
            "NOT LIKE" => Some(Self::NotLike),
            "IN" => Some(Self::In),
            "NOT IN" => Some(Self::NotIn),
            "IS NULL" => Some(Self::IsNull),
            "IS NOT NULL" => Some(Self::IsNotNull),
            _ => None,
        }
    }
}

/// Operand of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Single(Value),
    List(Vec<Value>),
}

/// One `property <operator> operand` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub property: String,
    pub operator: Operator,
    pub operand: Operand,
}

impl Filter {
    pub fn new(property: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            property: property.into(),
            operator,
            operand: Operand::Single(value.into()),
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::Eq, value)
    }

    pub fn is_in<I, V>(property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            property: property.into(),
            operator: Operator::In,
            operand: Operand::List(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn not_in<I, V>(property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            operator: Operator::NotIn,
            ..Self::is_in(property, values)
        }
    }

    pub fn is_null(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            operator: Operator::IsNull,
            operand: Operand::None,
        }
    }

    pub fn is_not_null(property: impl Into<String>) -> Self {
        Self {
            operator: Operator::IsNotNull,
            ..Self::is_null(property)
        }
    }
}

/// Free-text match across one or more properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub text: String,
    /// Empty means "the model's known properties".
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderMode {
    #[default]
    Asc,
    Desc,
}

impl OrderMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Sort instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    Property { property: String, mode: OrderMode },
    /// Rows follow the position of their `property` value in `values`.
    Values { property: String, values: Vec<Value> },
    Random,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self::Property {
            property: property.into(),
            mode: OrderMode::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self::Property {
            property: property.into(),
            mode: OrderMode::Desc,
        }
    }

    pub fn by_values<I, V>(property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Values {
            property: property.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Page selection. `num_per_page == 0` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub page: u32,
    pub num_per_page: u32,
}

impl Pagination {
    pub fn new(page: u32, num_per_page: u32) -> Self {
        Self { page, num_per_page }
    }

    pub fn is_limited(&self) -> bool {
        self.num_per_page > 0
    }

    /// Zero-based row offset; page numbers below 1 count as the first page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.num_per_page)
    }
}

/// Immutable description of what a loader will query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub properties: Vec<String>,
    pub filters: Vec<Filter>,
    pub keywords: Vec<Keyword>,
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

impl QuerySpec {
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_orders(mut self, orders: Vec<Order>) -> Self {
        self.orders = orders;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }
}

/// Result-processing callback applied to every mapped model.
pub type ModelCallback = Rc<dyn Fn(&mut Model)>;

/// Mutable criteria store owned by one loader.
#[derive(Default, Clone)]
pub struct Criteria {
    spec: QuerySpec,
    callback: Option<ModelCallback>,
    dynamic_type_field: Option<String>,
    dirty: bool,
}

impl Criteria {
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Grants mutable access to the query spec and marks the criteria dirty.
    pub fn edit(&mut self) -> &mut QuerySpec {
        self.dirty = true;
        &mut self.spec
    }

    pub fn callback(&self) -> Option<&ModelCallback> {
        self.callback.as_ref()
    }

    pub fn set_callback(&mut self, callback: ModelCallback) {
        self.dirty = true;
        self.callback = Some(callback);
    }

    pub fn dynamic_type_field(&self) -> Option<&str> {
        self.dynamic_type_field.as_deref()
    }

    pub fn set_dynamic_type_field(&mut self, field: impl Into<String>) {
        self.dirty = true;
        self.dynamic_type_field = Some(field.into());
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears everything when dirty. Returns whether anything was cleared.
    pub fn reset(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        *self = Self::default();
        true
    }
}

impl Debug for Criteria {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Criteria")
            .field("spec", &self.spec)
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .field("dynamic_type_field", &self.dynamic_type_field)
            .field("dirty", &self.dirty)
            .finish()
    }
}
