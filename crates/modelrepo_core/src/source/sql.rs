//! SQL fragment builder for one model table.
//!
//! # Responsibility
//! - Render `QuerySpec` criteria into SELECT/FROM/WHERE/ORDER BY/LIMIT
//!   fragments and a row-count statement.
//! - Hand out the database handle the loader executes against.
//!
//! # Invariants
//! - Identifiers are always double-quoted with embedded quotes doubled.
//! - Values are rendered as literals via `Value::to_sql_literal`.
//! - Non-empty WHERE/ORDER BY/LIMIT fragments start with a space so they
//!   can be concatenated directly after the FROM clause.

use super::criteria::{Filter, Keyword, Operand, Operator, Order, OrderMode, QuerySpec};
use crate::loader::{LoaderError, LoaderResult};
use crate::model::factory::ModelDescriptor;
use crate::model::value::Value;
use log::debug;
use rusqlite::{Connection, Statement};

/// Fragment builder and connection holder for one model descriptor.
#[derive(Debug, Clone)]
pub struct SqlSource<'conn> {
    conn: Option<&'conn Connection>,
    table: String,
    key: String,
    searchable: Vec<String>,
}

impl<'conn> SqlSource<'conn> {
    pub fn new(conn: Option<&'conn Connection>, descriptor: &ModelDescriptor) -> Self {
        Self {
            conn,
            table: descriptor.table().to_string(),
            key: descriptor.key().to_string(),
            searchable: descriptor.properties().to_vec(),
        }
    }

    /// Column list. Explicit properties always include the key field.
    pub fn sql_select(&self, spec: &QuerySpec) -> String {
        if spec.properties.is_empty() {
            return format!("{}.*", quote_identifier(&self.table));
        }

        let mut columns = Vec::with_capacity(spec.properties.len() + 1);
        if !spec.properties.iter().any(|property| property == &self.key) {
            columns.push(quote_identifier(&self.key));
        }
        columns.extend(spec.properties.iter().map(|property| quote_identifier(property)));
        columns.join(", ")
    }

    pub fn sql_from(&self) -> String {
        quote_identifier(&self.table)
    }

    pub fn sql_filters(&self, spec: &QuerySpec) -> String {
        let clauses = spec
            .filters
            .iter()
            .map(render_filter)
            .chain(
                spec.keywords
                    .iter()
                    .filter_map(|keyword| self.render_keyword(keyword)),
            )
            .collect::<Vec<_>>();

        if clauses.is_empty() {
            return String::new();
        }
        format!(" WHERE {}", clauses.join(" AND "))
    }

    pub fn sql_orders(&self, spec: &QuerySpec) -> String {
        let orders = spec.orders.iter().map(render_order).collect::<Vec<_>>();
        if orders.is_empty() {
            return String::new();
        }
        format!(" ORDER BY {}", orders.join(", "))
    }

    pub fn sql_pagination(&self, spec: &QuerySpec) -> String {
        let pagination = spec.pagination;
        if !pagination.is_limited() {
            return String::new();
        }

        let offset = pagination.offset();
        if offset > 0 {
            format!(" LIMIT {} OFFSET {offset}", pagination.num_per_page)
        } else {
            format!(" LIMIT {}", pagination.num_per_page)
        }
    }

    /// Counts every row matching the filters, ignoring pagination.
    pub fn sql_load_count(&self, spec: &QuerySpec) -> String {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            self.sql_from(),
            self.sql_filters(spec)
        )
    }

    pub fn db(&self) -> Option<&'conn Connection> {
        self.conn
    }

    /// Prepares `sql` on the source connection.
    pub fn db_query(&self, sql: &str) -> LoaderResult<Statement<'conn>> {
        let conn = self.db().ok_or(LoaderError::Connection)?;
        debug!("event=db_query module=source status=prepare sql={sql}");
        Ok(conn.prepare(sql)?)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn render_keyword(&self, keyword: &Keyword) -> Option<String> {
        let properties = if keyword.properties.is_empty() {
            &self.searchable
        } else {
            &keyword.properties
        };
        if properties.is_empty() || keyword.text.trim().is_empty() {
            return None;
        }

        let pattern = Value::Text(format!("%{}%", escape_like(keyword.text.trim())));
        let matches = properties
            .iter()
            .map(|property| {
                format!(
                    "{} LIKE {} ESCAPE '\\'",
                    quote_identifier(property),
                    pattern.to_sql_literal()
                )
            })
            .collect::<Vec<_>>();
        Some(format!("({})", matches.join(" OR ")))
    }
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn render_filter(filter: &Filter) -> String {
    let column = quote_identifier(&filter.property);

    match (filter.operator, &filter.operand) {
        (Operator::IsNull, _) | (Operator::Eq, Operand::Single(Value::Null)) => {
            format!("{column} IS NULL")
        }
        (Operator::IsNotNull, _) | (Operator::Ne, Operand::Single(Value::Null)) => {
            format!("{column} IS NOT NULL")
        }
        (Operator::In | Operator::NotIn, operand) => {
            let values = match operand {
                Operand::List(values) => values.clone(),
                Operand::Single(value) => vec![value.clone()],
                Operand::None => Vec::new(),
            };
            render_membership(&column, filter.operator == Operator::NotIn, &values)
        }
        (operator, Operand::Single(value)) => {
            format!("{column} {} {}", comparison(operator), value.to_sql_literal())
        }
        (operator, Operand::List(values)) => {
            // A list compared with a scalar operator matches any of its values.
            let alternatives = values
                .iter()
                .map(|value| format!("{column} {} {}", comparison(operator), value.to_sql_literal()))
                .collect::<Vec<_>>();
            if alternatives.is_empty() {
                "0 = 1".to_string()
            } else {
                format!("({})", alternatives.join(" OR "))
            }
        }
        (_, Operand::None) => format!("{column} IS NULL"),
    }
}

fn render_membership(column: &str, negated: bool, values: &[Value]) -> String {
    if values.is_empty() {
        return if negated { "1 = 1" } else { "0 = 1" }.to_string();
    }

    let list = values
        .iter()
        .map(Value::to_sql_literal)
        .collect::<Vec<_>>()
        .join(", ");
    if negated {
        format!("{column} NOT IN ({list})")
    } else {
        format!("{column} IN ({list})")
    }
}

fn comparison(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => "=",
        Operator::Ne => "<>",
        Operator::Lt => "<",
        Operator::Le => "<=",
        Operator::Gt => ">",
        Operator::Ge => ">=",
        Operator::Like => "LIKE",
        Operator::NotLike => "NOT LIKE",
        Operator::In => "IN",
        Operator::NotIn => "NOT IN",
        Operator::IsNull => "IS",
        Operator::IsNotNull => "IS NOT",
    }
}

fn render_order(order: &Order) -> String {
    match order {
        Order::Property { property, mode } => {
            let direction = match mode {
                OrderMode::Asc => "ASC",
                OrderMode::Desc => "DESC",
            };
            format!("{} {direction}", quote_identifier(property))
        }
        Order::Values { property, values } => {
            let column = quote_identifier(property);
            let arms = values
                .iter()
                .enumerate()
                .map(|(position, value)| format!(" WHEN {} THEN {position}", value.to_sql_literal()))
                .collect::<String>();
            format!("CASE {column}{arms} ELSE {} END", values.len())
        }
        Order::Random => "RANDOM()".to_string(),
    }
}
